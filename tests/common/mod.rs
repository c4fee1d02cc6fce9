//! In-memory collaborators for orchestrator tests
#![allow(dead_code)]

use async_trait::async_trait;
use launch_racer::config::RaceConfig;
use launch_racer::freshness::{AnchorSource, FreshnessAnchor};
use launch_racer::race_engine::Orchestrator;
use launch_racer::rpc::{Confirmation, LedgerRpc, SendOptions};
use launch_racer::streaming::{RawBlockMeta, RawFrame, RawTransaction, StreamSource, StreamUpdate};
use launch_racer::tx_builder::{
    ConstructedPayload, ConstructionParams, Deposit, PayloadConstructor, TransactionBuilderError,
    RESERVE_A, RESERVE_B, RESOURCE_ACCOUNT, RESOURCE_POSITION,
};
use launch_racer::types::PayloadKind;
use parking_lot::Mutex;
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const COMPLETE_LOG: &str = "Program log: Instruction: CompleteLaunch";

/// Stream source whose sender is driven by the test
pub struct ChannelSource {
    fail: bool,
    sender: Mutex<Option<mpsc::UnboundedSender<StreamUpdate>>>,
}

impl ChannelSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            sender: Mutex::new(None),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            sender: Mutex::new(None),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub fn send(&self, update: StreamUpdate) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.send(update);
        }
    }

    pub fn send_event(&self, signature: &str, slot: u64, logs: &[&str]) {
        self.send(StreamUpdate::Frame(RawFrame::Transaction(RawTransaction {
            signature: Some(signature.to_string()),
            slot: Some(slot),
            log_messages: Some(logs.iter().map(|l| l.to_string()).collect()),
            ..Default::default()
        })));
    }

    pub fn send_block(&self, slot: u64, blockhash: Hash, block_height: u64) {
        self.send(StreamUpdate::Frame(RawFrame::BlockMeta(RawBlockMeta {
            slot,
            blockhash: Some(blockhash.to_string()),
            block_height: Some(block_height),
        })));
    }
}

#[async_trait]
impl StreamSource for ChannelSource {
    fn endpoint(&self) -> &str {
        "ws://127.0.0.1:8900"
    }

    async fn subscribe(
        &self,
        _filter: Pubkey,
        tx: mpsc::UnboundedSender<StreamUpdate>,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("connection refused");
        }
        *self.sender.lock() = Some(tx);
        Ok(())
    }
}

/// Scripted result of one submission
#[derive(Debug, Clone)]
pub enum Outcome {
    Confirm,
    /// Lands and fails on-chain with this error text
    Fail(String),
    /// Rejected at send time
    Reject(String),
    /// Lands, but the first `n` confirmation queries time out
    LandsAfter(usize),
}

/// Program ids that tell the mock which payload a transaction carries
#[derive(Debug, Clone, Copy)]
pub struct Programs {
    pub claim: Pubkey,
    pub create: Pubkey,
    pub add: Pubkey,
}

impl Programs {
    pub fn new() -> Self {
        Self {
            claim: Pubkey::new_unique(),
            create: Pubkey::new_unique(),
            add: Pubkey::new_unique(),
        }
    }

    fn kind_of(&self, tx: &Transaction) -> Option<PayloadKind> {
        let keys = &tx.message.account_keys;
        if keys.contains(&self.claim) {
            Some(PayloadKind::Claim)
        } else if keys.contains(&self.create) {
            Some(PayloadKind::CreateResource)
        } else if keys.contains(&self.add) {
            Some(PayloadKind::AddToExistingResource)
        } else {
            None
        }
    }
}

/// Record of one transmitted transaction
#[derive(Debug, Clone)]
pub struct Sent {
    pub kind: PayloadKind,
    pub signature: Signature,
    pub blockhash: Hash,
    pub options: SendOptions,
}

pub struct MockRpc {
    programs: Programs,
    outcomes: Mutex<HashMap<PayloadKind, VecDeque<Outcome>>>,
    simulations: Mutex<HashMap<PayloadKind, VecDeque<Option<String>>>>,
    pending: Mutex<HashMap<Signature, Outcome>>,
    balances: Mutex<HashMap<Pubkey, u64>>,
    missing: Mutex<HashSet<Pubkey>>,
    sent: Mutex<Vec<Sent>>,
    anchor_fetches: AtomicUsize,
    anchor_hash: Mutex<Hash>,
    confirm_delay: Mutex<Option<Duration>>,
}

impl MockRpc {
    pub fn new(programs: Programs) -> Arc<Self> {
        Arc::new(Self {
            programs,
            outcomes: Mutex::new(HashMap::new()),
            simulations: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            anchor_fetches: AtomicUsize::new(0),
            anchor_hash: Mutex::new(Hash::new_unique()),
            confirm_delay: Mutex::new(None),
        })
    }

    /// Queue outcomes for a payload kind; unscripted submissions confirm
    pub fn script(&self, kind: PayloadKind, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes
            .lock()
            .entry(kind)
            .or_default()
            .extend(outcomes);
    }

    /// Queue simulation results for a payload kind; `None` and unscripted
    /// simulations pass
    pub fn script_simulations(
        &self,
        kind: PayloadKind,
        results: impl IntoIterator<Item = Option<String>>,
    ) {
        self.simulations
            .lock()
            .entry(kind)
            .or_default()
            .extend(results);
    }

    pub fn set_balance(&self, account: Pubkey, amount: u64) {
        self.balances.lock().insert(account, amount);
    }

    /// Report `account` as absent from the ledger
    pub fn forget_account(&self, account: Pubkey) {
        self.missing.lock().insert(account);
    }

    pub fn delay_confirmations(&self, delay: Duration) {
        *self.confirm_delay.lock() = Some(delay);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_of(&self, kind: PayloadKind) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.kind == kind).collect()
    }

    pub fn anchor_fetches(&self) -> usize {
        self.anchor_fetches.load(Ordering::SeqCst)
    }

    /// Blockhash RPC-fetched anchors currently carry
    pub fn anchor_hash(&self) -> Hash {
        *self.anchor_hash.lock()
    }

    /// Advance the node to a new blockhash
    pub fn rotate_anchor(&self) -> Hash {
        let next = Hash::new_unique();
        *self.anchor_hash.lock() = next;
        next
    }
}

#[async_trait]
impl LedgerRpc for MockRpc {
    async fn latest_anchor(&self) -> anyhow::Result<FreshnessAnchor> {
        self.anchor_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(FreshnessAnchor::new(self.anchor_hash(), 1_000, AnchorSource::Rpc))
    }

    async fn account_exists(&self, address: &Pubkey) -> anyhow::Result<bool> {
        Ok(!self.missing.lock().contains(address))
    }

    async fn token_balance(&self, token_account: &Pubkey) -> anyhow::Result<u64> {
        self.balances
            .lock()
            .get(token_account)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("could not find account {}", token_account))
    }

    async fn simulate(&self, tx: &Transaction) -> anyhow::Result<Option<String>> {
        let Some(kind) = self.programs.kind_of(tx) else {
            return Ok(None);
        };
        Ok(self
            .simulations
            .lock()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .flatten())
    }

    async fn send(&self, tx: &Transaction, options: SendOptions) -> anyhow::Result<Signature> {
        let kind = self
            .programs
            .kind_of(tx)
            .ok_or_else(|| anyhow::anyhow!("unexpected transaction"))?;
        let signature = tx.signatures[0];
        self.sent.lock().push(Sent {
            kind,
            signature,
            blockhash: tx.message.recent_blockhash,
            options,
        });

        let outcome = self
            .outcomes
            .lock()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Confirm);
        if let Outcome::Reject(reason) = outcome {
            anyhow::bail!(reason);
        }
        self.pending.lock().insert(signature, outcome);
        Ok(signature)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        _timeout: Duration,
    ) -> anyhow::Result<Confirmation> {
        let delay = *self.confirm_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.pending.lock().remove(signature);
        Ok(match outcome {
            Some(Outcome::LandsAfter(n)) if n > 0 => {
                self.pending
                    .lock()
                    .insert(*signature, Outcome::LandsAfter(n - 1));
                Confirmation::TimedOut
            }
            Some(Outcome::Fail(reason)) => Confirmation::Failed(reason),
            Some(_) => Confirmation::Confirmed,
            None => Confirmation::TimedOut,
        })
    }
}

/// Constructor emitting one instruction per payload against the mock programs
pub struct MockConstructor {
    programs: Programs,
    pub reserve_a: Pubkey,
    pub reserve_b: Pubkey,
    pub resource: Pubkey,
    create_failures: AtomicUsize,
    create_template_broken: AtomicBool,
    create_builds: AtomicUsize,
    deposits: Mutex<Vec<Deposit>>,
}

impl MockConstructor {
    pub fn new(programs: Programs) -> Arc<Self> {
        Arc::new(Self {
            programs,
            reserve_a: Pubkey::new_unique(),
            reserve_b: Pubkey::new_unique(),
            resource: Pubkey::new_unique(),
            create_failures: AtomicUsize::new(0),
            create_template_broken: AtomicBool::new(false),
            create_builds: AtomicUsize::new(0),
            deposits: Mutex::new(Vec::new()),
        })
    }

    /// Fail the next `count` create-resource builds with a retryable error
    pub fn fail_create_builds(&self, count: usize) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every create-resource build with a template error
    pub fn break_create_template(&self) {
        self.create_template_broken.store(true, Ordering::SeqCst);
    }

    pub fn create_builds(&self) -> usize {
        self.create_builds.load(Ordering::SeqCst)
    }

    pub fn deposits(&self) -> Vec<Deposit> {
        self.deposits.lock().clone()
    }

    fn with_position(
        &self,
        program: Pubkey,
        params: &ConstructionParams,
    ) -> ConstructedPayload {
        let position = Keypair::new();
        let mut derived = BTreeMap::new();
        derived.insert(RESOURCE_ACCOUNT.to_string(), self.resource);
        derived.insert(RESERVE_A.to_string(), self.reserve_a);
        derived.insert(RESERVE_B.to_string(), self.reserve_b);
        derived.insert(RESOURCE_POSITION.to_string(), position.pubkey());
        ConstructedPayload {
            instructions: vec![Instruction::new_with_bytes(
                program,
                &[1],
                vec![
                    AccountMeta::new(params.payer, true),
                    AccountMeta::new(position.pubkey(), true),
                    AccountMeta::new(self.resource, false),
                ],
            )],
            signers: vec![position],
            derived_addresses: derived,
        }
    }
}

#[async_trait]
impl PayloadConstructor for MockConstructor {
    async fn build_claim(
        &self,
        params: &ConstructionParams,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        Ok(ConstructedPayload {
            instructions: vec![Instruction::new_with_bytes(
                self.programs.claim,
                &[0],
                vec![AccountMeta::new(params.payer, true)],
            )],
            ..Default::default()
        })
    }

    async fn build_create_resource(
        &self,
        params: &ConstructionParams,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        self.create_builds.fetch_add(1, Ordering::SeqCst);
        if self.create_template_broken.load(Ordering::SeqCst) {
            return Err(TransactionBuilderError::template(
                "create_resource: unknown placeholder {poolVault}",
            ));
        }
        let remaining = self.create_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.create_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("mint metadata not yet available").into());
        }
        Ok(self.with_position(self.programs.create, params))
    }

    async fn build_add_to_existing(
        &self,
        params: &ConstructionParams,
        deposit: &Deposit,
        existing: &BTreeMap<String, Pubkey>,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        assert_eq!(existing.get(RESOURCE_ACCOUNT), Some(&self.resource));
        self.deposits.lock().push(*deposit);
        Ok(self.with_position(self.programs.add, params))
    }
}

/// Wired orchestrator plus handles on its fakes
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub source: Arc<ChannelSource>,
    pub rpc: Arc<MockRpc>,
    pub constructor: Arc<MockConstructor>,
    pub payer: Arc<Keypair>,
}

impl Harness {
    pub fn new(configure: impl FnOnce(&mut RaceConfig)) -> Self {
        Self::with_source(ChannelSource::new(), configure)
    }

    pub fn with_source(
        source: Arc<ChannelSource>,
        configure: impl FnOnce(&mut RaceConfig),
    ) -> Self {
        let programs = Programs::new();
        let rpc = MockRpc::new(programs);
        let constructor = MockConstructor::new(programs);
        let payer = Arc::new(Keypair::new());

        let mut config = RaceConfig::new(Pubkey::new_unique());
        config.amount_a = 1_000;
        config.amount_b = 4_000;
        config.anchor_refresh = Duration::from_secs(3_600);
        config.submit.backoff_initial_ms = 1;
        config.submit.backoff_max_ms = 2;
        configure(&mut config);

        let orchestrator = Arc::new(Orchestrator::new(
            config,
            Arc::clone(&payer),
            source.clone(),
            rpc.clone(),
            constructor.clone(),
        ));
        Self {
            orchestrator,
            source,
            rpc,
            constructor,
            payer,
        }
    }

    /// Wait until the stream subscription is live
    pub async fn connected(&self) {
        let source = Arc::clone(&self.source);
        wait_until(move || source.is_connected()).await;
    }
}

/// Poll a condition, failing the test after a generous bound
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
