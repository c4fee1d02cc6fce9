//! Race orchestrator
//!
//! State machine driving one run:
//!
//! ```text
//! Idle -> Monitoring -> Executing -> Completed
//!             ^             |
//!             +-- transient-+-> Failed
//! ```
//!
//! Events reach the orchestrator through a listener that forwards them into
//! an mpsc channel; a single loop consumes the channel, so trigger decisions
//! are serialized. The `Monitoring -> Executing` transition is additionally
//! guarded by the state mutex, so at most one execution sequence is in flight
//! no matter how events arrive. Execution runs in its own task and reports
//! back through a second channel; events seen meanwhile are ignored.

use crate::config::RaceConfig;
use crate::detector::{self, TriggerDecision};
use crate::errors::{RaceError, SubmissionError, SubmissionFailure};
use crate::executor::SubmissionExecutor;
use crate::freshness::FreshnessCache;
use crate::metrics::metrics;
use crate::rpc::LedgerRpc;
use crate::streaming::{EventStreamClient, StreamSource};
use crate::tx_builder::{
    proportional_deposit, ConstructionParams, PayloadCache, PayloadConstructor, PreparedSet,
    Prebuilder, TransactionBuilderError, RESERVE_A, RESERVE_B, RESOURCE_ACCOUNT,
};
use crate::types::{ExecutionResult, NormalizedEvent, PayloadKind, RunState};
use parking_lot::Mutex;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const LISTENER_ID: &str = "race-orchestrator";

type ExecutionOutcome = Result<ExecutionResult, RaceError>;

/// Requests shutdown of a running orchestrator
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

pub struct Orchestrator {
    run_id: Uuid,
    config: RaceConfig,
    params: ConstructionParams,
    stream: EventStreamClient,
    freshness: Arc<FreshnessCache>,
    rpc: Arc<dyn LedgerRpc>,
    prebuilder: Prebuilder,
    cache: PayloadCache,
    executor: SubmissionExecutor,
    state: Mutex<RunState>,
    /// Confirmed claim, kept across transient retries so it is never resubmitted
    claim_signature: Mutex<Option<Signature>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        config: RaceConfig,
        payer: Arc<Keypair>,
        source: Arc<dyn StreamSource>,
        rpc: Arc<dyn LedgerRpc>,
        constructor: Arc<dyn PayloadConstructor>,
    ) -> Self {
        let freshness = Arc::new(FreshnessCache::new());
        let stream = EventStreamClient::new(source, Arc::clone(&freshness));
        let executor = SubmissionExecutor::new(
            Arc::clone(&rpc),
            Arc::clone(&freshness),
            stream.health(),
            Arc::clone(&payer),
            config.submit,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            run_id: Uuid::new_v4(),
            params: config.construction_params(payer.pubkey()),
            prebuilder: Prebuilder::new(constructor, config.compute_budget),
            config,
            stream,
            freshness,
            rpc,
            cache: PayloadCache::new(),
            executor,
            state: Mutex::new(RunState::Idle),
            claim_signature: Mutex::new(None),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Identifier attached to every log line of this run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn freshness(&self) -> &Arc<FreshnessCache> {
        &self.freshness
    }

    pub fn stream(&self) -> &EventStreamClient {
        &self.stream
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Terminal states are final; later transitions are ignored
    fn set_state(&self, next: RunState) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            debug!(state = ?*state, ignored = ?next, "Run already finished");
            return;
        }
        if *state != next {
            info!(from = ?*state, to = ?next, "Run state transition");
            *state = next;
            metrics().run_state.set(next as i64);
        }
    }

    /// Move Monitoring -> Executing. Returns `false` (and changes nothing)
    /// from any other state.
    pub fn try_begin_execution(&self) -> bool {
        let mut state = self.state.lock();
        if *state != RunState::Monitoring {
            return false;
        }
        info!(from = ?*state, to = ?RunState::Executing, "Run state transition");
        *state = RunState::Executing;
        metrics().run_state.set(RunState::Executing as i64);
        true
    }

    /// Run to a terminal state. The stream is always stopped on return.
    pub async fn run(self: Arc<Self>) -> Result<ExecutionResult, RaceError> {
        let span = info_span!("race", run_id = %self.run_id);
        let outcome = self.drive().instrument(span.clone()).await;
        let _entered = span.enter();
        self.stream.stop();
        match &outcome {
            Ok(result) => {
                self.set_state(RunState::Completed);
                info!(
                    signature = %result.submission_id,
                    path = %result.path,
                    addresses = ?result.created_addresses,
                    "Race completed"
                );
            }
            Err(e) => {
                self.set_state(RunState::Failed);
                error!(category = e.category(), error = %e, "Race failed");
            }
        }
        outcome
    }

    async fn drive(self: &Arc<Self>) -> Result<ExecutionResult, RaceError> {
        {
            let state = self.state();
            if state != RunState::Idle {
                return Err(RaceError::Configuration(format!(
                    "orchestrator already ran (state {:?})",
                    state
                )));
            }
        }
        self.set_state(RunState::Monitoring);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<NormalizedEvent>();
        self.stream.on_event(LISTENER_ID, move |event| {
            events_tx
                .send(event.clone())
                .map_err(|_| anyhow::anyhow!("orchestrator no longer receiving events"))
        });

        let (stream_started, prebuilt) = tokio::join!(
            self.stream.start_stream(&self.config.target_program),
            self.prebuild(),
        );
        stream_started?;
        match prebuilt {
            Ok(_) => {}
            Err(e) if e.is_retryable() => warn!(
                category = e.category(),
                error = %e,
                "Prebuild failed, continuing to monitor; will retry at trigger time"
            ),
            Err(e) => return Err(RaceError::Prebuild(e.to_string())),
        }

        let refresh = self.spawn_anchor_refresh();
        let _refresh_guard = scopeguard::guard(refresh, |handle| handle.abort());

        let (exec_tx, mut exec_rx) = mpsc::unbounded_channel::<ExecutionOutcome>();
        // Cloned from the construction-time receiver so a shutdown requested
        // before `run` is still observed
        let mut shutdown_rx = self.shutdown_rx.clone();
        let deadline = self.config.max_monitoring.map(|limit| {
            (limit, tokio::time::Instant::now() + limit)
        });
        let mut deadline_passed = false;

        info!(
            program = %self.config.target_program,
            kind = %self.config.target_kind,
            target_id = ?self.config.target_id,
            "Monitoring for trigger"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested");
                        return self.shut_down(&mut exec_rx).await;
                    }
                }

                Some(outcome) = exec_rx.recv() => {
                    match outcome {
                        Ok(result) => return Ok(result),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            if let Some((limit, _)) = deadline.filter(|_| deadline_passed) {
                                warn!(error = %e, "Transient failure after monitoring deadline");
                                return Err(RaceError::Timeout(limit));
                            }
                            warn!(error = %e, "Transient failure, resuming monitoring");
                            self.set_state(RunState::Monitoring);
                        }
                    }
                }

                Some(event) = events_rx.recv() => {
                    self.handle_event(event, &exec_tx);
                }

                _ = sleep_until(deadline.map(|(_, at)| at)), if !deadline_passed => {
                    deadline_passed = true;
                    let limit = deadline.map(|(limit, _)| limit).unwrap_or_default();
                    if self.state() == RunState::Monitoring {
                        return Err(RaceError::Timeout(limit));
                    }
                    info!("Monitoring deadline passed during execution, waiting for its outcome");
                }
            }
        }
    }

    /// Stop listening and let any in-flight execution finish on its own
    async fn shut_down(
        &self,
        exec_rx: &mut mpsc::UnboundedReceiver<ExecutionOutcome>,
    ) -> Result<ExecutionResult, RaceError> {
        self.stream.stop();
        if self.state() != RunState::Executing {
            return Err(RaceError::Shutdown);
        }
        info!("Waiting for in-flight submission to settle");
        match exec_rx.recv().await {
            Some(Ok(result)) => Ok(result),
            Some(Err(e)) if e.is_fatal() => Err(e),
            _ => Err(RaceError::Shutdown),
        }
    }

    fn handle_event(
        self: &Arc<Self>,
        event: NormalizedEvent,
        exec_tx: &mpsc::UnboundedSender<ExecutionOutcome>,
    ) {
        let decision = detector::evaluate(
            &event,
            self.config.target_kind,
            self.config.target_id.as_deref(),
        );
        let correlation_id = match decision {
            TriggerDecision::Ignore(reason) => {
                metrics().events_ignored.inc();
                debug!(signature = %event.id, slot = event.ordering_index, reason = ?reason, "Event ignored");
                return;
            }
            TriggerDecision::Fire { correlation_id } => correlation_id,
        };

        if !self.try_begin_execution() {
            debug!(signature = %event.id, state = ?self.state(), "Trigger ignored, run not monitoring");
            return;
        }
        metrics().triggers_detected.inc();
        info!(
            signature = %event.id,
            slot = event.ordering_index,
            correlation_id = ?correlation_id,
            "Trigger detected"
        );

        let this = Arc::clone(self);
        let exec_tx = exec_tx.clone();
        tokio::spawn(
            async move {
                let outcome = this.execute().await;
                let _ = exec_tx.send(outcome);
            }
            .instrument(tracing::Span::current()),
        );
    }

    async fn prebuild(&self) -> Result<Arc<PreparedSet>, TransactionBuilderError> {
        let set = self.prebuilder.prebuild(&self.params).await?;
        Ok(self.cache.store(set))
    }

    /// Cached payloads, building them now if the early prebuild failed
    async fn prepared(&self) -> Result<Arc<PreparedSet>, RaceError> {
        if let Some(set) = self.cache.get() {
            return Ok(set);
        }
        info!("No cached payloads, building at trigger time");
        self.prebuild()
            .await
            .map_err(|e| RaceError::Prebuild(e.to_string()))
    }

    async fn execute(&self) -> ExecutionOutcome {
        let payloads = self.prepared().await?;

        let claim_signature = if self.config.skip_claim {
            None
        } else {
            Some(self.claim_once(&payloads).await?)
        };

        match self.executor.submit(&payloads.create).await {
            Ok(signature) => Ok(ExecutionResult::new(
                &signature,
                PayloadKind::CreateResource,
                claim_signature.as_ref(),
                &payloads.create.derived_addresses,
            )),
            Err(err) if err.failure == SubmissionFailure::ResourceAlreadyInitialized => {
                warn!(error = %err.message, "Resource already exists, taking fallback path");
                self.fallback(&payloads, claim_signature).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn claim_once(&self, payloads: &PreparedSet) -> Result<Signature, RaceError> {
        let confirmed = *self.claim_signature.lock();
        if let Some(signature) = confirmed {
            debug!(signature = %signature, "Claim already confirmed this run, skipping");
            return Ok(signature);
        }
        let signature = self.executor.submit(&payloads.claim).await?;
        *self.claim_signature.lock() = Some(signature);
        Ok(signature)
    }

    /// Deposit into the existing resource, sized from its current reserves
    async fn fallback(
        &self,
        payloads: &PreparedSet,
        claim_signature: Option<Signature>,
    ) -> ExecutionOutcome {
        metrics().fallbacks_taken.inc();
        let kind = PayloadKind::AddToExistingResource;
        let existing = &payloads.create.derived_addresses;

        let no_fallback = |reason: String| {
            RaceError::FatalSubmission(SubmissionError::with_failure(
                kind,
                SubmissionFailure::ResourceAlreadyInitialized,
                reason,
            ))
        };
        if let Some(resource) = existing.get(RESOURCE_ACCOUNT) {
            let exists = self.rpc.account_exists(resource).await.map_err(|e| {
                RaceError::TransientSubmission(SubmissionError::with_failure(
                    kind,
                    SubmissionFailure::Transient,
                    format!("resource lookup failed: {:#}", e),
                ))
            })?;
            if !exists {
                // The conflict was on some other account; the create may still land later
                return Err(RaceError::TransientSubmission(SubmissionError::with_failure(
                    kind,
                    SubmissionFailure::Transient,
                    format!("resource {} reported initialized but not found", resource),
                )));
            }
        }

        let (reserve_a, reserve_b) = match (existing.get(RESERVE_A), existing.get(RESERVE_B)) {
            (Some(a), Some(b)) => (*a, *b),
            _ => {
                return Err(no_fallback(
                    "resource exists and its reserves are unknown".to_string(),
                ))
            }
        };

        let (balance_a, balance_b) = tokio::try_join!(
            self.rpc.token_balance(&reserve_a),
            self.rpc.token_balance(&reserve_b),
        )
        .map_err(|e| {
            RaceError::TransientSubmission(SubmissionError::with_failure(
                kind,
                SubmissionFailure::Transient,
                format!("reserve query failed: {:#}", e),
            ))
        })?;
        info!(reserve_a = balance_a, reserve_b = balance_b, "Existing resource reserves");

        let deposit = proportional_deposit(
            self.params.amount_a,
            self.params.amount_b,
            balance_a,
            balance_b,
        )
        .ok_or_else(|| {
            no_fallback(format!(
                "existing resource has no usable liquidity ({} / {})",
                balance_a, balance_b
            ))
        })?;
        debug!(amount_a = deposit.amount_a, amount_b = deposit.amount_b, "Proportional deposit");

        let payload = self
            .prebuilder
            .build_fallback(&self.params, &deposit, existing)
            .await
            .map_err(|e| RaceError::Prebuild(e.to_string()))?;
        let signature = self.executor.submit(&payload).await?;
        Ok(ExecutionResult::new(
            &signature,
            kind,
            claim_signature.as_ref(),
            &payload.derived_addresses,
        ))
    }

    /// Periodic RPC refresh of the anchor, as a safety net for sparse stream metadata
    fn spawn_anchor_refresh(&self) -> JoinHandle<()> {
        let rpc = Arc::clone(&self.rpc);
        let freshness = Arc::clone(&self.freshness);
        let period = self.config.anchor_refresh;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match rpc.latest_anchor().await {
                    Ok(anchor) => {
                        if freshness.set(anchor) {
                            metrics().anchor_refresh_rpc.inc();
                        }
                    }
                    Err(e) => warn!(error = %e, "Periodic anchor refresh failed"),
                }
            }
        })
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
