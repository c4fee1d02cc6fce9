//! Common types used throughout the racer

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Transaction observed on the stream, normalized from a provider frame.
///
/// Immutable once constructed: the decode step fills every field, using
/// empty defaults where the raw frame was missing data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Transaction signature (base58)
    pub id: String,

    /// Slot the transaction landed in; monotonic per source
    pub ordering_index: u64,

    /// Account keys in message order
    pub account_list: Vec<String>,

    /// Program log lines in execution order
    pub log_lines: Vec<String>,

    /// Whether the transaction failed on-chain
    pub failed: bool,
}

impl NormalizedEvent {
    pub fn new(id: impl Into<String>, ordering_index: u64) -> Self {
        Self {
            id: id.into(),
            ordering_index,
            account_list: Vec::new(),
            log_lines: Vec::new(),
            failed: false,
        }
    }

    pub fn with_logs<I, S>(mut self, logs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_lines = logs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.account_list = accounts.into_iter().map(Into::into).collect();
        self
    }

    pub fn failed(mut self, failed: bool) -> Self {
        self.failed = failed;
        self
    }
}

/// Instruction vocabulary recognised by the trigger detector.
///
/// Declaration order is the detector's priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    CompleteLaunch,
    InitializeLaunch,
    Contribute,
    Claim,
    Withdraw,
    CreatePool,
    AddLiquidity,
    Unknown,
}

impl InstructionKind {
    pub const ALL: [InstructionKind; 8] = [
        Self::CompleteLaunch,
        Self::InitializeLaunch,
        Self::Contribute,
        Self::Claim,
        Self::Withdraw,
        Self::CreatePool,
        Self::AddLiquidity,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompleteLaunch => "CompleteLaunch",
            Self::InitializeLaunch => "InitializeLaunch",
            Self::Contribute => "Contribute",
            Self::Claim => "Claim",
            Self::Withdraw => "Withdraw",
            Self::CreatePool => "CreatePool",
            Self::AddLiquidity => "AddLiquidity",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("unknown instruction kind '{}'", s))
    }
}

/// Payload kinds the racer can submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Claim the allocation owed by the completed launch
    Claim,
    /// Create the resource (pool + position); the latency-critical leg
    CreateResource,
    /// Deposit into a resource somebody else already created
    AddToExistingResource,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::CreateResource => "create_resource",
            Self::AddToExistingResource => "add_to_existing_resource",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state of the orchestrator. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Monitoring = 1,
    Executing = 2,
    Completed = 3,
    Failed = 4,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome of a successful run, surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Signature of the resource-creating (or fallback deposit) submission
    pub submission_id: String,

    /// Which path produced the result
    pub path: PayloadKind,

    /// Signature of the claim leg, when one was submitted
    pub claim_submission_id: Option<String>,

    /// Addresses created by the winning payload (logical name -> address)
    pub created_addresses: BTreeMap<String, String>,

    /// Completion time (UTC)
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl ExecutionResult {
    pub fn new(
        submission_id: &Signature,
        path: PayloadKind,
        claim_submission_id: Option<&Signature>,
        created: &BTreeMap<String, Pubkey>,
    ) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            path,
            claim_submission_id: claim_submission_id.map(|s| s.to_string()),
            created_addresses: created
                .iter()
                .map(|(name, address)| (name.clone(), address.to_string()))
                .collect(),
            completed_at: chrono::Utc::now(),
        }
    }
}
