//! Error taxonomy for the racer and submission-failure classification

use crate::types::PayloadKind;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type surfaced by the core components
///
/// Every failure path in the racer ends in one of these variants, which
/// decides whether the run recovers (back to monitoring) or terminates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RaceError {
    /// Missing or invalid endpoint/target; fatal before monitoring begins
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stream handshake failed or the stream dropped mid-run
    #[error("Connection error: {0}")]
    Connection(String),

    /// Payload construction failed
    #[error("Prebuild error: {0}")]
    Prebuild(String),

    /// Submission failed but the trigger may still be actionable
    #[error("Transient submission error: {0}")]
    TransientSubmission(#[source] SubmissionError),

    /// Submission failed in a way that ends the run
    #[error("Fatal submission error: {0}")]
    FatalSubmission(#[source] SubmissionError),

    /// Monitoring exceeded its configured maximum duration
    #[error("Monitoring timed out after {0:?}")]
    Timeout(Duration),

    /// External shutdown before the run reached a terminal state
    #[error("Shutdown requested")]
    Shutdown,
}

impl RaceError {
    /// Whether this error terminates the run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TransientSubmission(_) | Self::Connection(_))
    }

    /// Error category for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config",
            Self::Connection(_) => "connection",
            Self::Prebuild(_) => "prebuild",
            Self::TransientSubmission(_) => "transient_submission",
            Self::FatalSubmission(_) => "fatal_submission",
            Self::Timeout(_) => "timeout",
            Self::Shutdown => "shutdown",
        }
    }

    /// Process exit code for a run that ended with this error
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl From<SubmissionError> for RaceError {
    fn from(err: SubmissionError) -> Self {
        if err.failure.is_fatal() {
            Self::FatalSubmission(err)
        } else {
            Self::TransientSubmission(err)
        }
    }
}

/// Classified cause of a failed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFailure {
    /// The allocation was already claimed
    AlreadyClaimed,
    /// The wallet has no contribution/participation record
    NoEligibleRecord,
    /// The resource address is already initialized (fallback candidate)
    ResourceAlreadyInitialized,
    /// Network, blockhash, rate-limit or otherwise unclassified failure
    Transient,
}

impl SubmissionFailure {
    // Checked in order; first match wins.
    const ALREADY_CLAIMED: &'static [&'static str] =
        &["already claimed", "alreadyclaimed", "claim already processed"];
    const NO_ELIGIBLE_RECORD: &'static [&'static str] = &[
        "no eligible",
        "noeligible",
        "not eligible",
        "no contribution",
        "nothing to claim",
    ];
    const RESOURCE_INITIALIZED: &'static [&'static str] = &[
        "already in use",
        "already initialized",
        "alreadyinitialized",
        "pool already exists",
    ];

    /// Classify a raw ledger error message (including any program logs)
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let hit = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

        if hit(Self::ALREADY_CLAIMED) {
            Self::AlreadyClaimed
        } else if hit(Self::NO_ELIGIBLE_RECORD) {
            Self::NoEligibleRecord
        } else if hit(Self::RESOURCE_INITIALIZED) {
            Self::ResourceAlreadyInitialized
        } else {
            Self::Transient
        }
    }

    /// Fatal failures end the run; `ResourceAlreadyInitialized` is recovered
    /// by the fallback path and is only fatal when no fallback exists.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AlreadyClaimed | Self::NoEligibleRecord)
    }
}

/// A failed submission with its classification
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} submission failed ({failure:?}): {message}")]
pub struct SubmissionError {
    pub kind: PayloadKind,
    pub failure: SubmissionFailure,
    pub message: String,
}

impl SubmissionError {
    /// Build an error, classifying the message
    pub fn classified(kind: PayloadKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            failure: SubmissionFailure::classify(&message),
            message,
        }
    }

    /// Build an error with an explicit classification
    pub fn with_failure(
        kind: PayloadKind,
        failure: SubmissionFailure,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            failure,
            message: message.into(),
        }
    }
}

/// Exponential backoff with jitter for retry logic
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current_attempt: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            current_attempt: 0,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Get the next backoff duration with jitter (±20%)
    pub fn next_backoff(&mut self) -> Duration {
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(self.current_attempt))
            .min(self.max_backoff_ms);

        self.current_attempt += 1;

        let jitter = backoff_ms / 5;
        if jitter == 0 {
            return Duration::from_millis(backoff_ms);
        }
        let low = backoff_ms - jitter;
        let high = backoff_ms + jitter;
        Duration::from_millis(fastrand::u64(low..=high))
    }
}
