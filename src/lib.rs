//! Launch racer library
//!
//! Watches a launch program for its completion event and races to submit a
//! pre-built claim + create-resource payload the moment it is observed,
//! falling back to a proportional deposit when the resource already exists.

pub mod config;
pub mod detector;
pub mod errors;
pub mod executor;
pub mod freshness;
pub mod metrics;
pub mod race_engine;
pub mod rpc;
pub mod streaming;
pub mod tx_builder;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use config::{Config, RaceConfig};
pub use errors::{RaceError, SubmissionError, SubmissionFailure};
pub use race_engine::{Orchestrator, ShutdownHandle};
pub use types::{ExecutionResult, InstructionKind, NormalizedEvent, PayloadKind, RunState};
