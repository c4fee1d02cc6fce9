//! Error types for payload construction
//!
//! Errors are designed to be:
//! - Informative: carry the program/template that failed
//! - Composable: external constructors can wrap `anyhow` errors
//! - Observable: `category()` feeds logs and metrics

use thiserror::Error;

/// Error type for all payload construction operations
#[derive(Error, Debug)]
pub enum TransactionBuilderError {
    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program ID that failed to build an instruction
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// Instruction template is malformed or references unknown placeholders
    #[error("Template error: {0}")]
    Template(String),

    /// A logical address the payload depends on was not provided
    #[error("Missing address: {0}")]
    MissingAddress(String),

    /// Amounts are zero, overflow, or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Configuration or validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wrapped error from an external constructor
    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl TransactionBuilderError {
    /// Check if this error is potentially retryable
    ///
    /// Returns `true` if retrying later (e.g. once the trigger has fired and
    /// on-chain state exists) might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Accounts and amounts may only become valid after the trigger
            Self::MissingAddress(_) => true,
            Self::InvalidAmount(_) => true,
            Self::External(_) => true,

            Self::InstructionBuild { .. } => false,
            Self::Template(_) => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstructionBuild { .. } => "instruction",
            Self::Template(_) => "template",
            Self::MissingAddress(_) => "address",
            Self::InvalidAmount(_) => "amount",
            Self::Configuration(_) => "config",
            Self::External(_) => "external",
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn template(reason: impl Into<String>) -> Self {
        Self::Template(reason.into())
    }

    pub fn missing_address(name: impl Into<String>) -> Self {
        Self::MissingAddress(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::InstructionBuild {
            program: "launch_program".to_string(),
            reason: "invalid accounts".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=launch_program): invalid accounts"
        );
        assert_eq!(
            TransactionBuilderError::missing_address("reserveA").to_string(),
            "Missing address: reserveA"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(TransactionBuilderError::MissingAddress("x".into()).is_retryable());
        assert!(TransactionBuilderError::InvalidAmount("x".into()).is_retryable());
        assert!(!TransactionBuilderError::template("bad").is_retryable());
        assert!(!TransactionBuilderError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(TransactionBuilderError::template("x").category(), "template");
        assert_eq!(
            TransactionBuilderError::from(anyhow::anyhow!("upstream")).category(),
            "external"
        );
    }
}
