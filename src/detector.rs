//! Trigger detection over normalized events
//!
//! Pure and stateless: classification scans log lines for fixed,
//! case-insensitive substrings, one list per instruction kind, checked in
//! priority order. Correlation ids come from an ordered list of regex
//! extractors; the first hit across all lines wins.

use crate::types::{InstructionKind, NormalizedEvent};
use once_cell::sync::Lazy;
use regex::Regex;

/// Pattern lists in priority order. Patterns are lowercase.
const KIND_PATTERNS: &[(InstructionKind, &[&str])] = &[
    (
        InstructionKind::CompleteLaunch,
        &[
            "instruction: completelaunch",
            "instruction: complete_launch",
            "instruction: finalizelaunch",
            "launch completed",
        ],
    ),
    (
        InstructionKind::InitializeLaunch,
        &[
            "instruction: initializelaunch",
            "instruction: initialize_launch",
            "instruction: createlaunch",
        ],
    ),
    (
        InstructionKind::Contribute,
        &["instruction: contribute", "instruction: deposit"],
    ),
    (
        InstructionKind::Claim,
        &["instruction: claim", "instruction: claimtokens"],
    ),
    (
        InstructionKind::Withdraw,
        &["instruction: withdraw", "instruction: refund"],
    ),
    (
        InstructionKind::CreatePool,
        &[
            "instruction: initializepool",
            "instruction: createpool",
            "instruction: initialize_pool",
        ],
    ),
    (
        InstructionKind::AddLiquidity,
        &["instruction: addliquidity", "instruction: add_liquidity"],
    ),
];

/// Base58 public key body
const BASE58_TOKEN: &str = r"([1-9A-HJ-NP-Za-km-z]{32,44})";

static CORRELATION_EXTRACTORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\blaunch(?:[ _]?id)?\s*[:=]\s*",
        r"(?i)\bpresale(?:[ _]?id)?\s*[:=]\s*",
        r"(?i)\bsale(?:[ _]?id)?\s*[:=]\s*",
        r"(?i)\bmint\s*[:=]\s*",
    ]
    .iter()
    .map(|prefix| {
        Regex::new(&format!("{}{}", prefix, BASE58_TOKEN)).expect("static correlation regex")
    })
    .collect()
});

/// Classify an event against the instruction vocabulary.
///
/// Total and deterministic: returns `Unknown` when nothing matches.
pub fn classify(event: &NormalizedEvent) -> InstructionKind {
    let lowered: Vec<String> = event.log_lines.iter().map(|l| l.to_lowercase()).collect();
    KIND_PATTERNS
        .iter()
        .find(|(_, patterns)| {
            lowered
                .iter()
                .any(|line| patterns.iter().any(|p| line.contains(p)))
        })
        .map(|(kind, _)| *kind)
        .unwrap_or(InstructionKind::Unknown)
}

/// Extract the correlated launch identifier, if the logs carry one
pub fn extract_correlation_id(event: &NormalizedEvent) -> Option<String> {
    event.log_lines.iter().find_map(|line| {
        CORRELATION_EXTRACTORS
            .iter()
            .find_map(|re| re.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Why an event did not fire the trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    KindMismatch(InstructionKind),
    FailedTransaction,
    CorrelationMismatch(String),
}

/// Decision for one event against the configured target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Matches the target; the correlation id is advisory and may be absent
    Fire { correlation_id: Option<String> },
    Ignore(IgnoreReason),
}

/// Evaluate an event against the target kind and optional target id.
///
/// Fails open on correlation: an event whose id can't be extracted still
/// fires, only a present-and-different id rejects it.
pub fn evaluate(
    event: &NormalizedEvent,
    target_kind: InstructionKind,
    target_id: Option<&str>,
) -> TriggerDecision {
    let kind = classify(event);
    if kind != target_kind {
        return TriggerDecision::Ignore(IgnoreReason::KindMismatch(kind));
    }
    if event.failed {
        return TriggerDecision::Ignore(IgnoreReason::FailedTransaction);
    }
    let correlation_id = extract_correlation_id(event);
    if let (Some(found), Some(expected)) = (correlation_id.as_deref(), target_id) {
        if found != expected {
            return TriggerDecision::Ignore(IgnoreReason::CorrelationMismatch(found.to_string()));
        }
    }
    TriggerDecision::Fire { correlation_id }
}
