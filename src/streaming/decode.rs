//! Provider-neutral frame shape and the decode step into normalized events
//!
//! Every field of a raw frame is optional on the wire. Decoding never fails a
//! whole frame over a missing field: transaction frames fall back to empty
//! defaults, block frames without a hash simply don't yield an anchor.

use crate::freshness::FreshnessAnchor;
use crate::types::NormalizedEvent;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use std::str::FromStr;
use tracing::trace;

/// One frame from the streaming endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawFrame {
    BlockMeta(RawBlockMeta),
    Transaction(RawTransaction),
    Slot(RawSlot),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBlockMeta {
    #[serde(default)]
    pub slot: u64,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub block_height: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub account_keys: Option<Vec<String>>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
    /// On-chain error, any shape; non-null means the transaction failed
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    /// Explicit failure flag; takes precedence over `err`
    #[serde(default)]
    pub failed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSlot {
    pub slot: u64,
    #[serde(default)]
    pub parent: Option<u64>,
}

impl RawFrame {
    /// Parse a JSON-encoded frame
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Slot carried by the frame, if any
    pub fn slot(&self) -> Option<u64> {
        match self {
            Self::BlockMeta(meta) => Some(meta.slot),
            Self::Transaction(tx) => tx.slot,
            Self::Slot(slot) => Some(slot.slot),
        }
    }
}

impl RawTransaction {
    /// Normalize, substituting empty defaults for missing fields
    pub fn normalize(self) -> NormalizedEvent {
        let failed = self
            .failed
            .unwrap_or_else(|| self.err.as_ref().is_some_and(|e| !e.is_null()));
        NormalizedEvent {
            id: self.signature.unwrap_or_default(),
            ordering_index: self.slot.unwrap_or_default(),
            account_list: self.account_keys.unwrap_or_default(),
            log_lines: self.log_messages.unwrap_or_default(),
            failed,
        }
    }
}

impl RawBlockMeta {
    /// Anchor carried by this block, when both hash and height are present
    pub fn anchor(&self) -> Option<FreshnessAnchor> {
        let height = self.block_height?;
        let blockhash = self.blockhash.as_deref()?;
        match Hash::from_str(blockhash) {
            Ok(hash) => Some(FreshnessAnchor::from_block(hash, height)),
            Err(e) => {
                trace!(slot = self.slot, error = %e, "Unparseable blockhash in block frame");
                None
            }
        }
    }
}
