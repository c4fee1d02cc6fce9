//! Freshness cache for the submission anchor (recent blockhash)
//!
//! Holds exactly one anchor process-wide. Writers race from two sources (stream
//! block metadata and the periodic RPC refresh); ordering is by validity
//! ceiling, never by arrival order, so a late frame can't regress the cache.

use parking_lot::RwLock;
use solana_sdk::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Blockhashes stay valid for this many blocks after the block that produced them
pub const MAX_PROCESSING_AGE: u64 = 150;

/// Where an anchor came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorSource {
    Stream,
    Rpc,
}

/// Recent blockhash plus the last block height at which it is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessAnchor {
    pub token: Hash,
    pub validity_ceiling: u64,
    pub captured_at: Instant,
    pub source: AnchorSource,
}

impl FreshnessAnchor {
    pub fn new(token: Hash, validity_ceiling: u64, source: AnchorSource) -> Self {
        Self {
            token,
            validity_ceiling,
            captured_at: Instant::now(),
            source,
        }
    }

    /// Anchor derived from a block's own hash and height
    pub fn from_block(blockhash: Hash, block_height: u64) -> Self {
        Self::new(
            blockhash,
            block_height.saturating_add(MAX_PROCESSING_AGE),
            AnchorSource::Stream,
        )
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Single-writer-wins-by-height anchor cell
#[derive(Debug, Default)]
pub struct FreshnessCache {
    current: RwLock<Option<FreshnessAnchor>>,
}

impl FreshnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current anchor unless the incoming ceiling is lower.
    ///
    /// Returns `true` if the anchor was stored.
    pub fn set(&self, anchor: FreshnessAnchor) -> bool {
        let mut guard = self.current.write();
        if let Some(existing) = guard.as_ref() {
            if anchor.validity_ceiling < existing.validity_ceiling {
                trace!(
                    incoming = anchor.validity_ceiling,
                    stored = existing.validity_ceiling,
                    "Rejected stale anchor"
                );
                return false;
            }
        }
        debug!(
            blockhash = %anchor.token,
            ceiling = anchor.validity_ceiling,
            source = ?anchor.source,
            "Updated anchor"
        );
        *guard = Some(anchor);
        true
    }

    pub fn get(&self) -> Option<FreshnessAnchor> {
        *self.current.read()
    }

    /// Elapsed time since capture; `Duration::MAX` when absent
    pub fn age(&self) -> Duration {
        self.current
            .read()
            .as_ref()
            .map(FreshnessAnchor::age)
            .unwrap_or(Duration::MAX)
    }

    /// Current anchor if younger than `staleness_bound`
    pub fn get_fresh(&self, staleness_bound: Duration) -> Option<FreshnessAnchor> {
        self.get().filter(|anchor| anchor.age() < staleness_bound)
    }
}
