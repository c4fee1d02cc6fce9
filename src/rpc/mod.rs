//! Ledger RPC access
//!
//! The racer consumes the RPC node as a plain request/response service. The
//! `LedgerRpc` trait is the seam: production code uses `SolanaRpc` over the
//! nonblocking `solana-client`, tests plug in-memory fakes.

mod solana;

pub use solana::SolanaRpc;

use crate::freshness::FreshnessAnchor;
use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::time::Duration;

/// Transmission options for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Skip the node's preflight simulation
    pub skip_preflight: bool,
    /// Node-side rebroadcast count; `None` leaves the node default
    pub max_retries: Option<usize>,
}

impl SendOptions {
    /// Fire-and-forget: no preflight, no node rebroadcast
    pub fn latency_critical() -> Self {
        Self {
            skip_preflight: true,
            max_retries: Some(0),
        }
    }

    pub fn validated() -> Self {
        Self {
            skip_preflight: false,
            max_retries: None,
        }
    }
}

/// Final state of a transmitted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// Landed but failed on-chain; carries the error and any program logs
    Failed(String),
    TimedOut,
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Latest blockhash with its last valid block height
    async fn latest_anchor(&self) -> anyhow::Result<FreshnessAnchor>;

    async fn account_exists(&self, address: &Pubkey) -> anyhow::Result<bool>;

    /// Raw token amount held by a token account
    async fn token_balance(&self, token_account: &Pubkey) -> anyhow::Result<u64>;

    /// Simulate a signed transaction. `Ok(None)` means it would succeed,
    /// `Ok(Some(reason))` carries the error and program logs.
    async fn simulate(&self, tx: &Transaction) -> anyhow::Result<Option<String>>;

    async fn send(&self, tx: &Transaction, options: SendOptions) -> anyhow::Result<Signature>;

    /// Poll until the signature reaches the configured commitment or `timeout` elapses
    async fn confirm(&self, signature: &Signature, timeout: Duration)
        -> anyhow::Result<Confirmation>;
}
