//! Submission executor
//!
//! Stamps a prepared payload with the freshest anchor, signs it and transmits
//! it with a per-kind policy:
//! - claim / add-to-existing: simulate first, then send with preflight, retried
//!   with backoff on transient failures
//! - create resource: no simulation, `skip_preflight`, zero node retries; a
//!   doomed submission only shows up at confirmation
//!
//! A submission whose confirmation timed out may still land. Its signature is
//! kept as unresolved and re-queried before the same kind is sent again and
//! after any later failure of that kind, so a late landing counts as the
//! success instead of being duplicated.

use crate::errors::{ExponentialBackoff, SubmissionError, SubmissionFailure};
use crate::freshness::{FreshnessAnchor, FreshnessCache};
use crate::metrics::{metrics, Timer};
use crate::rpc::{Confirmation, LedgerRpc, SendOptions};
use crate::streaming::StreamHealth;
use crate::tx_builder::PreparedPayload;
use crate::types::PayloadKind;
use parking_lot::Mutex;
use solana_sdk::{
    message::Message,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs for the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitPolicy {
    /// Cached anchors at least this old are replaced by a direct fetch
    pub staleness_bound: Duration,
    /// Extra attempts for validated (claim-like) submissions
    pub claim_retries: u32,
    pub confirm_timeout: Duration,
    /// Wait when re-querying an earlier, unresolved signature
    pub recheck_timeout: Duration,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            staleness_bound: Duration::from_secs(5),
            claim_retries: 3,
            confirm_timeout: Duration::from_secs(30),
            recheck_timeout: Duration::from_secs(2),
            backoff_initial_ms: 200,
            backoff_max_ms: 2_000,
        }
    }
}

/// How one payload kind is transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KindPolicy {
    simulate: bool,
    send: SendOptions,
    attempts: u32,
}

impl SubmitPolicy {
    fn for_kind(&self, kind: PayloadKind) -> KindPolicy {
        match kind {
            PayloadKind::CreateResource => KindPolicy {
                simulate: false,
                send: SendOptions::latency_critical(),
                attempts: 1,
            },
            PayloadKind::Claim | PayloadKind::AddToExistingResource => KindPolicy {
                simulate: true,
                send: SendOptions::validated(),
                attempts: self.claim_retries.saturating_add(1),
            },
        }
    }
}

pub struct SubmissionExecutor {
    rpc: Arc<dyn LedgerRpc>,
    freshness: Arc<FreshnessCache>,
    stream_health: StreamHealth,
    payer: Arc<Keypair>,
    policy: SubmitPolicy,
    /// Transmitted signatures whose outcome is still unknown
    unresolved: Mutex<HashMap<PayloadKind, Vec<Signature>>>,
}

impl SubmissionExecutor {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        freshness: Arc<FreshnessCache>,
        stream_health: StreamHealth,
        payer: Arc<Keypair>,
        policy: SubmitPolicy,
    ) -> Self {
        Self {
            rpc,
            freshness,
            stream_health,
            payer,
            policy,
            unresolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn payer(&self) -> &Keypair {
        &self.payer
    }

    /// Freshest usable anchor.
    ///
    /// The cached anchor is trusted only while the stream is live and the
    /// anchor is younger than the staleness bound; otherwise it is fetched
    /// synchronously and written back to the cache.
    pub async fn resolve_anchor(
        &self,
        kind: PayloadKind,
    ) -> Result<FreshnessAnchor, SubmissionError> {
        if self.stream_health.is_active() {
            if let Some(anchor) = self.freshness.get_fresh(self.policy.staleness_bound) {
                debug!(%kind, age_ms = anchor.age().as_millis() as u64, "Using cached anchor");
                return Ok(anchor);
            }
        }

        metrics().anchor_direct_fetches.inc();
        let anchor = self.rpc.latest_anchor().await.map_err(|e| {
            SubmissionError::with_failure(
                kind,
                SubmissionFailure::Transient,
                format!("anchor fetch failed: {:#}", e),
            )
        })?;
        debug!(%kind, blockhash = %anchor.token, "Fetched anchor directly");
        self.freshness.set(anchor);
        Ok(anchor)
    }

    /// Stamp and sign with the payer plus every required signer
    pub fn sign(
        &self,
        payload: &PreparedPayload,
        anchor: &FreshnessAnchor,
    ) -> Result<Transaction, SubmissionError> {
        let message = Message::new_with_blockhash(
            &payload.instructions,
            Some(&self.payer.pubkey()),
            &anchor.token,
        );
        let mut tx = Transaction::new_unsigned(message);
        let mut signers: Vec<&dyn Signer> = Vec::with_capacity(1 + payload.required_signers.len());
        signers.push(&*self.payer);
        signers.extend(
            payload
                .required_signers
                .iter()
                .map(|signer| &**signer as &dyn Signer),
        );
        tx.try_sign(&signers, anchor.token).map_err(|e| {
            SubmissionError::with_failure(
                payload.kind,
                SubmissionFailure::Transient,
                format!("signing failed: {}", e),
            )
        })?;
        Ok(tx)
    }

    /// Signatures of `kind` sent earlier whose outcome is still unknown
    pub fn unresolved(&self, kind: PayloadKind) -> Vec<Signature> {
        self.unresolved.lock().get(&kind).cloned().unwrap_or_default()
    }

    /// Submit and wait for confirmation. Returns the confirmed signature,
    /// which may belong to an earlier submission of the same kind that
    /// landed after its confirmation timed out.
    pub async fn submit(&self, payload: &PreparedPayload) -> Result<Signature, SubmissionError> {
        let kind = payload.kind;
        let policy = self.policy.for_kind(kind);
        let mut backoff =
            ExponentialBackoff::new(self.policy.backoff_initial_ms, self.policy.backoff_max_ms);
        let timer = Timer::new();

        let mut attempt = 0;
        let result = match self.settle_unresolved(kind).await {
            Some(signature) => Ok(signature),
            None => loop {
                attempt += 1;
                let err = match self.attempt(payload, policy).await {
                    Ok(signature) => break Ok(signature),
                    Err(err) => err,
                };
                // "Already claimed" or "already in use" may be our own earlier attempt
                if let Some(signature) = self.settle_unresolved(kind).await {
                    break Ok(signature);
                }
                if err.failure != SubmissionFailure::Transient || attempt >= policy.attempts {
                    break Err(err);
                }
                let delay = backoff.next_backoff();
                warn!(
                    %kind,
                    attempt,
                    max_attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err.message,
                    "Submission attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
        };

        match &result {
            Ok(signature) => {
                self.unresolved.lock().remove(&kind);
                timer.observe_submission(kind.as_str());
                metrics()
                    .submissions_ok
                    .with_label_values(&[kind.as_str()])
                    .inc();
                info!(%kind, signature = %signature, attempts = attempt, "Submission confirmed");
            }
            Err(err) => {
                metrics()
                    .submissions_failed
                    .with_label_values(&[kind.as_str()])
                    .inc();
                warn!(%kind, failure = ?err.failure, error = %err.message, "Submission failed");
            }
        }
        result
    }

    async fn attempt(
        &self,
        payload: &PreparedPayload,
        policy: KindPolicy,
    ) -> Result<Signature, SubmissionError> {
        let kind = payload.kind;
        let anchor = self.resolve_anchor(kind).await?;
        let tx = self.sign(payload, &anchor)?;

        if policy.simulate {
            match self.rpc.simulate(&tx).await {
                Ok(None) => {}
                Ok(Some(reason)) => return Err(SubmissionError::classified(kind, reason)),
                Err(e) => {
                    return Err(SubmissionError::classified(
                        kind,
                        format!("simulation request failed: {:#}", e),
                    ))
                }
            }
        }

        let signature = self
            .rpc
            .send(&tx, policy.send)
            .await
            .map_err(|e| SubmissionError::classified(kind, format!("{:#}", e)))?;
        debug!(%kind, signature = %signature, "Submission transmitted");

        let message = match self
            .rpc
            .confirm(&signature, self.policy.confirm_timeout)
            .await
        {
            Ok(Confirmation::Confirmed) => return Ok(signature),
            Ok(Confirmation::Failed(reason)) => {
                return Err(SubmissionError::classified(kind, reason))
            }
            Ok(Confirmation::TimedOut) => format!(
                "{} not confirmed within {:?}",
                signature, self.policy.confirm_timeout
            ),
            Err(e) => format!("confirmation of {} failed: {:#}", signature, e),
        };
        let mut unresolved = self.unresolved.lock();
        let pending = unresolved.entry(kind).or_default();
        // A resend under the same anchor repeats the signature
        if !pending.contains(&signature) {
            pending.push(signature);
        }
        drop(unresolved);
        Err(SubmissionError::with_failure(
            kind,
            SubmissionFailure::Transient,
            message,
        ))
    }

    /// Re-query earlier signatures of `kind` whose outcome was unknown.
    ///
    /// Returns the first one found confirmed. Signatures found failed are
    /// dropped; the rest stay unresolved.
    async fn settle_unresolved(&self, kind: PayloadKind) -> Option<Signature> {
        for signature in self.unresolved(kind) {
            match self
                .rpc
                .confirm(&signature, self.policy.recheck_timeout)
                .await
            {
                Ok(Confirmation::Confirmed) => {
                    info!(%kind, signature = %signature, "Earlier submission landed after its confirmation timed out");
                    return Some(signature);
                }
                Ok(Confirmation::Failed(reason)) => {
                    debug!(%kind, signature = %signature, reason = %reason, "Earlier submission failed on-chain");
                    if let Some(pending) = self.unresolved.lock().get_mut(&kind) {
                        pending.retain(|s| *s != signature);
                    }
                }
                Ok(Confirmation::TimedOut) => {
                    debug!(%kind, signature = %signature, "Earlier submission still unresolved");
                }
                Err(e) => {
                    debug!(%kind, signature = %signature, error = %e, "Recheck of earlier submission failed");
                }
            }
        }
        None
    }
}
