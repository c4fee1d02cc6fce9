//! `LedgerRpc` over the nonblocking solana RPC client

use super::{Confirmation, LedgerRpc, SendOptions};
use crate::freshness::{AnchorSource, FreshnessAnchor};
use anyhow::Context;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::{
    commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::{option_serializer::OptionSerializer, UiTransactionEncoding};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(400);

pub struct SolanaRpc {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl SolanaRpc {
    pub fn new(url: String, commitment: CommitmentConfig) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_commitment(url, commitment)),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    /// Program logs of a landed transaction, best effort
    async fn transaction_logs(&self, signature: &Signature) -> Vec<String> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        match self
            .client
            .get_transaction_with_config(signature, config)
            .await
        {
            Ok(tx) => match tx.transaction.meta.map(|meta| meta.log_messages) {
                Some(OptionSerializer::Some(logs)) => logs,
                _ => Vec::new(),
            },
            Err(e) => {
                debug!(signature = %signature, error = %e, "Could not fetch logs for failed transaction");
                Vec::new()
            }
        }
    }
}

fn with_logs(error: String, logs: &[String]) -> String {
    if logs.is_empty() {
        error
    } else {
        format!("{}; logs: {}", error, logs.join(" | "))
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    async fn latest_anchor(&self) -> anyhow::Result<FreshnessAnchor> {
        let (hash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .context("get_latest_blockhash failed")?;
        Ok(FreshnessAnchor::new(
            hash,
            last_valid_block_height,
            AnchorSource::Rpc,
        ))
    }

    async fn account_exists(&self, address: &Pubkey) -> anyhow::Result<bool> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .with_context(|| format!("get_account {} failed", address))?;
        Ok(response.value.is_some())
    }

    async fn token_balance(&self, token_account: &Pubkey) -> anyhow::Result<u64> {
        let balance = self
            .client
            .get_token_account_balance(token_account)
            .await
            .with_context(|| format!("get_token_account_balance {} failed", token_account))?;
        balance
            .amount
            .parse::<u64>()
            .with_context(|| format!("unparseable token amount '{}'", balance.amount))
    }

    async fn simulate(&self, tx: &Transaction) -> anyhow::Result<Option<String>> {
        let result = self
            .client
            .simulate_transaction(tx)
            .await
            .context("simulate_transaction failed")?;
        Ok(result.value.err.map(|err| {
            let logs = result.value.logs.unwrap_or_default();
            with_logs(err.to_string(), &logs)
        }))
    }

    async fn send(&self, tx: &Transaction, options: SendOptions) -> anyhow::Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: options.max_retries,
            ..Default::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        trace!(signature = %signature, "Transaction sent");
        Ok(signature)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> anyhow::Result<Confirmation> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.client.get_signature_statuses(&[*signature]).await {
                Ok(response) => {
                    if let Some(Some(status)) = response.value.into_iter().next() {
                        if let Some(err) = status.err {
                            let logs = self.transaction_logs(signature).await;
                            return Ok(Confirmation::Failed(with_logs(err.to_string(), &logs)));
                        }
                        if status.satisfies_commitment(self.commitment) {
                            return Ok(Confirmation::Confirmed);
                        }
                    }
                }
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Signature status query failed");
                }
            }

            if Instant::now() >= deadline {
                return Ok(Confirmation::TimedOut);
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}
