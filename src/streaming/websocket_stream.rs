//! WebSocket streaming implementation for real-time Solana data
//!
//! Uses the native Solana pubsub API (or enhanced providers such as Helius,
//! QuickNode, Triton that accept an access token in the URL). Three
//! subscriptions feed one frame channel:
//! - `logsSubscribe` mentioning the filter address -> transaction frames
//! - `slotSubscribe` -> slot notices
//! - `blockSubscribe` (optional; not every node enables it) -> block metadata
//!   carrying the blockhash used to refresh the anchor opportunistically

use super::{RawBlockMeta, RawFrame, RawSlot, RawTransaction, StreamSource, StreamUpdate};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{
    RpcBlockSubscribeConfig, RpcBlockSubscribeFilter, RpcTransactionLogsConfig,
    RpcTransactionLogsFilter,
};
use solana_client::rpc_response::{Response, RpcBlockUpdate, RpcLogsResponse, SlotInfo};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_transaction_status::TransactionDetails;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// WebSocket stream source
pub struct WebSocketStream {
    ws_url: String,
    access_token: Option<String>,
    commitment: CommitmentConfig,
    subscribe_blocks: bool,
}

impl WebSocketStream {
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url,
            access_token: None,
            commitment: CommitmentConfig::confirmed(),
            subscribe_blocks: true,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn with_block_subscription(mut self, enabled: bool) -> Self {
        self.subscribe_blocks = enabled;
        self
    }

    /// Endpoint URL with the access token appended as `api-key`
    pub fn authorized_url(&self) -> String {
        match &self.access_token {
            Some(token) => {
                let separator = if self.ws_url.contains('?') { '&' } else { '?' };
                format!("{}{}api-key={}", self.ws_url, separator, token)
            }
            None => self.ws_url.clone(),
        }
    }

    async fn pump(
        client: Arc<PubsubClient>,
        filter: Pubkey,
        commitment: CommitmentConfig,
        subscribe_blocks: bool,
        tx: mpsc::UnboundedSender<StreamUpdate>,
        ready: oneshot::Sender<anyhow::Result<()>>,
    ) {
        let (mut logs, logs_unsubscribe) = match client
            .logs_subscribe(
                RpcTransactionLogsFilter::Mentions(vec![filter.to_string()]),
                RpcTransactionLogsConfig {
                    commitment: Some(commitment),
                },
            )
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let _ = ready.send(Err(anyhow!("logs subscription for {} failed: {}", filter, e)));
                return;
            }
        };

        let (mut slots, slots_unsubscribe) = match client.slot_subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                logs_unsubscribe().await;
                let _ = ready.send(Err(anyhow!("slot subscription failed: {}", e)));
                return;
            }
        };

        let mut blocks = if subscribe_blocks {
            let config = RpcBlockSubscribeConfig {
                commitment: Some(commitment),
                transaction_details: Some(TransactionDetails::None),
                show_rewards: Some(false),
                max_supported_transaction_version: Some(0),
                ..Default::default()
            };
            match client
                .block_subscribe(RpcBlockSubscribeFilter::All, Some(config))
                .await
            {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!(error = %e, "Block subscription unavailable, anchors come from RPC only");
                    None
                }
            }
        } else {
            None
        };

        let _ = ready.send(Ok(()));
        debug!(filter = %filter, "Pubsub subscriptions live");

        loop {
            tokio::select! {
                msg = logs.next() => match msg {
                    Some(response) => {
                        if tx.send(StreamUpdate::Frame(transaction_frame(response))).is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = tx.send(StreamUpdate::Error("logs subscription closed".into()));
                        break;
                    }
                },
                msg = slots.next() => match msg {
                    Some(info) => {
                        if tx.send(StreamUpdate::Frame(slot_frame(info))).is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = tx.send(StreamUpdate::Error("slot subscription closed".into()));
                        break;
                    }
                },
                msg = next_optional(blocks.as_mut().map(|(stream, _)| stream)) => match msg {
                    Some(response) => {
                        if tx.send(StreamUpdate::Frame(block_frame(response))).is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!("Block subscription closed, continuing without it");
                        blocks = None;
                    }
                },
                _ = tx.closed() => {
                    debug!("Frame receiver dropped, unsubscribing");
                    break;
                }
            }
        }

        logs_unsubscribe().await;
        slots_unsubscribe().await;
        if let Some((_, unsubscribe)) = blocks {
            unsubscribe().await;
        }
        // client is dropped here when the task ends
    }
}

#[async_trait]
impl StreamSource for WebSocketStream {
    fn endpoint(&self) -> &str {
        &self.ws_url
    }

    async fn subscribe(
        &self,
        filter: Pubkey,
        tx: mpsc::UnboundedSender<StreamUpdate>,
    ) -> anyhow::Result<()> {
        info!(url = %self.ws_url, "Connecting to WebSocket");
        let client = PubsubClient::new(&self.authorized_url())
            .await
            .with_context(|| format!("WebSocket handshake with {} failed", self.ws_url))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Self::pump(
            Arc::new(client),
            filter,
            self.commitment,
            self.subscribe_blocks,
            tx,
            ready_tx,
        ));

        ready_rx
            .await
            .map_err(|_| anyhow!("subscription task exited before becoming ready"))?
    }
}

async fn next_optional<S>(stream: Option<&mut S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

fn transaction_frame(response: Response<RpcLogsResponse>) -> RawFrame {
    let Response { context, value } = response;
    RawFrame::Transaction(RawTransaction {
        signature: Some(value.signature),
        slot: Some(context.slot),
        // logsSubscribe doesn't carry account keys
        account_keys: None,
        log_messages: Some(value.logs),
        err: None,
        failed: Some(value.err.is_some()),
    })
}

fn slot_frame(info: SlotInfo) -> RawFrame {
    RawFrame::Slot(RawSlot {
        slot: info.slot,
        parent: Some(info.parent),
    })
}

fn block_frame(response: Response<RpcBlockUpdate>) -> RawFrame {
    let update = response.value;
    let (blockhash, block_height) = match update.block {
        Some(block) => (Some(block.blockhash), block.block_height),
        None => (None, None),
    };
    RawFrame::BlockMeta(RawBlockMeta {
        slot: update.slot,
        blockhash,
        block_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_url() {
        let stream = WebSocketStream::new("wss://mainnet.helius-rpc.com".into());
        assert_eq!(stream.authorized_url(), "wss://mainnet.helius-rpc.com");

        let stream = stream.with_access_token(Some("abc".into()));
        assert_eq!(stream.authorized_url(), "wss://mainnet.helius-rpc.com?api-key=abc");

        let stream = WebSocketStream::new("wss://node.example/ws?x=1".into())
            .with_access_token(Some("abc".into()));
        assert_eq!(stream.authorized_url(), "wss://node.example/ws?x=1&api-key=abc");

        let stream = WebSocketStream::new("wss://node.example".into())
            .with_access_token(Some(String::new()));
        assert_eq!(stream.authorized_url(), "wss://node.example");
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_websocket_subscription() {
        let stream = WebSocketStream::new("wss://api.devnet.solana.com".into())
            .with_block_subscription(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let program = Pubkey::new_from_array([6u8; 32]);
        stream.subscribe(program, tx).await.expect("subscribe");
        let update = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv()).await;
        assert!(update.is_ok());
    }

    #[test]
    fn test_endpoint() {
        let stream = WebSocketStream::new("wss://api.devnet.solana.com".into());
        assert_eq!(stream.endpoint(), "wss://api.devnet.solana.com");
    }
}
