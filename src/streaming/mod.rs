//! Streaming data sources for real-time Solana monitoring
//!
//! A `StreamSource` opens one subscription filtered to a program/account and
//! pushes raw frames into a channel. The `EventStreamClient` owns that
//! subscription, decodes frames, feeds block metadata into the freshness cache
//! and fans normalized events out to registered listeners.

pub mod decode;

#[cfg(feature = "ws-stream")]
pub mod websocket_stream;

pub use decode::{RawBlockMeta, RawFrame, RawSlot, RawTransaction};

use crate::errors::RaceError;
use crate::freshness::FreshnessCache;
use crate::metrics::metrics;
use crate::types::NormalizedEvent;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Item pushed by a source into the client
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Frame(RawFrame),
    /// Stream-level failure; the source stops after sending it
    Error(String),
}

/// Unified streaming interface
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Endpoint this source connects to (empty when unconfigured)
    fn endpoint(&self) -> &str;

    /// Complete the handshake and start pushing updates into `tx`.
    ///
    /// Must return only after the subscription is live. The source stops once
    /// `tx` is closed; dropping the sender signals end of stream.
    async fn subscribe(
        &self,
        filter: Pubkey,
        tx: mpsc::UnboundedSender<StreamUpdate>,
    ) -> anyhow::Result<()>;
}

/// Callback invoked for every normalized event
pub type Listener = Arc<dyn Fn(&NormalizedEvent) -> anyhow::Result<()> + Send + Sync>;

/// Shared view of whether the stream is live
#[derive(Debug, Clone, Default)]
pub struct StreamHealth(Arc<AtomicBool>);

impl StreamHealth {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, active: bool) -> bool {
        self.0.swap(active, Ordering::AcqRel)
    }
}

/// Client holding exactly one live subscription
pub struct EventStreamClient {
    source: Arc<dyn StreamSource>,
    freshness: Arc<FreshnessCache>,
    listeners: Arc<RwLock<HashMap<String, Listener>>>,
    health: StreamHealth,
    last_slot: Arc<AtomicU64>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamClient {
    pub fn new(source: Arc<dyn StreamSource>, freshness: Arc<FreshnessCache>) -> Self {
        Self {
            source,
            freshness,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            health: StreamHealth::default(),
            last_slot: Arc::new(AtomicU64::new(0)),
            pump: Mutex::new(None),
        }
    }

    /// Open the subscription. Non-blocking: events arrive via listeners.
    pub async fn start_stream(&self, filter: &Pubkey) -> Result<(), RaceError> {
        let endpoint = self.source.endpoint().trim();
        if endpoint.is_empty() {
            return Err(RaceError::Configuration(
                "no streaming endpoint configured".to_string(),
            ));
        }
        if self.is_active() {
            debug!(endpoint, "Stream already active, keeping existing subscription");
            return Ok(());
        }

        info!(endpoint, filter = %filter, "Opening event stream");
        let (tx, rx) = mpsc::unbounded_channel();
        self.source
            .subscribe(*filter, tx)
            .await
            .map_err(|e| RaceError::Connection(format!("{:#}", e)))?;

        self.health.set(true);
        let pump = StreamPump {
            listeners: Arc::clone(&self.listeners),
            freshness: Arc::clone(&self.freshness),
            health: self.health.clone(),
            last_slot: Arc::clone(&self.last_slot),
        };
        let handle = tokio::spawn(pump.run(rx));
        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
        info!("Event stream connected");
        Ok(())
    }

    /// Register (or replace) a listener under `listener_id`
    pub fn on_event<F>(&self, listener_id: impl Into<String>, callback: F)
    where
        F: Fn(&NormalizedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = listener_id.into();
        debug!(listener = %id, "Registering listener");
        self.listeners.write().insert(id, Arc::new(callback));
    }

    /// Remove a listener; returns whether it was registered
    pub fn off_event(&self, listener_id: &str) -> bool {
        self.listeners.write().remove(listener_id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether the subscription is live (as opposed to lost or never opened)
    pub fn is_active(&self) -> bool {
        self.health.is_active()
    }

    /// Shared health flag for components that only need liveness
    pub fn health(&self) -> StreamHealth {
        self.health.clone()
    }

    /// Highest slot observed on the stream
    pub fn last_slot(&self) -> u64 {
        self.last_slot.load(Ordering::Acquire)
    }

    /// Close the subscription and clear listeners. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        self.listeners.write().clear();
        if self.health.set(false) {
            info!("Event stream stopped");
        }
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receive loop: owned by the spawned task, shares state with the client
struct StreamPump {
    listeners: Arc<RwLock<HashMap<String, Listener>>>,
    freshness: Arc<FreshnessCache>,
    health: StreamHealth,
    last_slot: Arc<AtomicU64>,
}

impl StreamPump {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<StreamUpdate>) {
        while let Some(update) = rx.recv().await {
            match update {
                StreamUpdate::Frame(frame) => self.handle_frame(frame),
                StreamUpdate::Error(reason) => {
                    warn!(error = %reason, "Event stream error");
                    break;
                }
            }
        }
        self.health.set(false);
        metrics().stream_disconnects.inc();
        warn!("Event stream inactive; no further triggers will be observed until restarted");
    }

    fn handle_frame(&self, frame: RawFrame) {
        if let Some(slot) = frame.slot() {
            self.last_slot.fetch_max(slot, Ordering::AcqRel);
        }
        match frame {
            RawFrame::BlockMeta(meta) => {
                if let Some(anchor) = meta.anchor() {
                    if self.freshness.set(anchor) {
                        metrics().anchor_refresh_stream.inc();
                    }
                }
            }
            RawFrame::Transaction(tx) => {
                let event = tx.normalize();
                metrics().events_received.inc();
                trace!(signature = %event.id, slot = event.ordering_index, "Event received");
                dispatch(&self.listeners, &event);
            }
            RawFrame::Slot(slot) => {
                trace!(slot = slot.slot, "Slot notice");
            }
        }
    }
}

/// Deliver to every listener independently; failures are isolated and logged
fn dispatch(listeners: &RwLock<HashMap<String, Listener>>, event: &NormalizedEvent) {
    let snapshot: Vec<(String, Listener)> = listeners
        .read()
        .iter()
        .map(|(id, cb)| (id.clone(), Arc::clone(cb)))
        .collect();

    for (id, callback) in snapshot {
        match catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics().listener_failures.inc();
                warn!(listener = %id, signature = %event.id, error = %e, "Listener failed");
            }
            Err(_) => {
                metrics().listener_failures.inc();
                warn!(listener = %id, signature = %event.id, "Listener panicked");
            }
        }
    }
}
