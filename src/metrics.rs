//! Metrics collection and export module

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Stream
    pub events_received: IntCounter,
    pub events_ignored: IntCounter,
    pub triggers_detected: IntCounter,
    pub listener_failures: IntCounter,
    pub stream_disconnects: IntCounter,

    // Anchor freshness
    pub anchor_refresh_stream: IntCounter,
    pub anchor_refresh_rpc: IntCounter,
    pub anchor_direct_fetches: IntCounter,

    // Submissions
    pub submissions_ok: IntCounterVec,
    pub submissions_failed: IntCounterVec,
    pub fallbacks_taken: IntCounter,

    // Gauges
    pub run_state: IntGauge,

    // Histograms
    pub submission_latency: HistogramVec,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_received = IntCounter::with_opts(Opts::new(
            "events_received",
            "Normalized events decoded from the stream",
        ))?;
        let events_ignored = IntCounter::with_opts(Opts::new(
            "events_ignored",
            "Events that did not fire the trigger",
        ))?;
        let triggers_detected = IntCounter::with_opts(Opts::new(
            "triggers_detected",
            "Events that matched the target trigger",
        ))?;
        let listener_failures = IntCounter::with_opts(Opts::new(
            "listener_failures",
            "Listener callbacks that errored or panicked",
        ))?;
        let stream_disconnects = IntCounter::with_opts(Opts::new(
            "stream_disconnects",
            "Times the event stream became inactive",
        ))?;

        let anchor_refresh_stream = IntCounter::with_opts(Opts::new(
            "anchor_refresh_stream",
            "Anchors accepted from stream block metadata",
        ))?;
        let anchor_refresh_rpc = IntCounter::with_opts(Opts::new(
            "anchor_refresh_rpc",
            "Anchors accepted from the periodic RPC refresh",
        ))?;
        let anchor_direct_fetches = IntCounter::with_opts(Opts::new(
            "anchor_direct_fetches",
            "Synchronous anchor fetches at submission time",
        ))?;

        let submissions_ok = IntCounterVec::new(
            Opts::new("submissions_ok", "Confirmed submissions by payload kind"),
            &["kind"],
        )?;
        let submissions_failed = IntCounterVec::new(
            Opts::new("submissions_failed", "Failed submissions by payload kind"),
            &["kind"],
        )?;
        let fallbacks_taken = IntCounter::with_opts(Opts::new(
            "fallbacks_taken",
            "Times the add-to-existing fallback path was used",
        ))?;

        let run_state = IntGauge::with_opts(Opts::new(
            "run_state",
            "Orchestrator state (0 idle, 1 monitoring, 2 executing, 3 completed, 4 failed)",
        ))?;

        let submission_latency = HistogramVec::new(
            HistogramOpts::new(
                "submission_latency_seconds",
                "Stamp-sign-send-confirm latency",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["kind"],
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_ignored.clone()))?;
        registry.register(Box::new(triggers_detected.clone()))?;
        registry.register(Box::new(listener_failures.clone()))?;
        registry.register(Box::new(stream_disconnects.clone()))?;
        registry.register(Box::new(anchor_refresh_stream.clone()))?;
        registry.register(Box::new(anchor_refresh_rpc.clone()))?;
        registry.register(Box::new(anchor_direct_fetches.clone()))?;
        registry.register(Box::new(submissions_ok.clone()))?;
        registry.register(Box::new(submissions_failed.clone()))?;
        registry.register(Box::new(fallbacks_taken.clone()))?;
        registry.register(Box::new(run_state.clone()))?;
        registry.register(Box::new(submission_latency.clone()))?;

        Ok(Self {
            registry,
            events_received,
            events_ignored,
            triggers_detected,
            listener_failures,
            stream_disconnects,
            anchor_refresh_stream,
            anchor_refresh_rpc,
            anchor_direct_fetches,
            submissions_ok,
            submissions_failed,
            fallbacks_taken,
            run_state,
            submission_latency,
        })
    }

    /// Render all metrics in the prometheus text format
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::debug!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record into the submission latency histogram under `kind`
    pub fn observe_submission(self, kind: &str) {
        metrics()
            .submission_latency
            .with_label_values(&[kind])
            .observe(self.elapsed_secs());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
