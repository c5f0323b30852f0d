//! Prometheus metrics for the client
//!
//! Collectors live in their own registry; the embedding application decides
//! how to expose the text returned by [`ClientMetrics::gather`].

use std::fmt;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Client metrics collector. Clones share the same collectors.
#[derive(Clone)]
pub struct ClientMetrics {
    registry: Registry,

    pub commands_total: IntCounterVec,
    pub command_duration_seconds: HistogramVec,
    pub request_timeouts_total: IntCounter,
    pub pending_requests: IntGauge,
    pub push_messages_total: IntCounterVec,
    pub protocol_anomalies_total: IntCounterVec,
}

impl ClientMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("imdb_client_commands_total", "Total number of commands sent"),
            &["command"],
        )?;

        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "imdb_client_command_duration_seconds",
                "Time from send to reply",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["command"],
        )?;

        let request_timeouts_total = IntCounter::new(
            "imdb_client_request_timeouts_total",
            "Requests abandoned after their deadline",
        )?;

        let pending_requests = IntGauge::new(
            "imdb_client_pending_requests",
            "Requests waiting for a reply",
        )?;

        let push_messages_total = IntCounterVec::new(
            Opts::new("imdb_client_push_messages_total", "Push messages received"),
            &["type"],
        )?;

        let protocol_anomalies_total = IntCounterVec::new(
            Opts::new(
                "imdb_client_protocol_anomalies_total",
                "Inbound lines that could not be handled",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(commands_total.clone()))?;
        registry.register(Box::new(command_duration_seconds.clone()))?;
        registry.register(Box::new(request_timeouts_total.clone()))?;
        registry.register(Box::new(pending_requests.clone()))?;
        registry.register(Box::new(push_messages_total.clone()))?;
        registry.register(Box::new(protocol_anomalies_total.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_duration_seconds,
            request_timeouts_total,
            pending_requests,
            push_messages_total,
            protocol_anomalies_total,
        })
    }

    /// Record a completed round trip
    pub fn record_command(&self, command: &str, duration_secs: f64) {
        self.commands_total.with_label_values(&[command]).inc();
        self.command_duration_seconds
            .with_label_values(&[command])
            .observe(duration_secs);
    }

    pub fn record_timeout(&self) {
        self.request_timeouts_total.inc();
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending_requests.set(pending as i64);
    }

    pub fn record_push(&self, message_type: &str) {
        self.push_messages_total.with_label_values(&[message_type]).inc();
    }

    /// `kind` is one of `orphan_response`, `bad_envelope`, `line_too_long`
    pub fn record_anomaly(&self, kind: &str) {
        self.protocol_anomalies_total.with_label_values(&[kind]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("pending_requests", &self.pending_requests.get())
            .field("request_timeouts_total", &self.request_timeouts_total.get())
            .finish_non_exhaustive()
    }
}
