//! Client configuration

use std::time::Duration;

use imdb_protocol::decoder::DEFAULT_MAX_LINE_LENGTH;
use imdb_protocol::BinaryDecoding;

#[cfg(feature = "metrics")]
use crate::metrics::ClientMetrics;

/// Connection and runtime settings for a [`Client`](crate::Client)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// TCP connect deadline (`None` waits indefinitely)
    pub connect_timeout: Option<Duration>,
    /// Per-request deadline (`None` waits indefinitely)
    pub request_timeout: Option<Duration>,
    /// Maximum requests in flight on the connection
    pub max_pending: usize,
    /// Maximum length of a single inbound line
    pub max_line_length: usize,
    /// Socket read chunk size
    pub read_buffer_size: usize,
    /// How Binary push content is turned into bytes
    pub binary_decoding: BinaryDecoding,
    /// Optional Prometheus collectors
    #[cfg(feature = "metrics")]
    pub metrics: Option<ClientMetrics>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port` as passed to the resolver
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    pub fn with_binary_decoding(mut self, binary_decoding: BinaryDecoding) -> Self {
        self.binary_decoding = binary_decoding;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout: Some(Duration::from_secs(5)),
            request_timeout: Some(Duration::from_secs(5)),
            max_pending: 1024,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            read_buffer_size: 4096,
            binary_decoding: BinaryDecoding::Raw,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}
