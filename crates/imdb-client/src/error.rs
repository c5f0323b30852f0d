//! Error types for the imdb client

use std::time::Duration;

use imdb_protocol::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Malformed command arguments, rejected before anything was written
    #[error("Encoding error: {0}")]
    Encoding(#[from] ProtocolError),

    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Cannot connect from state {0}")]
    InvalidState(ConnectionState),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connecting to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    /// The transport failed or closed while the request was outstanding
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{command} timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Too many pending requests (limit {limit})")]
    TooManyPending { limit: usize },
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
