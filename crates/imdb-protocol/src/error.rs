//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Line too long: {size} > {max}")]
    LineTooLong { size: usize, max: usize },

    #[error("Decoder already closed")]
    DecoderClosed,

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid {kind} content: {reason}")]
    InvalidContent { kind: &'static str, reason: String },
}

impl ProtocolError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
