//! Queue engine error types.

use courier_protocol_types::ErrorCode;
use thiserror::Error;

/// Queue engine error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Envelope is missing a required field
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Stream address is empty
    #[error("Invalid stream address: {0:?}")]
    InvalidStream(String),

    /// Stream was never referenced
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// Subscriber id is not bound to any stream
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(String),

    /// Stream already has a bound subscriber
    #[error("Stream {stream} already has a subscriber ({subscriber})")]
    AlreadySubscribed { stream: String, subscriber: String },
}

impl QueueError {
    /// Stable wire code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            QueueError::InvalidEnvelope(_) => ErrorCode::InvalidEnvelope,
            QueueError::InvalidStream(_) => ErrorCode::InvalidRequest,
            QueueError::UnknownStream(_) => ErrorCode::UnknownStream,
            QueueError::UnknownSubscriber(_) => ErrorCode::InvalidRequest,
            QueueError::AlreadySubscribed { .. } => ErrorCode::AlreadySubscribed,
        }
    }
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
