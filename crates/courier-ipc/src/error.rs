//! IPC error types.

use thiserror::Error;

/// Server-side IPC error.
#[derive(Error, Debug)]
pub enum IpcError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket error
    #[error("Socket error: {0}")]
    Socket(String),
}

/// Result type alias using IpcError.
pub type IpcResult<T> = Result<T, IpcError>;

/// Client-side error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    /// The server answered with an `error` frame.
    #[error("{code}: {detail}")]
    Remote { code: String, detail: String },

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ClientError {
    /// Wire error code for [`ClientError::Remote`].
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Json(e.to_string())
    }
}

/// Result type alias using ClientError.
pub type ClientResult<T> = Result<T, ClientError>;
