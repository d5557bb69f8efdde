//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credential verification failed. No connection state is created.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Durable store failure. Propagated to the caller that triggered the
    /// write; in-memory state is left untouched.
    #[error("store error: {0}")]
    Store(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unauthorized client request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection not registered with the broker.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Outbound channel send error.
    #[error("channel send error")]
    ChannelSend,
}

impl From<tokio::sync::mpsc::error::SendError<axum::extract::ws::Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<axum::extract::ws::Message>) -> Self {
        GatewayError::ChannelSend
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
