//! Realtime channel error types.

use thiserror::Error;

/// Realtime channel error type.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel is not connected; the message was dropped
    #[error("Realtime channel unavailable")]
    Unavailable,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel was shut down and cannot be reused
    #[error("Realtime channel shut down")]
    ShutDown,

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result type alias using ChannelError.
pub type ChannelResult<T> = Result<T, ChannelError>;
