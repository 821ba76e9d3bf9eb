//! Error types for the realtime client.

use thiserror::Error;

use crate::audio::AudioError;

/// Errors that can occur during realtime client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket handshake or connection setup failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed (missing or rejected API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Mid-stream socket failure. The receive loop has ended and the
    /// caller must reconnect.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Event could not be serialized.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,

    /// The receive loop is already running for this connection.
    #[error("Receive loop already running")]
    AlreadyReceiving,

    /// Function result references a call id never seen in a
    /// function-call event.
    #[error("Invalid call id: {0}")]
    InvalidCallId(String),

    /// Input audio could not be interpreted or transcoded. Fails only
    /// the offending send; the connection is unaffected.
    #[error("Audio error: {0}")]
    Encoding(#[from] AudioError),

    /// The endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result type for realtime client operations.
pub type ClientResult<T> = Result<T, ClientError>;
