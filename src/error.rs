//! Error types for scenevote.

use thiserror::Error;

/// Main error type for all scenevote operations.
#[derive(Debug, Error)]
pub enum SceneVoteError {
    /// I/O error during socket/process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error against the platform session API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket transport error.
    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is structurally valid but semantically wrong.
    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    /// Malformed frame on the streaming connection. The frame is dropped,
    /// the connection stays up.
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Session bootstrap exhausted its retries. Fatal to startup.
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// A mixer request returned a non-success status.
    #[error("Mixer call failed: {0}")]
    MixerCall(String),

    /// A frame could not be captured from a source within its timeout.
    #[error("Capture failed for {source_name}: {reason}")]
    Capture { source_name: String, reason: String },

    /// The detection capability failed on a captured frame.
    #[error("Detection failed: {0}")]
    Detection(String),

    /// Connection or channel closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using SceneVoteError.
pub type Result<T> = std::result::Result<T, SceneVoteError>;
