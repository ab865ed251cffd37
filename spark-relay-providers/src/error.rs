//! Error type for upstream sessions

use thiserror::Error;

/// Errors that end an upstream session
///
/// The `Display` text is what the subscriber receives in its `error` event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Bad credentials or base URL; no upstream connection is attempted
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The upstream answered with a non-zero header code
    #[error("API error: code={code}, message={message}")]
    UpstreamProtocol { code: i32, message: String },

    /// Connect failure, socket error or premature close
    #[error("WebSocket connection failed: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded
    #[error("Invalid API response: {0}")]
    Decode(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Decode(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}
