//! Error types for the Read Aloud client.
//!
//! User-initiated cancellation is deliberately absent from this taxonomy: a
//! triggered cancellation token settles the in-flight chunk with the bytes
//! received so far and ends the iteration without an error.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type TtsResult<T> = Result<T, TtsError>;

/// Errors surfaced by connection, synthesis, and catalog operations.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The socket failed to open or the handshake frame could not be sent.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An inbound frame did not match the expected wire shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote side closed the socket with a non-empty reason while a
    /// request was in flight. Chunks delivered before the close stay valid.
    #[error("Remote closed the stream: {0}")]
    RemoteClosed(String),

    /// The configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller-supplied per-chunk deadline elapsed before a turn-end
    /// signal or a close was observed.
    #[error("Timed out waiting for the synthesis server")]
    Timeout,

    /// Transport-level WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP failure while fetching the voice catalog.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
