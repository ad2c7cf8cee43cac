//! Domain-specific error types for the gridcast protocol.
//!
//! All fallible operations return `Result<T, GridcastError>`.
//! No panics on invalid input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for gridcast.
#[derive(Debug, Error)]
pub enum GridcastError {
    // ── Wire Errors ──────────────────────────────────────────────
    /// A payload is shorter than its declared contents.
    #[error("truncated payload: need {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },

    /// A delta update declared more entries than the protocol allows.
    #[error("delta count too large: {count} (max {max})")]
    DeltaCountTooLarge { count: usize, max: usize },

    /// A full frame body did not match the fixed frame size.
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    // ── HTTP Errors ──────────────────────────────────────────────
    /// The request line could not be parsed into method and path.
    #[error("malformed request line")]
    MalformedRequest,

    /// The accumulated request exceeded the per-connection buffer cap.
    #[error("request too large: {size} bytes (cap {cap})")]
    RequestTooLarge { size: usize, cap: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/UDP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The destination host could not be resolved.
    #[error("cannot resolve host: {0}")]
    ResolveFailed(String),

    /// Connection establishment exhausted its retry budget.
    #[error("connect failed after {attempts} attempts")]
    ConnectExhausted { attempts: u32 },

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Application Errors ───────────────────────────────────────
    /// The panel answered an HTTP POST with a non-ok status.
    #[error("panel rejected request: {0}")]
    PanelRejected(String),

    /// A state machine received an event it cannot accept in its
    /// current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GridcastError {
    fn from(s: String) -> Self {
        GridcastError::Other(s)
    }
}

impl From<&str> for GridcastError {
    fn from(s: &str) -> Self {
        GridcastError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GridcastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GridcastError::ChannelClosed
    }
}
