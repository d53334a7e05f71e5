//! Error types for cmdpipe.

use thiserror::Error;

/// Main error type for dispatcher operations.
///
/// Per-command failures (malformed envelopes, handler panics, encoding
/// errors) never surface here; they are reported through the
/// [`DiagnosticSink`](crate::diagnostics::DiagnosticSink) instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// I/O error on the input or output stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope is valid JSON but does not have the envelope shape.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The writer task is gone (output closed or failed).
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using DispatchError.
pub type Result<T> = std::result::Result<T, DispatchError>;
