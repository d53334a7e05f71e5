//! Diagnostic sink for input and output that never reaches the wire.
//!
//! The dispatcher never fails a run because of a single bad envelope. Every
//! token it drops and every response it cannot deliver is reported here
//! instead, so embedders and tests can observe what the protocol hides.
//!
//! The default sink is [`NoopSink`]. [`DiagnosticCounters`] keeps lock-free
//! per-kind counts.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cmdpipe::diagnostics::{Diagnostic, DiagnosticCounters, DiagnosticSink};
//!
//! let counters = Arc::new(DiagnosticCounters::new());
//! counters.record(Diagnostic::UnknownSignal { id: 1, signal: 0 });
//! assert_eq!(counters.unknown_signals(), 1);
//! assert_eq!(counters.total(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

/// Something the dispatcher dropped or could not deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Token was not valid JSON or not an envelope.
    MalformedEnvelope {
        /// Decoder error message.
        reason: String,
    },
    /// Token exceeded the maximum length and was skipped.
    OversizedToken {
        /// Length of the skipped token in bytes.
        len: usize,
    },
    /// Envelope carried a signal that is neither a command nor termination.
    UnknownSignal {
        /// Envelope id.
        id: i64,
        /// Signal value.
        signal: i64,
    },
    /// The processor panicked.
    HandlerPanicked {
        /// Command id.
        id: i64,
        /// Panic message, if it was a string.
        message: String,
    },
    /// The response could not be encoded.
    EncodeFailed {
        /// Command id.
        id: i64,
        /// Encoder error message.
        reason: String,
    },
    /// The response could not be handed to the writer.
    WriteFailed {
        /// Command id.
        id: i64,
    },
}

/// Receiver for [`Diagnostic`] events.
///
/// Called from the read loop and from handler tasks concurrently.
pub trait DiagnosticSink: Send + Sync + 'static {
    /// Record one event.
    fn record(&self, diagnostic: Diagnostic);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    #[inline]
    fn record(&self, _diagnostic: Diagnostic) {}
}

impl<F> DiagnosticSink for F
where
    F: Fn(Diagnostic) + Send + Sync + 'static,
{
    fn record(&self, diagnostic: Diagnostic) {
        self(diagnostic)
    }
}

/// Per-kind event counters.
#[derive(Debug, Default)]
pub struct DiagnosticCounters {
    malformed: AtomicUsize,
    oversized: AtomicUsize,
    unknown_signal: AtomicUsize,
    panicked: AtomicUsize,
    encode_failed: AtomicUsize,
    write_failed: AtomicUsize,
}

impl DiagnosticCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Malformed envelopes dropped.
    pub fn malformed(&self) -> usize {
        self.malformed.load(Ordering::Acquire)
    }

    /// Oversized tokens skipped.
    pub fn oversized(&self) -> usize {
        self.oversized.load(Ordering::Acquire)
    }

    /// Envelopes ignored for an unknown signal.
    pub fn unknown_signals(&self) -> usize {
        self.unknown_signal.load(Ordering::Acquire)
    }

    /// Processor panics.
    pub fn panicked(&self) -> usize {
        self.panicked.load(Ordering::Acquire)
    }

    /// Responses that failed to encode.
    pub fn encode_failed(&self) -> usize {
        self.encode_failed.load(Ordering::Acquire)
    }

    /// Responses that could not be handed to the writer.
    pub fn write_failed(&self) -> usize {
        self.write_failed.load(Ordering::Acquire)
    }

    /// Sum of all counters.
    pub fn total(&self) -> usize {
        self.malformed()
            + self.oversized()
            + self.unknown_signals()
            + self.panicked()
            + self.encode_failed()
            + self.write_failed()
    }
}

impl DiagnosticSink for DiagnosticCounters {
    fn record(&self, diagnostic: Diagnostic) {
        let counter = match diagnostic {
            Diagnostic::MalformedEnvelope { .. } => &self.malformed,
            Diagnostic::OversizedToken { .. } => &self.oversized,
            Diagnostic::UnknownSignal { .. } => &self.unknown_signal,
            Diagnostic::HandlerPanicked { .. } => &self.panicked,
            Diagnostic::EncodeFailed { .. } => &self.encode_failed,
            Diagnostic::WriteFailed { .. } => &self.write_failed,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }
}
