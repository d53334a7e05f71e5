//! Per-command handler task.
//!
//! One task per accepted command:
//! 1. Run the processor on the blocking pool
//! 2. Wrap the result in a [`Response`] carrying the command's id
//! 3. Encode it as one line and hand it to the writer task
//!
//! Nothing is reported back to the read loop. A panicking processor, an
//! unencodable result or a stopped writer only shows up as a missing line,
//! a log event and a [`Diagnostic`].

use std::any::Any;
use std::sync::Arc;

use serde_json::{json, Value};

use super::Processor;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::protocol::{Command, Response};
use crate::writer::{OutboundLine, WriterHandle};

/// What to send when the processor panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Send nothing. The host sees the same silence as for a lost command.
    #[default]
    Drop,
    /// Send `{"id": <id>, "data": {"error": "<panic message>"}}`.
    ErrorPayload,
}

/// Everything a handler task needs besides the command itself.
///
/// Cloned once per command; all fields are shared handles.
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub(crate) processor: Arc<dyn Processor>,
    pub(crate) writer: WriterHandle,
    pub(crate) diagnostics: Arc<dyn DiagnosticSink>,
    pub(crate) panic_policy: PanicPolicy,
}

impl HandlerContext {
    /// Process one command and emit its response.
    pub(crate) async fn handle(self, command: Command) {
        let id = command.id;
        let processor = self.processor.clone();

        let data = match tokio::task::spawn_blocking(move || processor.process(command.cmd)).await
        {
            Ok(data) => data,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(id, message = %message, "Processor panicked");
                self.diagnostics.record(Diagnostic::HandlerPanicked {
                    id,
                    message: message.clone(),
                });
                match self.panic_policy {
                    PanicPolicy::Drop => return,
                    PanicPolicy::ErrorPayload => json!({ "error": message }),
                }
            }
            Err(_) => {
                tracing::debug!(id, "Processor cancelled by runtime shutdown");
                return;
            }
        };

        self.respond(Response::new(id, data)).await;
    }

    /// Encode and queue a response.
    async fn respond(&self, response: Response) {
        let id = response.id;

        // A `Value` always serializes; kept so a failure is counted, not lost.
        let bytes = match response.encode_line() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(id, error = %e, "Dropping response that failed to encode");
                self.diagnostics.record(Diagnostic::EncodeFailed {
                    id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if self.writer.send(OutboundLine::new(id, bytes)).await.is_err() {
            tracing::warn!(id, "Dropping response, output writer is closed");
            self.diagnostics.record(Diagnostic::WriteFailed { id });
        }
    }
}

/// Extract a printable message from a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "processor panicked".to_string()
    }
}
