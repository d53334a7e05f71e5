//! Dispatcher builder and read loop.
//!
//! The [`DispatcherBuilder`] collects configuration; [`Dispatcher::run`]
//! drives the lifecycle:
//! 1. Spawn the writer task on the output stream
//! 2. Read whitespace-delimited tokens from the input stream
//! 3. Decode each token as a [`Command`] envelope
//! 4. Spawn a handler task per command, stop on termination
//!
//! # Example
//!
//! ```
//! use cmdpipe::{Dispatcher, ShutdownReason};
//! use serde_json::{json, Value};
//! use tokio::io::AsyncReadExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cmdpipe::Result<()> {
//! let input: &[u8] = b"{\"Id\":7,\"Cmd\":{\"n\":21},\"Signal\":-1}\n\
//!                      {\"Id\":8,\"Cmd\":{},\"Signal\":1}\n";
//! let (stdout, mut host) = tokio::io::duplex(4096);
//!
//! let shutdown = Dispatcher::builder()
//!     .drain_on_terminate(true)
//!     .build(input, stdout, |cmd: Value| {
//!         json!({ "result": cmd["n"].as_i64().unwrap_or(0) * 2 })
//!     })
//!     .run()
//!     .await?;
//!
//! let mut output = String::new();
//! host.read_to_string(&mut output).await?;
//!
//! assert_eq!(shutdown.reason, ShutdownReason::Terminated);
//! assert_eq!(output, "{\"id\":7,\"data\":{\"result\":42}}\n");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::task::TaskTracker;

use crate::diagnostics::{Diagnostic, DiagnosticSink, NoopSink};
use crate::error::Result;
use crate::handler::{HandlerContext, PanicPolicy, Processor};
use crate::protocol::{Command, Signal, Token, TokenCodec, DEFAULT_MAX_TOKEN_LENGTH};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination envelope was received.
    Terminated,
    /// The input stream ended without a termination envelope.
    InputClosed,
}

/// Summary returned by [`Dispatcher::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    /// Why the read loop stopped.
    pub reason: ShutdownReason,
    /// Number of commands handed to the processor.
    pub dispatched: u64,
    /// Input already read past the termination envelope, starting with the
    /// byte right after it. Never handed to the processor.
    pub remaining: Bytes,
}

/// Builder for configuring and creating a [`Dispatcher`].
pub struct DispatcherBuilder {
    writer_config: WriterConfig,
    max_token_length: usize,
    drain_on_terminate: bool,
    panic_policy: PanicPolicy,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl DispatcherBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            writer_config: WriterConfig::default(),
            max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
            drain_on_terminate: false,
            panic_policy: PanicPolicy::default(),
            diagnostics: Arc::new(NoopSink),
        }
    }

    /// Wait for in-flight commands and flush their responses before
    /// [`Dispatcher::run`] returns.
    ///
    /// Applies to every way a run ends: termination, end of input and input
    /// errors. When disabled, `run` returns as soon as reading stops and
    /// in-flight handler tasks are left running in the background.
    /// Default: false
    pub fn drain_on_terminate(mut self, drain: bool) -> Self {
        self.drain_on_terminate = drain;
        self
    }

    /// Set the capacity of the response queue in front of the writer task.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the maximum length of one input token. Longer tokens are skipped.
    ///
    /// Default: 8 MiB
    pub fn max_token_length(mut self, length: usize) -> Self {
        self.max_token_length = length;
        self
    }

    /// Set what a panicking processor puts on the wire.
    ///
    /// Default: [`PanicPolicy::Drop`]
    pub fn panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    /// Set the sink for dropped input and undelivered responses.
    ///
    /// Default: [`NoopSink`]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Bind the configuration to streams and a processor.
    pub fn build<R, W, P>(self, reader: R, writer: W, processor: P) -> Dispatcher<R, W>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        P: Processor,
    {
        Dispatcher {
            reader,
            writer,
            processor: Arc::new(processor),
            config: self,
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads command envelopes from `R` and writes responses to `W`.
pub struct Dispatcher<R, W> {
    reader: R,
    writer: W,
    processor: Arc<dyn Processor>,
    config: DispatcherBuilder,
}

impl Dispatcher<Stdin, Stdout> {
    /// Create a new dispatcher builder.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Create a dispatcher on the process's stdin and stdout with default
    /// settings.
    pub fn stdio<P: Processor>(processor: P) -> Self {
        DispatcherBuilder::new().build_stdio(processor)
    }
}

impl<R, W> Dispatcher<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a dispatcher with default settings.
    pub fn new<P: Processor>(reader: R, writer: W, processor: P) -> Self {
        DispatcherBuilder::new().build(reader, writer, processor)
    }

    /// Run the read loop until termination or end of input.
    ///
    /// Malformed tokens, unknown signals and per-command failures never end
    /// the loop; they go to the diagnostic sink.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading the input stream fails.
    pub async fn run(self) -> Result<Shutdown> {
        let (shutdown, _input) = self.run_with_input().await?;
        Ok(shutdown)
    }

    /// Like [`run`](Self::run), and hand the input stream back afterwards.
    ///
    /// Input is read in chunks, so bytes following the termination envelope
    /// may already be off the stream. They are returned in
    /// [`Shutdown::remaining`]; the stream continues where they end.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading the input stream fails.
    pub async fn run_with_input(self) -> Result<(Shutdown, R)> {
        let Dispatcher {
            reader,
            writer,
            processor,
            config,
        } = self;

        let diagnostics = config.diagnostics;
        let (writer, writer_task) =
            spawn_writer_task(writer, config.writer_config, diagnostics.clone());
        let handler = HandlerContext {
            processor,
            writer,
            diagnostics: diagnostics.clone(),
            panic_policy: config.panic_policy,
        };
        let drain = config.drain_on_terminate;

        let tracker = TaskTracker::new();
        let codec = TokenCodec::with_max_length(config.max_token_length);
        let mut tokens = FramedRead::new(reader, codec);
        let mut dispatched = 0u64;

        let reason = loop {
            let token = match tokens.next().await {
                Some(Ok(token)) => token,
                Some(Err(e)) => {
                    tracing::error!(error = %e, dispatched, "Input read failed");
                    stop(tracker, handler, writer_task, drain).await;
                    return Err(e.into());
                }
                None => {
                    tracing::debug!("Input closed without termination");
                    break ShutdownReason::InputClosed;
                }
            };

            let bytes = match token {
                Token::Word(bytes) => bytes,
                Token::Oversized(len) => {
                    tracing::debug!(len, "Skipping oversized token");
                    diagnostics.record(Diagnostic::OversizedToken { len });
                    continue;
                }
            };

            let command = match Command::decode(&bytes) {
                Ok(command) => command,
                Err(e) => {
                    tracing::debug!(error = %e, len = bytes.len(), "Dropping malformed envelope");
                    diagnostics.record(Diagnostic::MalformedEnvelope {
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match command.signal {
                Signal::NoSignal => {
                    dispatched += 1;
                    tracker.spawn(handler.clone().handle(command));
                }
                Signal::Termination => {
                    tracing::debug!(id = command.id, "Termination requested");
                    break ShutdownReason::Terminated;
                }
                Signal::Other(signal) => {
                    tracing::debug!(id = command.id, signal, "Ignoring unknown signal");
                    diagnostics.record(Diagnostic::UnknownSignal {
                        id: command.id,
                        signal,
                    });
                }
            }
        };

        // The codec stops right after the last token, so the buffer holds
        // only input that was never looked at.
        let remaining = tokens.read_buffer_mut().split().freeze();
        let reader = tokens.into_inner();

        stop(tracker, handler, writer_task, drain).await;

        tracing::info!(?reason, dispatched, unread = remaining.len(), "Dispatcher stopped");
        let shutdown = Shutdown {
            reason,
            dispatched,
            remaining,
        };
        Ok((shutdown, reader))
    }
}

/// Stop accepting commands and, if `drain` is set, wait until every accepted
/// command has been answered and flushed.
async fn stop(
    tracker: TaskTracker,
    handler: HandlerContext,
    writer_task: JoinHandle<Result<()>>,
    drain: bool,
) {
    tracker.close();
    // The writer task exits once the last handle is dropped.
    drop(handler);

    if !drain {
        return;
    }

    tracing::debug!(in_flight = tracker.len(), "Draining in-flight commands");
    tracker.wait().await;
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Output writer failed before drain"),
        Err(e) => tracing::error!(error = %e, "Output writer task failed"),
    }
}
