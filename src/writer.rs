//! Dedicated writer task for response lines.
//!
//! Handler tasks never touch the output stream. Each one encodes its
//! response into a complete line and sends it over an mpsc channel to a
//! single writer task, which is the only code writing to the stream. Two
//! responses therefore can never interleave at the byte level.
//!
//! # Architecture
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► mpsc::Sender<OutboundLine> ─► Writer Task ─► stdout
//! Handler N ─┘
//! ```
//!
//! Lines already queued are batched into a single vectored write and
//! flushed together.

use std::io::IoSlice;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::{DispatchError, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum lines to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded response line, including its trailing `\n`.
#[derive(Debug, Clone)]
pub struct OutboundLine {
    /// Id of the command this line answers.
    pub id: i64,
    /// Encoded bytes.
    pub bytes: Bytes,
}

impl OutboundLine {
    /// Create a new outbound line.
    #[inline]
    pub fn new(id: i64, bytes: Bytes) -> Self {
        Self { id, bytes }
    }

    /// Size of this line in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the line queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending lines to the writer task.
///
/// Cheaply cloneable; one clone per handler task. The writer task exits
/// once every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundLine>,
}

impl WriterHandle {
    /// Queue a line for writing.
    ///
    /// Waits while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the writer task has stopped.
    pub async fn send(&self, line: OutboundLine) -> Result<()> {
        self.tx
            .send(line)
            .await
            .map_err(|_| DispatchError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The returned `JoinHandle` resolves once all handles are dropped and every
/// queued line has been written and flushed, or on the first write error.
/// Lines lost to that error are recorded as [`Diagnostic::WriteFailed`].
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, diagnostics));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives lines and writes them to the stream.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundLine>,
    mut writer: W,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.clear();
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            // Senders fail fast from here on; drain what is already queued.
            rx.close();
            while let Ok(line) = rx.try_recv() {
                batch.push(line);
            }
            tracing::error!(
                error = %e,
                first_id = batch[0].id,
                dropped = batch.len(),
                "Output write failed, writer stopping"
            );
            for line in &batch {
                diagnostics.record(Diagnostic::WriteFailed { id: line.id });
            }
            return Err(e);
        }
        tracing::trace!(lines = batch.len(), "Wrote response batch");
    }

    writer.flush().await?;
    Ok(())
}

/// Write a batch of lines with vectored I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundLine::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(DispatchError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data remaining after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundLine], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for line in batch {
        let end = offset + line.size();
        if skip_bytes < end && !line.bytes.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&line.bytes[start..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticCounters, NoopSink};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn spawn<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        spawn_writer_task(writer, config, Arc::new(NoopSink))
    }

    fn line(id: i64, text: &'static str) -> OutboundLine {
        OutboundLine::new(id, Bytes::from_static(text.as_bytes()))
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn(client, WriterConfig::default());

        handle.send(line(1, "{\"id\":1}\n")).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"{\"id\":1}\n");
    }

    #[tokio::test]
    async fn test_writer_drains_queue_on_close() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, task) = spawn(client, WriterConfig { channel_capacity: 4 });

        let producer = tokio::spawn(async move {
            for i in 0..100 {
                let bytes = Bytes::from(format!("line-{}\n", i));
                handle.send(OutboundLine::new(i, bytes)).await.unwrap();
            }
        });

        producer.await.unwrap();
        task.await.unwrap().unwrap();

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "line-0");
        assert_eq!(lines[99], "line-99");
    }

    #[tokio::test]
    async fn test_send_after_writer_failure() {
        let (client, server) = duplex(16);
        drop(server);
        let (handle, task) = spawn(client, WriterConfig::default());

        handle.send(line(1, "{\"id\":1}\n")).await.unwrap();
        assert!(task.await.unwrap().is_err());

        let result = handle.send(line(2, "{\"id\":2}\n")).await;
        assert!(matches!(result, Err(DispatchError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_write_failure_records_every_dropped_line() {
        let (client, server) = duplex(16);
        drop(server);
        let counters = Arc::new(DiagnosticCounters::new());

        let (tx, rx) = mpsc::channel(8);
        for id in 1..=3 {
            tx.try_send(line(id, "{}\n")).unwrap();
        }

        let result = writer_loop(rx, client, counters.clone()).await;

        assert!(result.is_err());
        assert_eq!(counters.write_failed(), 3);
        assert_eq!(counters.total(), 3);
        // Queue is closed once the writer gives up.
        assert!(tx.send(line(4, "{}\n")).await.is_err());
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![line(1, "abc\n"), line(2, "de\n")];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_line() {
        let batch = vec![line(1, "abc\n"), line(2, "de\n")];

        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(&slices[0][..], b"c\n");
        assert_eq!(&slices[1][..], b"de\n");
    }

    #[test]
    fn test_build_remaining_slices_skip_line() {
        let batch = vec![line(1, "abc\n"), line(2, "de\n")];

        let slices = build_remaining_slices(&batch, 4);
        assert_eq!(slices.len(), 1);
        assert_eq!(&slices[0][..], b"de\n");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch = vec![line(1, "a\n"), line(2, "bb\n"), line(3, "ccc\n")];

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner(), b"a\nbb\nccc\n");
    }
}
