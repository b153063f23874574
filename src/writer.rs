//! Outbound message queue and the per-link writer task.
//!
//! The dispatcher pushes encoded frames onto a shared [`OutputQueue`]. Each
//! live link runs one writer task that drains the queue in FIFO order,
//! batching whatever is ready into a single vectored write, then parks until
//! the next push.
//!
//! # Architecture
//!
//! ```text
//! send() ────┐
//! retries ───┼─► OutputQueue (FIFO) ─► Writer Task ─► Link
//! post() ────┘
//! ```
//!
//! The queue outlives any single link, so messages queued while a link is
//! down are written after a reconnect. The batch a writer holds when its link
//! fails is queued again in full; a message the peer already received may be
//! written twice.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{FlightlinkError, Result};

/// Maximum messages written in a single batch.
pub(crate) const MAX_BATCH_SIZE: usize = 64;

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Bytes>,
    in_flight: Vec<Bytes>,
    closed: bool,
}

/// FIFO of encoded outbound messages. Cheaply cloneable.
#[derive(Clone, Default)]
pub struct OutputQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns `ConnectionClosed` once the queue is closed.
    pub fn push(&self, message: Bytes) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return Err(FlightlinkError::ConnectionClosed);
            }
            state.messages.push_back(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest queued message, if any.
    pub fn next_output_message(&self) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .pop_front()
    }

    /// Wait for at least one message and take up to `max` of them.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn next_batch(&self, max: usize) -> Option<Vec<Bytes>> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.closed {
                    return None;
                }
                if !state.messages.is_empty() {
                    let n = state.messages.len().min(max);
                    let batch: Vec<Bytes> = state.messages.drain(..n).collect();
                    state.in_flight.clone_from(&batch);
                    return Some(batch);
                }
            }
            notified.await;
        }
    }

    /// Mark the last batch from [`next_batch`](Self::next_batch) as written.
    pub fn batch_written(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .clear();
    }

    /// Put an unconfirmed batch back at the front of the queue.
    ///
    /// Returns the number of messages restored.
    pub fn requeue_in_flight(&self) -> usize {
        let restored = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                state.in_flight.clear();
                return 0;
            }
            let batch = std::mem::take(&mut state.in_flight);
            for message in batch.iter().rev() {
                state.messages.push_front(message.clone());
            }
            batch.len()
        };
        if restored > 0 {
            self.notify.notify_one();
        }
        restored
    }

    /// Stop accepting messages, drop anything queued and wake the writer.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            state.messages.clear();
            state.in_flight.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn the writer task for one link.
///
/// The task ends with `Ok(())` when the queue closes and with an error when
/// the link rejects a write.
pub fn spawn_writer_task<W>(writer: W, queue: OutputQueue) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(queue, writer))
}

async fn writer_loop<W>(queue: OutputQueue, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(batch) = queue.next_batch(MAX_BATCH_SIZE).await {
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!(error = %e, messages = batch.len(), "write failed");
            return Err(e);
        }
        queue.batch_written();
        tracing::trace!(messages = batch.len(), "batch written");
    }
    Ok(())
}

/// Write a batch of messages using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(FlightlinkError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after `skip_bytes`.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for message in batch {
        let end = offset + message.len();
        if skip_bytes < end && !message.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&message[start..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_queue_fifo() {
        let queue = OutputQueue::new();
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_output_message().unwrap(), &b"a"[..]);
        assert_eq!(queue.next_output_message().unwrap(), &b"b"[..]);
        assert!(queue.next_output_message().is_none());
    }

    #[test]
    fn test_closed_queue_rejects_push() {
        let queue = OutputQueue::new();
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert!(matches!(
            queue.push(Bytes::from_static(b"b")),
            Err(FlightlinkError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![
            Bytes::from_static(b"abc"),
            Bytes::new(),
            Bytes::from_static(b"defg"),
        ];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);

        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(&*slices[0], b"c");
        assert_eq!(&*slices[1], b"defg");

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"defg");

        let slices = build_remaining_slices(&batch, 7);
        assert!(slices.is_empty());
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, mut server) = duplex(4096);
        let queue = OutputQueue::new();
        let task = spawn_writer_task(client, queue.clone());

        for i in 0u8..100 {
            queue.push(Bytes::from(vec![i; 3])).unwrap();
        }

        let mut buf = vec![0u8; 300];
        server.read_exact(&mut buf).await.unwrap();
        for (i, chunk) in buf.chunks(3).enumerate() {
            assert_eq!(chunk, &[i as u8; 3]);
        }

        queue.close();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_writer_partial_writes() {
        // Tiny duplex buffer forces partial vectored writes.
        let (client, mut server) = duplex(5);
        let queue = OutputQueue::new();
        let task = spawn_writer_task(client, queue.clone());

        queue.push(Bytes::from_static(b"hello ")).unwrap();
        queue.push(Bytes::from_static(b"world")).unwrap();

        let mut buf = vec![0u8; 11];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");

        queue.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_writer_fails_when_peer_gone() {
        let (client, server) = duplex(64);
        drop(server);

        let queue = OutputQueue::new();
        let task = spawn_writer_task(client, queue.clone());
        queue.push(Bytes::from_static(b"x")).unwrap();

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_failed_batch_is_requeued() {
        let (client, server) = duplex(64);
        drop(server);

        let queue = OutputQueue::new();
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();
        let task = spawn_writer_task(client, queue.clone());
        assert!(task.await.unwrap().is_err());
        assert!(queue.is_empty());

        queue.push(Bytes::from_static(b"c")).unwrap();
        assert_eq!(queue.requeue_in_flight(), 2);
        assert_eq!(queue.next_output_message().unwrap(), &b"a"[..]);
        assert_eq!(queue.next_output_message().unwrap(), &b"b"[..]);
        assert_eq!(queue.next_output_message().unwrap(), &b"c"[..]);
    }

    #[tokio::test]
    async fn test_written_batch_is_not_requeued() {
        let (client, mut server) = duplex(64);
        let queue = OutputQueue::new();
        let task = spawn_writer_task(client, queue.clone());

        queue.push(Bytes::from_static(b"abc")).unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        task.abort();
        let _ = task.await;
        assert_eq!(queue.requeue_in_flight(), 0);
        assert!(queue.is_empty());
    }
}
