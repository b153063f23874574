//! Replay channel: feeds recorded chunks into a session at their original pace.
//!
//! Each record is ingested once its offset has elapsed since replay start.
//! Outbound messages go nowhere; a sink task drains the output queue and
//! reports every pending request as successful.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::reader::ReplayReader;
use crate::dispatcher::RequestDispatcher;
use crate::events::SessionEvent;
use crate::session::SessionCore;
use crate::transport::channel::wait_closed;
use crate::writer::MAX_BATCH_SIZE;

pub(crate) struct ReplayChannel {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) reader: ReplayReader,
    pub(crate) close_rx: watch::Receiver<bool>,
}

impl ReplayChannel {
    pub(crate) async fn run(mut self) {
        let sink = spawn_replay_sink(self.core.dispatcher.clone());
        let start = Instant::now();
        let mut records: u64 = 0;

        let ended = loop {
            let next = tokio::select! {
                _ = wait_closed(&mut self.close_rx) => break false,
                next = self.reader.next_record() => next,
            };

            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => break true,
                Err(e) => {
                    tracing::warn!(error = %e, "replay read failed");
                    break true;
                }
            };

            tokio::select! {
                _ = wait_closed(&mut self.close_rx) => break false,
                _ = tokio::time::sleep_until(start + record.offset) => {}
            }

            self.core.ingest(&record.data);
            records += 1;
        };

        if ended {
            tracing::info!(records, "replay finished");
            self.core.events.publish(SessionEvent::ReplayEnded);
        } else {
            tracing::debug!(records, "replay closed");
        }

        self.core.teardown().await;
        sink.abort();
    }
}

/// Discard outbound messages; every pending request succeeds.
fn spawn_replay_sink(dispatcher: RequestDispatcher) -> JoinHandle<()> {
    tokio::spawn(async move {
        let queue = dispatcher.queue().clone();
        while let Some(batch) = queue.next_batch(MAX_BATCH_SIZE).await {
            tracing::trace!(messages = batch.len(), "discarding replay output");
            dispatcher.resolve_all(true);
        }
    })
}
