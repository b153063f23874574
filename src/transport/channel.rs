//! Live channel I/O loop.
//!
//! One task per live session reads from the link and feeds the session's
//! ingest path synchronously; a writer task per link drains the output queue.
//! When the link drops the loop either reconnects (keeping the detector, its
//! commitment and the output queue) or tears the session down.
//!
//! ```text
//!            ┌──────────── reconnect ◄───────────┐
//!            ▼                                   │ lost
//! connect ─► read loop ─► ingest ─► events       │
//!            │                                   │
//!            └──────────────────────────────────►┘
//!            │ close / give up
//!            ▼
//!        teardown (fail pending, Disconnected)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use super::{connect_link, BoxedLink, Connector, ReconnectPolicy};
use crate::events::SessionEvent;
use crate::session::SessionCore;
use crate::writer::spawn_writer_task;

/// Why a link stopped being driven.
#[derive(Debug)]
enum LinkOutcome {
    /// Local close requested.
    Closed,
    /// Link dropped without a local close.
    Lost(String),
}

pub(crate) struct LiveChannel {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_buffer_size: usize,
    pub(crate) close_rx: watch::Receiver<bool>,
}

impl LiveChannel {
    /// Drive `link` until close, reconnecting per policy.
    pub(crate) async fn run(mut self, link: BoxedLink) {
        let mut link = Some(link);

        while let Some(current) = link.take() {
            match self.drive(current).await {
                LinkOutcome::Closed => break,
                LinkOutcome::Lost(reason) => {
                    tracing::warn!(kind = ?self.connector.kind(), %reason, "connection lost");
                    self.core.set_connected(false);
                    self.core.dispatcher.fail_pending();
                    self.core.events.publish(SessionEvent::ConnectionLost);

                    if !self.policy.enabled {
                        break;
                    }
                    if let Some(new_link) = self.reconnect().await {
                        self.core.reset_partial_frames();
                        self.core.set_connected(true);
                        self.core.events.publish(SessionEvent::Reconnected);
                        link = Some(new_link);
                    }
                }
            }
        }

        self.core.teardown().await;
    }

    async fn drive(&mut self, link: BoxedLink) -> LinkOutcome {
        if *self.close_rx.borrow() {
            return LinkOutcome::Closed;
        }

        let (mut reader, writer) = tokio::io::split(link);
        let mut writer_task = spawn_writer_task(writer, self.core.dispatcher.queue().clone());
        let mut buf = vec![0u8; self.read_buffer_size.max(1)];
        let mut writer_finished = false;

        let outcome = loop {
            tokio::select! {
                _ = wait_closed(&mut self.close_rx) => break LinkOutcome::Closed,

                result = &mut writer_task => {
                    writer_finished = true;
                    break match result {
                        Ok(Ok(())) => LinkOutcome::Closed,
                        Ok(Err(e)) => LinkOutcome::Lost(format!("write failed: {e}")),
                        Err(e) => LinkOutcome::Lost(format!("writer task failed: {e}")),
                    };
                }

                read = reader.read(&mut buf) => match read {
                    Ok(0) => break LinkOutcome::Lost("end of stream".to_string()),
                    Ok(n) => self.core.ingest(&buf[..n]),
                    Err(e) => break LinkOutcome::Lost(format!("read failed: {e}")),
                },
            }
        };

        if !writer_finished {
            writer_task.abort();
            let _ = writer_task.await;
        }
        if matches!(outcome, LinkOutcome::Lost(_)) {
            let restored = self.core.dispatcher.queue().requeue_in_flight();
            if restored > 0 {
                tracing::debug!(messages = restored, "requeued unconfirmed output");
            }
        }
        outcome
    }

    async fn reconnect(&mut self) -> Option<BoxedLink> {
        let mut attempt: u32 = 0;
        loop {
            if let Some(max) = self.policy.max_attempts {
                if attempt >= max {
                    tracing::warn!(attempts = attempt, "giving up reconnecting");
                    return None;
                }
            }
            attempt += 1;

            tokio::select! {
                _ = wait_closed(&mut self.close_rx) => return None,
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            tracing::debug!(attempt, "reconnecting");
            let connect = connect_link(self.connector.as_ref(), self.connect_timeout);
            tokio::select! {
                _ = wait_closed(&mut self.close_rx) => return None,
                result = connect => match result {
                    Ok(link) => {
                        tracing::info!(attempt, "reconnected");
                        return Some(link);
                    }
                    Err(e) => tracing::debug!(attempt, error = %e, "reconnect failed"),
                },
            }
        }
    }
}

/// Resolve once a close is requested or the session handle is gone.
pub(crate) async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}
