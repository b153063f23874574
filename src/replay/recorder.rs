//! Session recording in the MSP-log layout.
//!
//! Chunks are handed to a file task over a channel so the ingest path never
//! waits on disk. The stats header is written zeroed on create and
//! overwritten in place by [`Recorder::finish`].

use std::io::SeekFrom;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::format::{FlightStats, HEADER_V2, MAX_RECORD_SIZE, MSP_RECORD_HEADER_SIZE};
use crate::codec::LittleEndian;
use crate::error::Result;

enum Command {
    Chunk { timestamp_ms: u32, data: Bytes },
    Stats(FlightStats),
    Finish(oneshot::Sender<Result<()>>),
}

/// Writes every received chunk to an MSP log.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Command>,
    start: Instant,
}

impl Recorder {
    /// Create (or truncate) `path` and write the header.
    pub async fn create(path: impl AsRef<Path>, aircraft_data: &[u8]) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).await?;
        let mut writer = BufWriter::new(file);

        let blob_len = i32::try_from(aircraft_data.len()).map_err(|_| {
            crate::error::FlightlinkError::PayloadTooLarge {
                size: aircraft_data.len(),
                max: i32::MAX as usize,
            }
        })?;

        let mut header = BytesMut::with_capacity(4 + FlightStats::ENCODED_SIZE + 4);
        header.put_slice(&HEADER_V2);
        header.put_slice(&FlightStats::default().encode());
        LittleEndian::put_i32(&mut header, blob_len);
        writer.write_all(&header).await?;
        writer.write_all(aircraft_data).await?;

        tracing::debug!(path = %path.display(), "recording session");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(record_loop(writer, rx));

        Ok(Self {
            tx,
            start: Instant::now(),
        })
    }

    /// Append `data`, stamped with the time since the recorder was created.
    pub fn record(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let elapsed = self.start.elapsed().as_millis();
        let timestamp_ms = u32::try_from(elapsed).unwrap_or(u32::MAX);
        let _ = self.tx.send(Command::Chunk {
            timestamp_ms,
            data: Bytes::copy_from_slice(data),
        });
    }

    /// Statistics written to the header on finish.
    pub fn set_stats(&self, stats: FlightStats) {
        let _ = self.tx.send(Command::Stats(stats));
    }

    /// Flush pending records and rewrite the stats header.
    ///
    /// Calling it again after it completed returns `Ok(())`.
    pub async fn finish(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Finish(reply_tx)).is_err() {
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }
}

async fn record_loop(mut writer: BufWriter<File>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut stats = FlightStats::default();
    let mut failed = false;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Chunk { timestamp_ms, data } => {
                if failed {
                    continue;
                }
                if let Err(e) = write_records(&mut writer, timestamp_ms, &data).await {
                    tracing::error!(
                        error = %e,
                        "recording write failed, dropping further chunks"
                    );
                    failed = true;
                }
            }
            Command::Stats(new_stats) => stats = new_stats,
            Command::Finish(reply) => {
                let _ = reply.send(finalize(&mut writer, &stats).await);
                return;
            }
        }
    }

    if let Err(e) = finalize(&mut writer, &stats).await {
        tracing::warn!(error = %e, "failed to finalize recording");
    }
}

async fn write_records(
    writer: &mut BufWriter<File>,
    timestamp_ms: u32,
    data: &[u8],
) -> Result<()> {
    for chunk in data.chunks(MAX_RECORD_SIZE) {
        let mut header = BytesMut::with_capacity(MSP_RECORD_HEADER_SIZE);
        LittleEndian::put_u32(&mut header, timestamp_ms);
        LittleEndian::put_u16(&mut header, chunk.len() as u16);
        writer.write_all(&header).await?;
        writer.write_all(chunk).await?;
    }
    Ok(())
}

async fn finalize(writer: &mut BufWriter<File>, stats: &FlightStats) -> Result<()> {
    writer.flush().await?;
    let file = writer.get_mut();
    file.seek(SeekFrom::Start(HEADER_V2.len() as u64)).await?;
    file.write_all(&stats.encode()).await?;
    file.flush().await?;
    file.seek(SeekFrom::End(0)).await?;
    Ok(())
}
