//! Sequential record reader for replay files.

use std::path::Path;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::format::{
    FlightStats, ReplayFormat, SessionMetadata, HEADER_V1, HEADER_V2, MSP_RECORD_HEADER_SIZE,
    TLOG_HEADER_OFFSET, TLOG_LENGTH_OFFSET, TLOG_PREFIX_SIZE,
};
use crate::codec::{BigEndian, LittleEndian};
use crate::error::Result;

/// One recorded chunk and when it was received, relative to the session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    pub offset: Duration,
    pub data: Bytes,
}

/// Reads records in file order.
///
/// A record cut short by the end of the file ends the stream; it is not an
/// error.
pub struct ReplayReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    format: ReplayFormat,
    tlog_origin: Option<u64>,
    exhausted: bool,
}

impl ReplayReader {
    /// Open `path`, picking the layout from its extension.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, SessionMetadata)> {
        let path = path.as_ref();
        let format = ReplayFormat::from_path(path);
        let file = File::open(path).await?;
        Self::from_reader(BufReader::new(file), format).await
    }

    /// Read the header (if any) from `reader` and position at the first record.
    pub async fn from_reader<R>(
        reader: R,
        format: ReplayFormat,
    ) -> Result<(Self, SessionMetadata)>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        match format {
            ReplayFormat::TLog => Ok((
                Self::new(Box::new(reader), format),
                SessionMetadata::headerless(format),
            )),
            ReplayFormat::MspLog => Self::open_msp_log(reader).await,
        }
    }

    fn new(inner: Box<dyn AsyncRead + Send + Unpin>, format: ReplayFormat) -> Self {
        Self {
            inner,
            format,
            tlog_origin: None,
            exhausted: false,
        }
    }

    async fn open_msp_log<R>(mut reader: R) -> Result<(Self, SessionMetadata)>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let format = ReplayFormat::MspLog;
        let prefix = read_up_to(&mut reader, HEADER_V2.len()).await?;

        if prefix[..] != HEADER_V1 && prefix[..] != HEADER_V2 {
            // Headerless: the bytes just read belong to the first record.
            let inner = Box::new(std::io::Cursor::new(prefix).chain(reader));
            return Ok((Self::new(inner, format), SessionMetadata::headerless(format)));
        }

        let mut this = Self::new(Box::new(reader), format);
        let mut metadata = SessionMetadata::headerless(format);

        let stats = if prefix[..] == HEADER_V2 {
            let mut buf = [0u8; FlightStats::ENCODED_SIZE];
            if !this.read_exact_or_end(&mut buf).await? {
                return Ok((this, metadata));
            }
            FlightStats::decode(&buf)
        } else {
            let Some(len) = this.read_blob_len().await? else {
                return Ok((this, metadata));
            };
            if this.read_blob(len).await?.is_none() {
                return Ok((this, metadata));
            }
            None
        };
        metadata.stats = stats;

        let Some(len) = this.read_blob_len().await? else {
            return Ok((this, metadata));
        };
        if let Some(blob) = this.read_blob(len).await? {
            metadata.aircraft_data = blob;
        }

        Ok((this, metadata))
    }

    pub fn format(&self) -> ReplayFormat {
        self.format
    }

    /// Next record, or `None` at the end of the file.
    pub async fn next_record(&mut self) -> Result<Option<ReplayRecord>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.format {
            ReplayFormat::MspLog => self.next_msp_record().await,
            ReplayFormat::TLog => self.next_tlog_record().await,
        }
    }

    async fn next_msp_record(&mut self) -> Result<Option<ReplayRecord>> {
        let mut header = [0u8; MSP_RECORD_HEADER_SIZE];
        if !self.read_exact_or_end(&mut header).await? {
            return Ok(None);
        }
        let (Some(timestamp_ms), Some(size)) = (
            LittleEndian::read_u32(&header, 0),
            LittleEndian::read_u16(&header, 4),
        ) else {
            return Ok(None);
        };

        let mut data = vec![0u8; size as usize];
        if !self.read_exact_or_end(&mut data).await? {
            return Ok(None);
        }

        Ok(Some(ReplayRecord {
            offset: Duration::from_millis(timestamp_ms as u64),
            data: Bytes::from(data),
        }))
    }

    async fn next_tlog_record(&mut self) -> Result<Option<ReplayRecord>> {
        let mut prefix = [0u8; TLOG_PREFIX_SIZE];
        if !self.read_exact_or_end(&mut prefix).await? {
            return Ok(None);
        }
        let Some(timestamp_us) = BigEndian::read_u64(&prefix, 0) else {
            return Ok(None);
        };
        let size = prefix[TLOG_LENGTH_OFFSET] as usize + 2;

        let mut trailing = vec![0u8; size];
        if !self.read_exact_or_end(&mut trailing).await? {
            return Ok(None);
        }

        let origin = *self.tlog_origin.get_or_insert(timestamp_us);
        let mut data = BytesMut::with_capacity(TLOG_PREFIX_SIZE - TLOG_HEADER_OFFSET + size);
        data.put_slice(&prefix[TLOG_HEADER_OFFSET..]);
        data.put_slice(&trailing);

        Ok(Some(ReplayRecord {
            offset: Duration::from_micros(timestamp_us.saturating_sub(origin)),
            data: data.freeze(),
        }))
    }

    /// Length prefix of a header blob. Negative lengths end the stream.
    async fn read_blob_len(&mut self) -> Result<Option<usize>> {
        let mut buf = [0u8; 4];
        if !self.read_exact_or_end(&mut buf).await? {
            return Ok(None);
        }
        match LittleEndian::read_i32(&buf, 0).and_then(|n| usize::try_from(n).ok()) {
            Some(len) => Ok(Some(len)),
            None => {
                tracing::warn!("negative blob length in log header");
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    async fn read_blob(&mut self, len: usize) -> Result<Option<Bytes>> {
        let mut blob = Vec::new();
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut blob).await?;
        if read < len {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(Bytes::from(blob)))
    }

    /// `read_exact` that reports a short read as `false` and marks the stream ended.
    async fn read_exact_or_end(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if !buf.is_empty() {
                    tracing::debug!("replay file ended");
                }
                self.exhausted = true;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n);
    reader.take(n as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}
