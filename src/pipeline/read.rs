//! Byte reading: load a validated file into memory, reporting progress.
//!
//! [`ByteReader::read`] returns a lazy [`ReadStream`]. Nothing is opened
//! until the stream is first polled, and dropping the stream abandons the
//! read. The stream yields zero or more [`ReadEvent::Progress`] items and
//! always terminates with exactly one [`ReadEvent::Finished`].
//!
//! Progress is only reported when the total length is computable (declared
//! and non-zero). Percentages are rounded, clamped to 100 and emitted only
//! when they change, so consumers see a non-decreasing sequence.

use crate::config::ChatConfig;
use crate::error::ReadError;
use crate::model::FileSource;
use crate::pipeline::validate::ValidatedFile;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_stream::Stream;
use tracing::debug;

/// One step of a read.
#[derive(Debug)]
pub enum ReadEvent {
    Progress(ReadProgress),
    /// Terminal event: the full buffer, or why it could not be produced.
    Finished(Result<Vec<u8>, ReadError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    pub loaded: u64,
    pub total: u64,
    pub percent: u8,
}

/// A boxed stream of read events.
pub type ReadStream = Pin<Box<dyn Stream<Item = ReadEvent> + Send>>;

/// Chunked async reader with optional timeout and size cap.
#[derive(Debug, Clone)]
pub struct ByteReader {
    chunk_bytes: usize,
    timeout: Option<Duration>,
    max_bytes: Option<u64>,
}

impl ByteReader {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            chunk_bytes: config.read_chunk_bytes.max(1),
            timeout: config.read_timeout(),
            max_bytes: config.max_file_bytes,
        }
    }

    /// Start reading `file`. The returned stream drives the I/O.
    pub fn read(&self, file: ValidatedFile) -> ReadStream {
        let (file_name, total, source) = file.into_parts();
        let job = ReadJob {
            file_name,
            total,
            source,
            chunk_bytes: self.chunk_bytes,
            timeout: self.timeout,
            max_bytes: self.max_bytes,
        };

        Box::pin(stream::unfold(Step::Open(job), |step| async move {
            match step {
                Step::Open(job) => match job.open().await {
                    Ok(state) => state.next_event().await,
                    Err(e) => Some((ReadEvent::Finished(Err(e)), Step::Done)),
                },
                Step::Reading(state) => state.next_event().await,
                Step::Done => None,
            }
        }))
    }

    /// Read to completion, discarding progress events.
    pub async fn read_all(&self, file: ValidatedFile) -> Result<Vec<u8>, ReadError> {
        let mut events = self.read(file);
        while let Some(event) = events.next().await {
            if let ReadEvent::Finished(result) = event {
                return result;
            }
        }
        Err(ReadError::Io {
            loaded: 0,
            detail: "read ended without a result".into(),
        })
    }
}

/// Rounded percentage, or `None` when the total is not computable.
pub fn percent_of(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (loaded as u128 * 100 + total as u128 / 2) / total as u128;
    Some(pct.min(100) as u8)
}

// ── Internal state machine ───────────────────────────────────────────────

enum Step {
    Open(ReadJob),
    Reading(Box<ReadState>),
    Done,
}

struct ReadJob {
    file_name: String,
    total: Option<u64>,
    source: FileSource,
    chunk_bytes: usize,
    timeout: Option<Duration>,
    max_bytes: Option<u64>,
}

impl ReadJob {
    async fn open(self) -> Result<Box<ReadState>, ReadError> {
        let reader: Box<dyn AsyncRead + Send + Unpin> = match self.source {
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| ReadError::Open {
                        file_name: self.file_name.clone(),
                        detail: e.to_string(),
                    })?;
                Box::new(file)
            }
            FileSource::Memory(bytes) => Box::new(std::io::Cursor::new(bytes)),
            FileSource::Reader(reader) => reader,
        };

        debug!(
            "Reading '{}' ({} bytes declared)",
            self.file_name,
            self.total.map_or_else(|| "?".to_string(), |t| t.to_string())
        );

        let capacity = self.total.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        Ok(Box::new(ReadState {
            file_name: self.file_name,
            reader,
            buf: Vec::with_capacity(capacity),
            chunk: vec![0u8; self.chunk_bytes],
            total: self.total,
            last_percent: None,
            max_bytes: self.max_bytes,
            deadline: self
                .timeout
                .map(|t| (Instant::now() + t, t.as_secs())),
        }))
    }
}

struct ReadState {
    file_name: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    buf: Vec<u8>,
    chunk: Vec<u8>,
    total: Option<u64>,
    last_percent: Option<u8>,
    max_bytes: Option<u64>,
    deadline: Option<(Instant, u64)>,
}

impl ReadState {
    /// Read until there is something to report.
    async fn next_event(mut self: Box<Self>) -> Option<(ReadEvent, Step)> {
        loop {
            let n = match self.read_chunk().await {
                Ok(n) => n,
                Err(e) => return Some((ReadEvent::Finished(Err(e)), Step::Done)),
            };

            if n == 0 {
                debug!("Read '{}': {} bytes", self.file_name, self.buf.len());
                let buf = std::mem::take(&mut self.buf);
                return Some((ReadEvent::Finished(Ok(buf)), Step::Done));
            }

            self.buf.extend_from_slice(&self.chunk[..n]);

            if let Some(limit) = self.max_bytes {
                if self.buf.len() as u64 > limit {
                    return Some((
                        ReadEvent::Finished(Err(ReadError::LimitExceeded { limit })),
                        Step::Done,
                    ));
                }
            }

            if let Some(progress) = self.progress() {
                return Some((ReadEvent::Progress(progress), Step::Reading(self)));
            }
        }
    }

    async fn read_chunk(&mut self) -> Result<usize, ReadError> {
        let loaded = self.buf.len() as u64;
        let read = self.reader.read(&mut self.chunk);
        let result = match self.deadline {
            Some((at, secs)) => tokio::time::timeout_at(at, read)
                .await
                .map_err(|_| ReadError::Timeout { secs })?,
            None => read.await,
        };
        result.map_err(|e| ReadError::Io {
            loaded,
            detail: e.to_string(),
        })
    }

    /// A progress event if the percentage moved since the last one.
    fn progress(&mut self) -> Option<ReadProgress> {
        let total = self.total?;
        let loaded = self.buf.len() as u64;
        let percent = percent_of(loaded, total)?;
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(ReadProgress {
            loaded,
            total,
            percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileDescriptor;
    use crate::pipeline::validate::FileValidator;
    use std::io;

    fn validated(file: FileDescriptor) -> ValidatedFile {
        FileValidator::new(&ChatConfig::default())
            .validate(file)
            .unwrap()
    }

    fn reader(chunk: usize) -> ByteReader {
        let config = ChatConfig::builder().read_chunk_bytes(chunk).build().unwrap();
        ByteReader::new(&config)
    }

    async fn collect(stream: ReadStream) -> (Vec<u8>, Result<Vec<u8>, ReadError>) {
        let events: Vec<ReadEvent> = stream.collect().await;
        let mut percents = Vec::new();
        let mut finished = Vec::new();
        for e in events {
            match e {
                ReadEvent::Progress(p) => percents.push(p.percent),
                ReadEvent::Finished(r) => finished.push(r),
            }
        }
        assert_eq!(finished.len(), 1, "stream must finish exactly once");
        (percents, finished.pop().unwrap())
    }

    #[test]
    fn percent_rounding() {
        assert_eq!(percent_of(0, 10), Some(0));
        assert_eq!(percent_of(1, 3), Some(33));
        assert_eq!(percent_of(2, 3), Some(67));
        assert_eq!(percent_of(10, 10), Some(100));
        assert_eq!(percent_of(20, 10), Some(100));
        assert_eq!(percent_of(5, 0), None);
    }

    #[tokio::test]
    async fn known_length_reports_progress() {
        let bytes = vec![7u8; 4096];
        let file = validated(FileDescriptor::pdf("a.pdf", bytes.clone()));
        let (percents, result) = collect(reader(1024).read(file)).await;

        assert_eq!(percents, vec![25, 50, 75, 100]);
        assert_eq!(result.unwrap(), bytes);
    }

    #[tokio::test]
    async fn unknown_length_reports_no_progress() {
        let file = validated(FileDescriptor::from_reader(
            "a.pdf",
            "application/pdf",
            None,
            io::Cursor::new(vec![1u8; 5000]),
        ));
        let (percents, result) = collect(reader(1024).read(file)).await;

        assert!(percents.is_empty());
        assert_eq!(result.unwrap().len(), 5000);
    }

    #[tokio::test]
    async fn io_error_terminates_stream() {
        let mock = tokio_test::io::Builder::new()
            .read(b"%PDF-1.7 partial")
            .read_error(io::Error::new(io::ErrorKind::Other, "disk gone"))
            .build();
        let file = validated(FileDescriptor::from_reader(
            "broken.pdf",
            "application/pdf",
            Some(1000),
            mock,
        ));
        let (percents, result) = collect(reader(1024).read(file)).await;

        assert_eq!(percents, vec![2]);
        match result {
            Err(ReadError::Io { loaded, detail }) => {
                assert_eq!(loaded, 16);
                assert!(detail.contains("disk gone"));
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_path_is_open_error() {
        let file = validated(FileDescriptor::from_path("/definitely/not/here.pdf"));
        let result = reader(1024).read_all(file).await;
        assert!(matches!(result, Err(ReadError::Open { .. })), "{result:?}");
    }

    #[tokio::test]
    async fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.4 body").unwrap();

        let file = validated(FileDescriptor::from_path(&path));
        let bytes = reader(1024).read_all(file).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn cap_applies_to_bytes_actually_read() {
        let config = ChatConfig::builder()
            .max_file_bytes(2048)
            .read_chunk_bytes(1024)
            .build()
            .unwrap();
        // Length unknown, so validation cannot catch it up front.
        let file = FileValidator::new(&config)
            .validate(FileDescriptor::from_reader(
                "big.pdf",
                "application/pdf",
                None,
                io::Cursor::new(vec![0u8; 4096]),
            ))
            .unwrap();
        let result = ByteReader::new(&config).read_all(file).await;
        assert_eq!(result, Err(ReadError::LimitExceeded { limit: 2048 }));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_times_out() {
        let config = ChatConfig::builder().read_timeout_secs(5).build().unwrap();
        let (_writer, pending) = tokio::io::duplex(64);
        let file = validated(FileDescriptor::from_reader(
            "slow.pdf",
            "application/pdf",
            Some(10),
            pending,
        ));
        let result = ByteReader::new(&config).read_all(file).await;
        assert_eq!(result, Err(ReadError::Timeout { secs: 5 }));
    }
}
