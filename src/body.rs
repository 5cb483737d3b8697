use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;

use crate::observe::{ProgressEvent, ProgressListener, publish};

/// Bytes a non-seekable reader may advance past its mark before a reset becomes impossible.
pub const DEFAULT_READ_LIMIT: usize = 128 * 1024 + 1;

trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

enum Source {
    Bytes {
        data: Bytes,
        position: usize,
        mark: usize,
    },
    Seekable {
        inner: Box<dyn SeekRead>,
        mark: Option<u64>,
    },
    Buffered(BufferedSource),
}

struct BufferedSource {
    inner: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    replay: usize,
    limit: usize,
    marked: bool,
    mark_valid: bool,
}

impl BufferedSource {
    fn mark(&mut self, read_limit: usize) {
        self.buffer.drain(..self.replay);
        self.replay = 0;
        self.limit = read_limit;
        self.marked = true;
        self.mark_valid = self.buffer.len() <= read_limit;
        if !self.mark_valid {
            self.buffer = Vec::new();
        }
    }

    fn reset(&mut self) -> io::Result<()> {
        if !self.marked {
            return Err(io::Error::other("body was never marked"));
        }
        if !self.mark_valid {
            return Err(io::Error::other(format!(
                "read limit of {} bytes exceeded since mark",
                self.limit
            )));
        }
        self.replay = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replay < self.buffer.len() {
            let count = buf.len().min(self.buffer.len() - self.replay);
            buf[..count].copy_from_slice(&self.buffer[self.replay..self.replay + count]);
            self.replay += count;
            return Ok(count);
        }

        let count = self.inner.read(buf)?;
        if self.marked && self.mark_valid && count > 0 {
            if self.buffer.len() + count <= self.limit {
                self.buffer.extend_from_slice(&buf[..count]);
                self.replay = self.buffer.len();
            } else {
                self.mark_valid = false;
                self.buffer = Vec::new();
                self.replay = 0;
            }
        }
        Ok(count)
    }
}

/// Injected I/O failures for exercising retry and replay paths.
#[cfg(any(test, feature = "fault-injection"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultInjection {
    bytes_read_before_error: u64,
    max_errors: usize,
    reset_interval: usize,
}

#[cfg(any(test, feature = "fault-injection"))]
impl FaultInjection {
    pub fn after_bytes(bytes_read_before_error: u64) -> Self {
        Self {
            bytes_read_before_error,
            max_errors: 1,
            reset_interval: 0,
        }
    }

    pub fn max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// With an interval of `n`, only every `n`-th pass over the body (counted by resets) fails.
    pub fn reset_interval(mut self, reset_interval: usize) -> Self {
        self.reset_interval = reset_interval;
        self
    }
}

#[cfg(any(test, feature = "fault-injection"))]
#[derive(Debug)]
struct FaultState {
    config: FaultInjection,
    errors: usize,
    position: u64,
    marked: u64,
    resets: usize,
}

#[cfg(any(test, feature = "fault-injection"))]
impl FaultState {
    fn trigger(&mut self) -> io::Result<()> {
        if self.errors >= self.config.max_errors {
            return Ok(());
        }
        if self.position < self.config.bytes_read_before_error {
            return Ok(());
        }
        let interval = self.config.reset_interval;
        if interval > 0 && self.resets % interval != interval - 1 {
            return Ok(());
        }
        self.errors += 1;
        Err(io::Error::other(format!(
            "injected io error {} after {} bytes",
            self.errors, self.position
        )))
    }
}

/// A request payload that can be marked before the first attempt and rewound before each retry.
pub struct ReplayableBody {
    source: Source,
    content_length: Option<u64>,
    transferred: u64,
    progress: Option<Arc<dyn ProgressListener>>,
    #[cfg(any(test, feature = "fault-injection"))]
    fault: Option<FaultState>,
}

impl ReplayableBody {
    fn with_source(source: Source, content_length: Option<u64>) -> Self {
        Self {
            source,
            content_length,
            transferred: 0,
            progress: None,
            #[cfg(any(test, feature = "fault-injection"))]
            fault: None,
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let length = data.len() as u64;
        Self::with_source(
            Source::Bytes {
                data,
                position: 0,
                mark: 0,
            },
            Some(length),
        )
    }

    pub fn from_file(mut file: File) -> io::Result<Self> {
        let start = file.stream_position()?;
        let length = file.metadata()?.len().saturating_sub(start);
        let mut body = Self::from_seekable(file);
        body.content_length = Some(length);
        Ok(body)
    }

    /// Seekable sources rewind by seeking back to the mark instead of buffering.
    pub fn from_seekable<R>(reader: R) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        Self::with_source(
            Source::Seekable {
                inner: Box::new(reader),
                mark: None,
            },
            None,
        )
    }

    /// Other readers keep the bytes read since the mark, up to the read limit, for replay.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::with_source(
            Source::Buffered(BufferedSource {
                inner: Box::new(reader),
                buffer: Vec::new(),
                replay: 0,
                limit: DEFAULT_READ_LIMIT,
                marked: false,
                mark_valid: false,
            }),
            None,
        )
    }

    pub fn with_content_length(mut self, content_length: u64) -> Self {
        self.content_length = Some(content_length);
        self
    }

    #[cfg(any(test, feature = "fault-injection"))]
    pub fn with_fault_injection(mut self, config: FaultInjection) -> Self {
        self.fault = Some(FaultState {
            config,
            errors: 0,
            position: 0,
            marked: 0,
            resets: 0,
        });
        self
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Bytes read since the last mark or reset.
    pub fn bytes_transferred(&self) -> u64 {
        self.transferred
    }

    pub fn set_progress_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.progress = Some(listener);
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.source, Source::Buffered(_))
    }

    pub fn mark(&mut self, read_limit: usize) {
        match &mut self.source {
            Source::Bytes { position, mark, .. } => *mark = *position,
            Source::Seekable { inner, mark } => {
                *mark = match inner.stream_position() {
                    Ok(position) => Some(position),
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to record body position for replay");
                        None
                    }
                };
            }
            Source::Buffered(buffered) => buffered.mark(read_limit),
        }
        self.transferred = 0;
        #[cfg(any(test, feature = "fault-injection"))]
        if let Some(fault) = &mut self.fault {
            fault.marked = fault.position;
        }
    }

    pub fn reset(&mut self) -> io::Result<()> {
        self.rewind(true)
    }

    /// Rewinds after the call finished; listeners are not told about it.
    pub(crate) fn reset_silently(&mut self) -> io::Result<()> {
        self.rewind(false)
    }

    fn rewind(&mut self, notify: bool) -> io::Result<()> {
        #[cfg(any(test, feature = "fault-injection"))]
        if let Some(fault) = &mut self.fault {
            fault.resets += 1;
        }

        match &mut self.source {
            Source::Bytes { position, mark, .. } => *position = *mark,
            Source::Seekable { inner, mark } => {
                let Some(mark) = *mark else {
                    return Err(io::Error::other("body position was never recorded"));
                };
                inner.seek(SeekFrom::Start(mark))?;
            }
            Source::Buffered(buffered) => buffered.reset()?,
        }

        #[cfg(any(test, feature = "fault-injection"))]
        if let Some(fault) = &mut self.fault {
            fault.position = fault.marked;
        }
        if notify && self.transferred > 0 {
            publish(
                self.progress.as_ref(),
                ProgressEvent::RequestBytesReset(self.transferred),
            );
        }
        self.transferred = 0;
        Ok(())
    }

    fn read_source(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::Bytes { data, position, .. } => {
                let remaining = &data[*position..];
                let count = remaining.len().min(buf.len());
                buf[..count].copy_from_slice(&remaining[..count]);
                *position += count;
                Ok(count)
            }
            Source::Seekable { inner, .. } => inner.read(buf),
            Source::Buffered(buffered) => buffered.read(buf),
        }
    }
}

impl Read for ReplayableBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(any(test, feature = "fault-injection"))]
        if let Some(fault) = &mut self.fault {
            fault.trigger()?;
        }

        let count = self.read_source(buf)?;
        self.transferred += count as u64;

        #[cfg(any(test, feature = "fault-injection"))]
        if let Some(fault) = &mut self.fault {
            fault.position += count as u64;
            fault.trigger()?;
        }

        if count > 0 {
            publish(
                self.progress.as_ref(),
                ProgressEvent::RequestBytesTransferred(count as u64),
            );
        }
        Ok(count)
    }
}

impl fmt::Debug for ReplayableBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Bytes { .. } => "bytes",
            Source::Seekable { .. } => "seekable",
            Source::Buffered(_) => "buffered",
        };
        formatter
            .debug_struct("ReplayableBody")
            .field("source", &source)
            .field("content_length", &self.content_length)
            .field("transferred", &self.transferred)
            .finish()
    }
}

impl From<Bytes> for ReplayableBody {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for ReplayableBody {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl From<String> for ReplayableBody {
    fn from(data: String) -> Self {
        Self::from_bytes(data)
    }
}

impl From<&'static str> for ReplayableBody {
    fn from(data: &'static str) -> Self {
        Self::from_bytes(data)
    }
}
