//! Append-only, gap-free event log.
//!
//! Appends are serialized by the backend writer lock. While holding it, a
//! [`LogWriter`] first reads every record other writers appended since this
//! process last looked, so the next sequence number is always `last + 1`.
//! A final line without its newline can only come from an appender that died
//! mid-write; the next lock holder truncates it, which leaves no trace of the
//! failed append.

use crate::core::backend::{Backend, WriterLock};
use crate::core::error::BoardError;
use crate::core::events::{Event, EventRecord};
use chrono::{DateTime, Utc};
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Last complete record known to this process: its sequence and the byte offset just past it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogTail {
    pub sequence: u64,
    pub offset: u64,
}

#[derive(Debug)]
pub struct EventLog {
    backend: Arc<dyn Backend>,
    tail: Mutex<LogTail>,
}

impl EventLog {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            tail: Mutex::new(LogTail::default()),
        }
    }

    /// Standalone append: lock, catch up, write one record.
    pub fn append(&self, event: Event, timestamp: DateTime<Utc>) -> Result<EventRecord, BoardError> {
        let mut writer = self.lock()?;
        writer.append(event, timestamp)
    }

    /// Records with `sequence >= from`, in order. Lazy, and restartable from any sequence.
    pub fn read_from(&self, from: u64) -> Result<EventStream<'_>, BoardError> {
        let reader = self.backend.log_reader(0)?;
        Ok(EventStream::new(reader, LogTail::default()).skip_below(from))
    }

    pub(crate) fn read_after(&self, tail: LogTail) -> Result<EventStream<'_>, BoardError> {
        let reader = self.backend.log_reader(tail.offset)?;
        Ok(EventStream::new(reader, tail))
    }

    pub fn lock(&self) -> Result<LogWriter<'_>, BoardError> {
        let guard = self.backend.lock()?;
        let mut writer = LogWriter {
            log: self,
            _guard: guard,
            tail: self.tail(),
            pending: Vec::new(),
            torn_bytes: 0,
        };
        writer.catch_up()?;
        Ok(writer)
    }

    pub fn tail(&self) -> LogTail {
        *self.tail.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next lock resumes reading at `tail` (used after loading a checkpoint).
    pub(crate) fn resume_at(&self, tail: LogTail) {
        *self.tail.lock().unwrap_or_else(|e| e.into_inner()) = tail;
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }
}

pub struct LogWriter<'a> {
    log: &'a EventLog,
    _guard: WriterLock<'a>,
    tail: LogTail,
    pending: Vec<EventRecord>,
    torn_bytes: u64,
}

impl<'a> LogWriter<'a> {
    fn catch_up(&mut self) -> Result<(), BoardError> {
        let len = self.log.backend.log_len()?;
        if len < self.tail.offset {
            return Err(BoardError::CorruptLog {
                offset: len,
                reason: format!(
                    "event log is shorter than the last known record end ({} bytes)",
                    self.tail.offset
                ),
            });
        }
        let mut stream = self.log.read_after(self.tail)?;
        let mut records = Vec::new();
        for record in stream.by_ref() {
            records.push(record?);
        }
        if let Some(torn_at) = stream.torn_tail() {
            self.torn_bytes = len.saturating_sub(torn_at);
            warn!(
                offset = torn_at,
                bytes = self.torn_bytes,
                "discarding torn event record left by an interrupted append"
            );
            self.log.backend.truncate_log(torn_at)?;
        }
        self.set_tail(stream.tail());
        self.pending.extend(records);
        Ok(())
    }

    /// Records appended by other writers since this process last held the lock.
    pub fn take_pending(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.pending)
    }

    /// Bytes of an interrupted append removed when the lock was taken.
    pub fn torn_bytes(&self) -> u64 {
        self.torn_bytes
    }

    pub fn append(&mut self, event: Event, timestamp: DateTime<Utc>) -> Result<EventRecord, BoardError> {
        let record = EventRecord::seal(self.tail.sequence + 1, timestamp, event)?;
        let line = record.to_line()?;
        self.log.backend.append_log(&line)?;
        self.set_tail(LogTail {
            sequence: record.sequence,
            offset: self.tail.offset + line.len() as u64,
        });
        Ok(record)
    }

    pub fn tail(&self) -> LogTail {
        self.tail
    }

    fn set_tail(&mut self, tail: LogTail) {
        self.tail = tail;
        self.log.resume_at(tail);
    }
}

/// Iterator over verified records. Stops for good at the first error.
pub struct EventStream<'a> {
    reader: Box<dyn BufRead + Send + 'a>,
    tail: LogTail,
    skip_below: u64,
    torn_tail: Option<u64>,
    done: bool,
}

impl<'a> EventStream<'a> {
    fn new(reader: Box<dyn BufRead + Send + 'a>, start: LogTail) -> Self {
        Self {
            reader,
            tail: start,
            skip_below: 0,
            torn_tail: None,
            done: false,
        }
    }

    fn skip_below(mut self, sequence: u64) -> Self {
        self.skip_below = sequence;
        self
    }

    /// Position just past the last complete record read so far.
    pub fn tail(&self) -> LogTail {
        self.tail
    }

    /// Byte offset of a trailing partial record, if the stream ended on one.
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_tail
    }

    fn fail(&mut self, err: BoardError) -> Option<Result<EventRecord, BoardError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for EventStream<'_> {
    type Item = Result<EventRecord, BoardError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let mut buf = Vec::new();
            let read = match self.reader.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) => return self.fail(BoardError::IoError(e)),
            };
            if read == 0 {
                self.done = true;
                return None;
            }
            let line_start = self.tail.offset;
            if buf.last() != Some(&b'\n') {
                self.torn_tail = Some(line_start);
                self.done = true;
                return None;
            }
            let text = match std::str::from_utf8(&buf) {
                Ok(t) => t.trim(),
                Err(e) => {
                    return self.fail(BoardError::CorruptLog {
                        offset: line_start,
                        reason: format!("record is not UTF-8: {}", e),
                    });
                }
            };
            if text.is_empty() {
                self.tail.offset += read as u64;
                continue;
            }
            let record = match EventRecord::parse_line(text, line_start) {
                Ok(r) => r,
                Err(e) => return self.fail(e),
            };
            let expected = self.tail.sequence + 1;
            if record.sequence != expected {
                return self.fail(BoardError::CorruptLog {
                    offset: line_start,
                    reason: format!(
                        "expected sequence {} but found {}",
                        expected, record.sequence
                    ),
                });
            }
            self.tail = LogTail {
                sequence: record.sequence,
                offset: line_start + read as u64,
            };
            if record.sequence < self.skip_below {
                continue;
            }
            return Some(Ok(record));
        }
    }
}
