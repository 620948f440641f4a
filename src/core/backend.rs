//! Storage backends a board is built on.
//!
//! A backend owns the raw artifacts of one board: the event log bytes, the
//! document (representation A), the checkpoint, the SQLite index
//! (representation B), and the writer lock that serializes every appender,
//! across threads and across processes.

use crate::core::db;
use crate::core::error::BoardError;
use crate::core::schemas;
use fs2::FileExt;
use rusqlite::Connection;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub trait Backend: Send + Sync + fmt::Debug {
    /// Blocks until the caller is the only writer of this board.
    fn lock(&self) -> Result<WriterLock<'_>, BoardError>;
    fn log_len(&self) -> Result<u64, BoardError>;
    /// Reader positioned at byte `offset` of the event log.
    fn log_reader(&self, offset: u64) -> Result<Box<dyn BufRead + Send + '_>, BoardError>;
    /// Appends one complete record. Durable when this returns.
    fn append_log(&self, record: &[u8]) -> Result<(), BoardError>;
    fn truncate_log(&self, len: u64) -> Result<(), BoardError>;
    fn read_document(&self) -> Result<Option<Vec<u8>>, BoardError>;
    /// Replaces the document atomically: readers see the old or the new body, never a mix.
    fn write_document(&self, body: &[u8]) -> Result<(), BoardError>;
    fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, BoardError>;
    fn write_checkpoint(&self, body: &[u8]) -> Result<(), BoardError>;
    fn open_index(&self) -> Result<Connection, BoardError>;
    fn describe(&self) -> String;
}

/// Held for the duration of one append-and-dual-write cycle.
pub enum WriterLock<'a> {
    File(File),
    Memory(MutexGuard<'a, ()>),
}

impl Drop for WriterLock<'_> {
    fn drop(&mut self) {
        if let WriterLock::File(file) = self {
            let _ = FileExt::unlock(&*file);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    fsync: bool,
}

impl FileBackend {
    pub fn open(root: &Path, fsync: bool) -> Result<Self, BoardError> {
        fs::create_dir_all(root).map_err(BoardError::IoError)?;
        Ok(Self {
            root: root.to_path_buf(),
            fsync,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join(schemas::EVENTS_NAME)
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(schemas::DOCUMENT_NAME)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(schemas::BOARD_DB_NAME)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join(schemas::CHECKPOINT_NAME)
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, BoardError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BoardError::IoError(e)),
        }
    }

    /// Write to a sibling temp file, then rename into place.
    fn replace_atomically(&self, name: &str, body: &[u8]) -> Result<(), BoardError> {
        let tmp = self.root.join(format!(".{}.tmp", name));
        let mut f = File::create(&tmp).map_err(BoardError::IoError)?;
        f.write_all(body).map_err(BoardError::IoError)?;
        if self.fsync {
            f.sync_data().map_err(BoardError::IoError)?;
        }
        drop(f);
        fs::rename(&tmp, self.root.join(name)).map_err(BoardError::IoError)?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn lock(&self) -> Result<WriterLock<'_>, BoardError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(schemas::LOCK_NAME))
            .map_err(BoardError::IoError)?;
        file.lock_exclusive().map_err(BoardError::IoError)?;
        Ok(WriterLock::File(file))
    }

    fn log_len(&self) -> Result<u64, BoardError> {
        match fs::metadata(self.events_path()) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(BoardError::IoError(e)),
        }
    }

    fn log_reader(&self, offset: u64) -> Result<Box<dyn BufRead + Send + '_>, BoardError> {
        let mut file = match File::open(self.events_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && offset == 0 => {
                return Ok(Box::new(Cursor::new(Vec::new())));
            }
            Err(e) => return Err(BoardError::IoError(e)),
        };
        file.seek(SeekFrom::Start(offset))
            .map_err(BoardError::IoError)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn append_log(&self, record: &[u8]) -> Result<(), BoardError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())
            .map_err(BoardError::IoError)?;
        f.write_all(record).map_err(BoardError::IoError)?;
        if self.fsync {
            f.sync_data().map_err(BoardError::IoError)?;
        }
        Ok(())
    }

    fn truncate_log(&self, len: u64) -> Result<(), BoardError> {
        let f = OpenOptions::new()
            .write(true)
            .open(self.events_path())
            .map_err(BoardError::IoError)?;
        f.set_len(len).map_err(BoardError::IoError)?;
        f.sync_all().map_err(BoardError::IoError)?;
        Ok(())
    }

    fn read_document(&self) -> Result<Option<Vec<u8>>, BoardError> {
        Self::read_optional(&self.document_path())
    }

    fn write_document(&self, body: &[u8]) -> Result<(), BoardError> {
        self.replace_atomically(schemas::DOCUMENT_NAME, body)
    }

    fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, BoardError> {
        Self::read_optional(&self.checkpoint_path())
    }

    fn write_checkpoint(&self, body: &[u8]) -> Result<(), BoardError> {
        self.replace_atomically(schemas::CHECKPOINT_NAME, body)
    }

    fn open_index(&self) -> Result<Connection, BoardError> {
        db::db_connect(&self.index_path())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Everything in process memory. One board per backend: the index is a
/// private in-memory database of the connection that opens it.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    writer: Mutex<()>,
    log: Mutex<Vec<u8>>,
    document: Mutex<Option<Vec<u8>>>,
    checkpoint: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw log bytes, for inspection and fault injection in tests.
    pub fn log_bytes(&self) -> Vec<u8> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn replace_log_bytes(&self, bytes: Vec<u8>) -> Result<(), BoardError> {
        *guard(&self.log)? = bytes;
        Ok(())
    }
}

fn guard<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, BoardError> {
    m.lock()
        .map_err(|_| BoardError::ValidationError("memory backend lock poisoned".to_string()))
}

impl Backend for MemoryBackend {
    fn lock(&self) -> Result<WriterLock<'_>, BoardError> {
        Ok(WriterLock::Memory(guard(&self.writer)?))
    }

    fn log_len(&self) -> Result<u64, BoardError> {
        Ok(guard(&self.log)?.len() as u64)
    }

    fn log_reader(&self, offset: u64) -> Result<Box<dyn BufRead + Send + '_>, BoardError> {
        let log = guard(&self.log)?;
        let start = usize::try_from(offset)
            .ok()
            .filter(|s| *s <= log.len())
            .ok_or_else(|| BoardError::CorruptLog {
                offset,
                reason: format!("offset beyond end of log ({} bytes)", log.len()),
            })?;
        Ok(Box::new(Cursor::new(log[start..].to_vec())))
    }

    fn append_log(&self, record: &[u8]) -> Result<(), BoardError> {
        guard(&self.log)?.extend_from_slice(record);
        Ok(())
    }

    fn truncate_log(&self, len: u64) -> Result<(), BoardError> {
        let mut log = guard(&self.log)?;
        let len = usize::try_from(len).unwrap_or(usize::MAX).min(log.len());
        log.truncate(len);
        Ok(())
    }

    fn read_document(&self) -> Result<Option<Vec<u8>>, BoardError> {
        Ok(guard(&self.document)?.clone())
    }

    fn write_document(&self, body: &[u8]) -> Result<(), BoardError> {
        *guard(&self.document)? = Some(body.to_vec());
        Ok(())
    }

    fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, BoardError> {
        Ok(guard(&self.checkpoint)?.clone())
    }

    fn write_checkpoint(&self, body: &[u8]) -> Result<(), BoardError> {
        *guard(&self.checkpoint)? = Some(body.to_vec());
        Ok(())
    }

    fn open_index(&self) -> Result<Connection, BoardError> {
        db::db_connect_in_memory()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
