//! The durable storage contract of a replicated log and the handle that owns it.
//!
//! A [`PersistedLog`] is the boundary to physical storage. The replicated log never reads from it on the hot
//! path; it only reads it back when a participant is constructed, and otherwise appends to and truncates it.
//!
//! A [`LogCore`] owns the one [`PersistedLog`] of a replicated log. It cannot be cloned: exactly one
//! participant holds it at any time, and it is moved out of a participant when that participant resigns.

use std::fmt::{self, Display, Formatter};

use crate::types::{LogEntry, LogId, LogIndex};

/// Entries read back from a [`PersistedLog`], in index order.
pub type PersistedLogIterator = Box<dyn Iterator<Item = Result<LogEntry, PersistedLogError>> + Send>;

pub trait PersistedLog: Send + 'static {
    fn log_id(&self) -> LogId;

    /// Durably append `entries`. Must not return before the entries are durable.
    fn insert(&mut self, entries: &mut dyn Iterator<Item = LogEntry>) -> Result<(), PersistedLogError>;

    /// Read all entries with an index of at least `start`.
    fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, PersistedLogError>;

    /// Remove all entries with an index lower than `stop`.
    fn remove_front(&mut self, stop: LogIndex) -> Result<(), PersistedLogError>;

    /// Remove all entries with an index of at least `start`.
    fn remove_back(&mut self, start: LogIndex) -> Result<(), PersistedLogError>;

    /// Remove the whole log. Every later call fails with [`PersistedLogError::Dropped`].
    fn drop_log(&mut self) -> Result<(), PersistedLogError>;
}

#[derive(Debug)]
pub enum PersistedLogError {
    Io { log_id: LogId, message: String },
    SerializeEntry { index: LogIndex, source: std::io::Error },
    DeserializeEntry { key: Vec<u8>, source: std::io::Error },
    Dropped { log_id: LogId },
}

impl Display for PersistedLogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PersistedLogError::Io { log_id, message } => {
                write!(f, "i/o error on log {}: {}", log_id, message)
            }
            PersistedLogError::SerializeEntry { index, source } => {
                write!(f, "could not serialize entry {}: {}", index, source)
            }
            PersistedLogError::DeserializeEntry { key, source } => {
                write!(f, "could not deserialize entry at key {:?}: {}", key, source)
            }
            PersistedLogError::Dropped { log_id } => write!(f, "log {} was dropped", log_id),
        }
    }
}

/// Owner of a log's [`PersistedLog`]. Moved between participants, never shared.
pub struct LogCore {
    persisted_log: Box<dyn PersistedLog>,
}

impl LogCore {
    pub fn new(persisted_log: impl PersistedLog) -> LogCore {
        LogCore {
            persisted_log: Box::new(persisted_log),
        }
    }

    pub fn log_id(&self) -> LogId {
        self.persisted_log.log_id()
    }

    pub fn insert(&mut self, entries: &mut dyn Iterator<Item = LogEntry>) -> Result<(), PersistedLogError> {
        self.persisted_log.insert(entries)
    }

    pub fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, PersistedLogError> {
        self.persisted_log.read(start)
    }

    /// Read every entry of the persisted log into memory.
    pub fn read_all(&self) -> Result<Vec<LogEntry>, PersistedLogError> {
        self.persisted_log
            .read(LogIndex::new(0))?
            .collect::<Result<Vec<_>, _>>()
    }

    pub fn remove_front(&mut self, stop: LogIndex) -> Result<(), PersistedLogError> {
        self.persisted_log.remove_front(stop)
    }

    pub fn remove_back(&mut self, start: LogIndex) -> Result<(), PersistedLogError> {
        self.persisted_log.remove_back(start)
    }

    /// Remove the log from storage, consuming the core.
    pub fn drop_log(mut self) -> Result<(), PersistedLogError> {
        self.persisted_log.drop_log()
    }
}
