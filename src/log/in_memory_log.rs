//! The in-memory view of a replicated log.
//!
//! An [`InMemoryLog`] is a value: every mutating method returns a new log and leaves the old one intact.
//! Participants keep the current log behind their own mutex and swap in the new value after each change.
//! Anyone who took a clone or an iterator earlier keeps a frozen snapshot, and the unchanged parts of the
//! log are shared between all of them (see [`Sequence`]).

use std::fmt::{self, Display, Formatter};

use super::{sequence::{Sequence, SequenceIter}, status::LogStatistics};
use crate::types::{LogEntry, LogIndex, LogPayload, LogTerm};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InMemoryLogError {
    NonContiguousIndex { expected: LogIndex, found: LogIndex },
    DecreasingTerm { last: LogTerm, found: LogTerm },
}

impl Display for InMemoryLogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InMemoryLogError::NonContiguousIndex { expected, found } => {
                write!(f, "expected log index {}, found {}", expected, found)
            }
            InMemoryLogError::DecreasingTerm { last, found } => {
                write!(f, "term {} is lower than the last term {}", found, last)
            }
        }
    }
}

#[derive(Clone)]
pub struct InMemoryLog {
    first_index: LogIndex,
    entries: Sequence<LogEntry>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        InMemoryLog::new()
    }
}

impl InMemoryLog {
    pub fn new() -> InMemoryLog {
        InMemoryLog {
            first_index: LogIndex::new(1),
            entries: Sequence::new(),
        }
    }

    /// Build a log from entries read back from a persisted log. The entries must be contiguous.
    pub fn from_entries(entries: Vec<LogEntry>) -> Result<InMemoryLog, InMemoryLogError> {
        let first_index = entries.first().map_or(LogIndex::new(1), |entry| entry.index());
        let empty = InMemoryLog {
            first_index,
            entries: Sequence::new(),
        };
        empty.append(entries)
    }

    pub fn first_index(&self) -> LogIndex {
        self.first_index
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries
            .last()
            .map_or(self.first_index.saturating_sub(1), |entry| entry.index())
    }

    pub fn next_index(&self) -> LogIndex {
        self.last_index() + 1
    }

    pub fn last_term(&self) -> LogTerm {
        self.entries.last().map_or(LogTerm::default(), |entry| entry.term())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: LogIndex) -> Option<&LogEntry> {
        let position = index.int().checked_sub(self.first_index.int())?;
        self.entries.get(usize::try_from(position).ok()?)
    }

    /// Append `entries`, which must continue the log without gaps and without lowering the term.
    ///
    /// A violation is a bug in the caller: it trips a debug assertion, and in release builds the log is left
    /// unchanged and an error is returned.
    pub fn append(&self, entries: Vec<LogEntry>) -> Result<InMemoryLog, InMemoryLogError> {
        let mut expected = self.next_index();
        let mut last_term = self.last_term();
        for entry in &entries {
            if entry.index() != expected {
                debug_assert!(false, "non-contiguous append at {} (expected {})", entry.index(), expected);
                return Err(InMemoryLogError::NonContiguousIndex {
                    expected,
                    found: entry.index(),
                });
            }
            if entry.term() < last_term {
                debug_assert!(false, "term {} decreases below {}", entry.term(), last_term);
                return Err(InMemoryLogError::DecreasingTerm {
                    last: last_term,
                    found: entry.term(),
                });
            }
            expected += 1;
            last_term = entry.term();
        }

        Ok(InMemoryLog {
            first_index: self.first_index,
            entries: self.entries.append(&Sequence::from_vec(entries)),
        })
    }

    /// Append a single entry at the next index.
    pub fn push(&self, term: LogTerm, payload: LogPayload) -> InMemoryLog {
        debug_assert!(term >= self.last_term());
        InMemoryLog {
            first_index: self.first_index,
            entries: self
                .entries
                .push_back(LogEntry::new(term, self.next_index(), payload)),
        }
    }

    /// Keep only the entries with an index lower than `start`.
    pub fn remove_back(&self, start: LogIndex) -> InMemoryLog {
        let keep = start.int().saturating_sub(self.first_index.int());
        InMemoryLog {
            first_index: self.first_index,
            entries: self.entries.take(clamp(keep)),
        }
    }

    /// Drop the entries with an index lower than `stop`.
    pub fn remove_front(&self, stop: LogIndex) -> InMemoryLog {
        if stop <= self.first_index {
            return self.clone();
        }
        let drop = stop.int() - self.first_index.int();
        InMemoryLog {
            first_index: stop,
            entries: self.entries.skip(clamp(drop)),
        }
    }

    /// Iterate over a frozen snapshot of the log starting at `index`.
    pub fn iter_from(&self, index: LogIndex) -> InMemoryLogIterator {
        let position = index.int().saturating_sub(self.first_index.int());
        InMemoryLogIterator(self.entries.iter_from(clamp(position)))
    }

    /// Entries in `[from, to]`.
    pub fn slice(&self, from: LogIndex, to: LogIndex) -> Vec<LogEntry> {
        self.iter_from(from)
            .take_while(|entry| entry.index() <= to)
            .collect()
    }

    pub fn statistics(&self, commit_index: LogIndex) -> LogStatistics {
        LogStatistics {
            spear_head: self.last_index(),
            commit_index,
        }
    }
}

fn clamp(count: u64) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}

/// Restartable iterator over a snapshot of an [`InMemoryLog`]. Cloning it restarts from the current position.
#[derive(Clone)]
pub struct InMemoryLogIterator(SequenceIter<LogEntry>);

impl Iterator for InMemoryLogIterator {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        self.0.next()
    }
}
