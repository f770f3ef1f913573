/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A [`PersistedLog`] on top of a pluggable ordered key/value store.
//!
//! ## Layout
//!
//! Every entry of log `L` is stored under the key `L.to_be_bytes() ++ index.to_be_bytes()`, and its value
//! is the Borsh serialization of the [`LogEntry`]. Big-endian encoding keeps the entries of one log
//! adjacent and ordered by index, so reads and truncations are range operations.
//!
//! Several logs can share one store.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    persisted::{PersistedLog, PersistedLogError, PersistedLogIterator},
    pluggables::{KVStore, WriteBatch},
};
use crate::types::{LogEntry, LogId, LogIndex};

pub struct KeyValueLog<K: KVStore> {
    log_id: LogId,
    kv_store: K,
    dropped: bool,
}

impl<K: KVStore> KeyValueLog<K> {
    pub fn new(log_id: LogId, kv_store: K) -> KeyValueLog<K> {
        KeyValueLog {
            log_id,
            kv_store,
            dropped: false,
        }
    }

    fn entry_key(&self, index: LogIndex) -> Vec<u8> {
        concat(&self.log_id.to_be_bytes(), &index.to_be_bytes())
    }

    // Exclusive upper bound of this log's key range.
    fn end_key(&self) -> Vec<u8> {
        match self.log_id.int().checked_add(1) {
            Some(next) => next.to_be_bytes().to_vec(),
            None => vec![0xff; 17],
        }
    }

    fn check_alive(&self) -> Result<(), PersistedLogError> {
        if self.dropped {
            Err(PersistedLogError::Dropped {
                log_id: self.log_id,
            })
        } else {
            Ok(())
        }
    }

    fn write(&mut self, wb: K::WriteBatch) -> Result<(), PersistedLogError> {
        let log_id = self.log_id;
        self.kv_store
            .write(wb)
            .map_err(|error| PersistedLogError::Io {
                log_id,
                message: error.to_string(),
            })
    }

    fn delete_range(&mut self, from: Vec<u8>, to: Vec<u8>) -> Result<(), PersistedLogError> {
        let mut wb = K::WriteBatch::new();
        for (key, _) in self.kv_store.range(&from, &to) {
            wb.delete(&key);
        }
        self.write(wb)
    }
}

impl<K: KVStore> PersistedLog for KeyValueLog<K> {
    fn log_id(&self) -> LogId {
        self.log_id
    }

    fn insert(&mut self, entries: &mut dyn Iterator<Item = LogEntry>) -> Result<(), PersistedLogError> {
        self.check_alive()?;
        let mut wb = K::WriteBatch::new();
        for entry in entries {
            let value = entry
                .try_to_vec()
                .map_err(|source| PersistedLogError::SerializeEntry {
                    index: entry.index(),
                    source,
                })?;
            wb.set(&self.entry_key(entry.index()), &value);
        }
        self.write(wb)
    }

    fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, PersistedLogError> {
        self.check_alive()?;
        let pairs = self.kv_store.range(&self.entry_key(start), &self.end_key());
        Ok(Box::new(pairs.into_iter().map(|(key, value)| {
            LogEntry::deserialize(&mut value.as_slice())
                .map_err(|source| PersistedLogError::DeserializeEntry { key, source })
        })))
    }

    fn remove_front(&mut self, stop: LogIndex) -> Result<(), PersistedLogError> {
        self.check_alive()?;
        let (from, to) = (self.entry_key(LogIndex::new(0)), self.entry_key(stop));
        self.delete_range(from, to)
    }

    fn remove_back(&mut self, start: LogIndex) -> Result<(), PersistedLogError> {
        self.check_alive()?;
        let (from, to) = (self.entry_key(start), self.end_key());
        self.delete_range(from, to)
    }

    fn drop_log(&mut self) -> Result<(), PersistedLogError> {
        self.check_alive()?;
        let (from, to) = (self.entry_key(LogIndex::new(0)), self.end_key());
        self.delete_range(from, to)?;
        self.dropped = true;
        Ok(())
    }
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
