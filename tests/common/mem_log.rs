//! A volatile [`PersistedLog`] whose contents stay observable after it is moved into a `LogCore`.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use replog_rs::log::persisted::{PersistedLog, PersistedLogError, PersistedLogIterator};
use replog_rs::types::{LogEntry, LogId, LogIndex, LogPayload, LogTerm};

#[derive(Clone)]
pub(crate) struct MemLog {
    log_id: LogId,
    entries: Arc<Mutex<BTreeMap<LogIndex, LogEntry>>>,
    fail_writes: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

impl MemLog {
    pub(crate) fn new(log_id: u64) -> MemLog {
        MemLog {
            log_id: LogId::new(log_id),
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A log that already holds one entry per term in `terms`, at indices 1, 2, ...
    pub(crate) fn with_terms(log_id: u64, terms: &[u64]) -> MemLog {
        let log = MemLog::new(log_id);
        {
            let mut entries = log.entries.lock().unwrap();
            for (i, term) in terms.iter().enumerate() {
                let index = LogIndex::new(i as u64 + 1);
                let payload = LogPayload::from(format!("entry {}", index).into_bytes());
                entries.insert(index, LogEntry::new(LogTerm::new(*term), index, payload));
            }
        }
        log
    }

    pub(crate) fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn terms(&self) -> Vec<u64> {
        self.entries().iter().map(|entry| entry.term().int()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst)
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), PersistedLogError> {
        if self.dropped.load(Ordering::SeqCst) {
            return Err(PersistedLogError::Dropped { log_id: self.log_id });
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistedLogError::Io {
                log_id: self.log_id,
                message: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

impl PersistedLog for MemLog {
    fn log_id(&self) -> LogId {
        self.log_id
    }

    fn insert(&mut self, entries: &mut dyn Iterator<Item = LogEntry>) -> Result<(), PersistedLogError> {
        self.check_writable()?;
        let mut stored = self.entries.lock().unwrap();
        for entry in entries {
            stored.insert(entry.index(), entry);
        }
        Ok(())
    }

    fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, PersistedLogError> {
        if self.dropped.load(Ordering::SeqCst) {
            return Err(PersistedLogError::Dropped { log_id: self.log_id });
        }
        let entries: Vec<_> = self
            .entries
            .lock()
            .unwrap()
            .range(start..)
            .map(|(_, entry)| Ok(entry.clone()))
            .collect();
        Ok(Box::new(entries.into_iter()))
    }

    fn remove_front(&mut self, stop: LogIndex) -> Result<(), PersistedLogError> {
        self.check_writable()?;
        let mut stored = self.entries.lock().unwrap();
        let rest = stored.split_off(&stop);
        *stored = rest;
        Ok(())
    }

    fn remove_back(&mut self, start: LogIndex) -> Result<(), PersistedLogError> {
        self.check_writable()?;
        let _ = self.entries.lock().unwrap().split_off(&start);
        Ok(())
    }

    fn drop_log(&mut self) -> Result<(), PersistedLogError> {
        self.check_writable()?;
        self.entries.lock().unwrap().clear();
        self.dropped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
