//! A reader/writer lock whose acquisition gives up after a timeout.
//!
//! Waiting writers hold back new readers, so a steady stream of readers cannot starve a writer.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::CollectionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

#[derive(Default)]
pub struct TimedRwLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl TimedRwLock {
    pub fn new() -> TimedRwLock {
        TimedRwLock::default()
    }

    /// Acquire shared access, waiting at most `timeout`. A zero timeout tries once. A timeout too large to
    /// form a deadline waits indefinitely.
    pub fn lock_read(&self, timeout: Duration) -> Result<ReadGuard<'_>, CollectionError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state();
        while state.writer || state.waiting_writers > 0 {
            state = self.wait_until(state, deadline, AccessMode::Read, timeout)?;
        }
        state.readers += 1;
        Ok(ReadGuard { lock: self })
    }

    /// Acquire exclusive access, waiting at most `timeout`. A zero timeout tries once. A timeout too large to
    /// form a deadline waits indefinitely.
    pub fn lock_write(&self, timeout: Duration) -> Result<WriteGuard<'_>, CollectionError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            state = match self.wait_until(state, deadline, AccessMode::Write, timeout) {
                Ok(state) => state,
                Err(err) => {
                    let mut state = self.state();
                    state.waiting_writers -= 1;
                    drop(state);
                    self.released.notify_all();
                    return Err(err);
                }
            };
        }
        state.waiting_writers -= 1;
        state.writer = true;
        Ok(WriteGuard { lock: self })
    }

    pub fn is_write_locked(&self) -> bool {
        self.state().writer
    }

    pub fn readers(&self) -> usize {
        self.state().readers
    }

    fn wait_until<'a>(
        &'a self,
        state: MutexGuard<'a, LockState>,
        deadline: Option<Instant>,
        mode: AccessMode,
        timeout: Duration,
    ) -> Result<MutexGuard<'a, LockState>, CollectionError> {
        let Some(deadline) = deadline else {
            return Ok(self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner));
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(CollectionError::LockTimeout { mode, timeout });
        }
        let (state, _) = self
            .released
            .wait_timeout(state, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state)
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared access to a [TimedRwLock], released on drop.
pub struct ReadGuard<'a> {
    lock: &'a TimedRwLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        state.readers -= 1;
        drop(state);
        self.lock.released.notify_all();
    }
}

/// Exclusive access to a [TimedRwLock], released on drop.
pub struct WriteGuard<'a> {
    lock: &'a TimedRwLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        state.writer = false;
        drop(state);
        self.lock.released.notify_all();
    }
}
