//! Waiting for indices to commit.
//!
//! Participants keep the promises of `wait_for` callers in a [`WaitForQueue`] ordered by index. When the
//! commit index advances, the participant takes every promise up to the new commit index out of the queue
//! and, still under its own lock, submits them to its [`Resolver`]. The resolver is a dedicated thread that
//! fulfils the submitted batches one after the other. Batches reach the resolver in commit order and each
//! batch is ordered by index, so waiters are resolved in non-decreasing index order and never on a thread
//! that holds a participant lock.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use super::in_memory_log::InMemoryLogIterator;
use super::participant::LogError;
use crate::promise::{self, Future, Promise};
use crate::types::{LogIndex, QuorumData};

pub type WaitForResult = Result<Arc<QuorumData>, LogError>;

/// Resolves once the index it was created for is committed, or fails when the participant resigns.
pub type WaitForFuture = Future<WaitForResult>;

/// Resolves with an iterator over the committed entries from the index it was created for.
pub type WaitForIteratorFuture = Future<Result<InMemoryLogIterator, LogError>>;

pub(crate) type WaitForPromise = Promise<WaitForResult>;

#[derive(Default)]
pub(crate) struct WaitForQueue {
    waiters: BTreeMap<LogIndex, Vec<WaitForPromise>>,
}

impl WaitForQueue {
    pub(crate) fn new() -> WaitForQueue {
        WaitForQueue::default()
    }

    pub(crate) fn register(&mut self, index: LogIndex) -> WaitForFuture {
        let (promise, future) = promise::channel();
        self.waiters.entry(index).or_default().push(promise);
        future
    }

    /// Take out the promises of every index up to and including `commit_index`, in index order.
    pub(crate) fn take_up_to(&mut self, commit_index: LogIndex) -> Vec<WaitForPromise> {
        let pending = self.waiters.split_off(&(commit_index + 1));
        std::mem::replace(&mut self.waiters, pending)
            .into_values()
            .flatten()
            .collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<WaitForPromise> {
        std::mem::take(&mut self.waiters)
            .into_values()
            .flatten()
            .collect()
    }
}

pub(crate) enum Resolution {
    Commit {
        promises: Vec<WaitForPromise>,
        quorum: Arc<QuorumData>,
    },
    Fail {
        promises: Vec<WaitForPromise>,
        error: LogError,
    },
}

impl Resolution {
    fn is_empty(&self) -> bool {
        match self {
            Resolution::Commit { promises, .. } | Resolution::Fail { promises, .. } => promises.is_empty(),
        }
    }

    fn resolve(self) {
        match self {
            Resolution::Commit { promises, quorum } => promises
                .into_iter()
                .for_each(|promise| promise.fulfil(Ok(quorum.clone()))),
            Resolution::Fail { promises, error } => promises
                .into_iter()
                .for_each(|promise| promise.fulfil(Err(error.clone()))),
        }
    }
}

/// Handle to a participant's resolver thread. The thread exits once the handle is shut down or dropped and
/// every resolution submitted before that is resolved.
pub(crate) struct Resolver {
    sender: Option<Sender<Resolution>>,
}

impl Resolver {
    pub(crate) fn start() -> Resolver {
        let (sender, receiver) = mpsc::channel::<Resolution>();
        thread::spawn(move || {
            while let Ok(resolution) = receiver.recv() {
                resolution.resolve();
            }
        });
        Resolver {
            sender: Some(sender),
        }
    }

    /// Queue `resolution` behind every resolution submitted before it.
    pub(crate) fn submit(&self, resolution: Resolution) {
        if resolution.is_empty() {
            return;
        }
        match &self.sender {
            Some(sender) => {
                if let Err(mpsc::SendError(resolution)) = sender.send(resolution) {
                    resolution.resolve();
                }
            }
            None => resolution.resolve(),
        }
    }

    /// Stop the resolver thread once it has resolved what was submitted so far. Later submissions are
    /// resolved on the submitting thread.
    pub(crate) fn shutdown(&mut self) {
        self.sender = None;
    }
}
