//! The follower role of a replicated log.
//!
//! A [`LogFollower`] accepts [`AppendEntriesRequest`]s from exactly one leader in exactly one term. A request
//! is checked in full before anything is changed:
//! 1. The leader id and term must be the ones the follower was constructed with.
//! 2. The follower must still hold its [`LogCore`].
//! 3. The entry at `prev_log_index` must exist locally with `prev_log_term` (index 0 always matches).
//! 4. The entries must continue `prev_log_index` without gaps and without lowering the term.
//!
//! Only then are local entries after `prev_log_index` removed (first from the persisted log, then from
//! the in-memory log) and the new entries appended. A rejected request leaves the log untouched.
//!
//! The leader learns what the follower has through the [`AbstractFollower`] trait, which in-process
//! followers and network proxies to remote followers implement alike.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::in_memory_log::InMemoryLog;
use super::messages::{AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult};
use super::participant::{ConstructionError, LogError, LogRole};
use super::persisted::LogCore;
use super::status::FollowerStatus;
use super::wait_for::{Resolution, Resolver, WaitForFuture, WaitForQueue};
use crate::events::{BecomeFollowerEvent, Event, ReceiveAppendEntriesEvent, ResignEvent};
use crate::promise::{BrokenPromise, Future};
use crate::types::{LogId, LogIndex, LogTerm, ParticipantId, QuorumData};

/// Resolves with the follower's answer, or fails if the follower could not be reached.
pub type AppendEntriesFuture = Future<Result<AppendEntriesResult, FollowerError>>;

/// A follower as seen by its leader.
pub trait AbstractFollower: Send + Sync {
    fn participant_id(&self) -> &ParticipantId;

    /// Send `request` to the follower. Transport failures must resolve the future with an error rather
    /// than panic.
    fn append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesFuture;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowerError {
    Unreachable(String),
    Timeout,
    Storage(String),
    BrokenPromise,
}

impl From<BrokenPromise> for FollowerError {
    fn from(_: BrokenPromise) -> Self {
        FollowerError::BrokenPromise
    }
}

pub struct LogFollower {
    participant_id: ParticipantId,
    leader_id: ParticipantId,
    term: LogTerm,
    log_id: LogId,
    guarded: Mutex<GuardedFollowerData>,
    event_publisher: Option<Sender<Event>>,
}

struct GuardedFollowerData {
    in_memory_log: InMemoryLog,
    log_core: Option<LogCore>,
    commit_index: LogIndex,
    wait_for_queue: WaitForQueue,
    resolver: Resolver,
}

impl LogFollower {
    /// Create a follower of `leader_id` in `term`, restoring its in-memory log from `log_core`.
    pub fn construct(
        participant_id: ParticipantId,
        log_core: LogCore,
        term: LogTerm,
        leader_id: ParticipantId,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Arc<LogFollower>, ConstructionError> {
        let in_memory_log = match log_core
            .read_all()
            .map_err(LogError::from)
            .and_then(|entries| InMemoryLog::from_entries(entries).map_err(LogError::from))
        {
            Ok(in_memory_log) => in_memory_log,
            Err(error) => return Err(ConstructionError { log_core, error }),
        };
        let log_id = log_core.log_id();

        Event::publish(
            &event_publisher,
            Event::BecomeFollower(BecomeFollowerEvent {
                timestamp: SystemTime::now(),
                log_id,
                term,
                leader: leader_id.clone(),
            }),
        );

        Ok(Arc::new(LogFollower {
            participant_id,
            leader_id,
            term,
            log_id,
            guarded: Mutex::new(GuardedFollowerData {
                in_memory_log,
                log_core: Some(log_core),
                commit_index: LogIndex::new(0),
                wait_for_queue: WaitForQueue::new(),
                resolver: Resolver::start(),
            }),
            event_publisher,
        }))
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn leader_id(&self) -> &ParticipantId {
        &self.leader_id
    }

    pub fn term(&self) -> LogTerm {
        self.term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.lock().commit_index
    }

    /// A snapshot of the follower's in-memory log.
    pub fn in_memory_log(&self) -> InMemoryLog {
        self.lock().in_memory_log.clone()
    }

    pub fn status(&self) -> FollowerStatus {
        let guarded = self.lock();
        FollowerStatus {
            local: guarded.in_memory_log.statistics(guarded.commit_index),
            leader: self.leader_id.clone(),
            term: self.term,
        }
    }

    /// Future that resolves once `index` is committed, as far as this follower knows.
    pub fn wait_for(&self, index: LogIndex) -> WaitForFuture {
        let mut guarded = self.lock();
        if guarded.log_core.is_none() {
            return Future::ready(Err(LogError::FollowerResigned));
        }
        let future = guarded.wait_for_queue.register(index);
        if index <= guarded.commit_index {
            self.resolve_committed(&mut guarded);
        }
        future
    }

    /// Check and apply an append entries request.
    ///
    /// Rejections are returned as an unsuccessful [`AppendEntriesResult`]; storage failures are returned
    /// as a [`FollowerError`] so the leader retries the same request later.
    pub fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResult, FollowerError> {
        let mut guarded = self.lock();
        let prev_log_index = request.prev_log_index;
        let num_entries = request.entries.len();
        let result = self.apply_append_entries(&mut guarded, request);

        if let Ok(result) = &result {
            if !result.success {
                log::debug!(
                    "follower {} of log {} rejected append entries after {}: {}",
                    self.participant_id,
                    self.log_id,
                    prev_log_index,
                    result.reason.message()
                );
            }
            Event::publish(
                &self.event_publisher,
                Event::ReceiveAppendEntries(ReceiveAppendEntriesEvent {
                    timestamp: SystemTime::now(),
                    log_id: self.log_id,
                    leader: self.leader_id.clone(),
                    prev_log_index,
                    num_entries,
                    result: *result,
                }),
            );
        }
        result
    }

    fn apply_append_entries(
        &self,
        guarded: &mut GuardedFollowerData,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResult, FollowerError> {
        let reject = |reason| Ok(AppendEntriesResult::reject(self.term, reason));

        if request.leader_id != self.leader_id {
            return reject(AppendEntriesErrorReason::InvalidLeaderId);
        }
        if request.leader_term != self.term {
            return reject(AppendEntriesErrorReason::WrongTerm);
        }
        let log_core = match guarded.log_core.as_mut() {
            Some(log_core) => log_core,
            None => return reject(AppendEntriesErrorReason::LostLogCore),
        };

        let prev_log_index = request.prev_log_index;
        if prev_log_index > LogIndex::new(0) {
            match guarded.in_memory_log.entry(prev_log_index) {
                Some(entry) if entry.term() == request.prev_log_term => (),
                _ => return reject(AppendEntriesErrorReason::NoPrevLogMatch),
            }
        }

        let mut expected_index = prev_log_index + 1;
        let mut last_term = request.prev_log_term;
        for entry in &request.entries {
            if entry.index() != expected_index || entry.term() < last_term || entry.term() > self.term {
                return reject(AppendEntriesErrorReason::MalformedEntries);
            }
            expected_index += 1;
            last_term = entry.term();
        }

        if guarded.in_memory_log.last_index() > prev_log_index {
            log_core
                .remove_back(prev_log_index + 1)
                .map_err(|err| FollowerError::Storage(err.to_string()))?;
            guarded.in_memory_log = guarded.in_memory_log.remove_back(prev_log_index + 1);
        }

        if !request.entries.is_empty() {
            log_core
                .insert(&mut request.entries.iter().cloned())
                .map_err(|err| FollowerError::Storage(err.to_string()))?;
            guarded.in_memory_log = guarded
                .in_memory_log
                .append(request.entries)
                .map_err(|err| FollowerError::Storage(err.to_string()))?;
        }

        let commit_index = std::cmp::min(request.leader_commit, guarded.in_memory_log.last_index());
        if commit_index > guarded.commit_index {
            guarded.commit_index = commit_index;
            self.resolve_committed(guarded);
        }

        Ok(AppendEntriesResult::success(self.term))
    }

    fn resolve_committed(&self, guarded: &mut GuardedFollowerData) {
        let promises = guarded.wait_for_queue.take_up_to(guarded.commit_index);
        let quorum = Arc::new(QuorumData {
            index: guarded.commit_index,
            term: self.term,
            quorum: Vec::new(),
        });
        guarded.resolver.submit(Resolution::Commit { promises, quorum });
    }

    /// Give up the [`LogCore`]. Pending waiters fail with [`LogError::FollowerResigned`], and the follower
    /// rejects every later request with [`AppendEntriesErrorReason::LostLogCore`].
    pub fn resign(&self) -> Result<LogCore, LogError> {
        let mut guarded = self.lock();
        let log_core = guarded.log_core.take().ok_or(LogError::FollowerResigned)?;
        let promises = guarded.wait_for_queue.take_all();
        guarded.resolver.submit(Resolution::Fail {
            promises,
            error: LogError::FollowerResigned,
        });
        guarded.resolver.shutdown();
        drop(guarded);

        Event::publish(
            &self.event_publisher,
            Event::Resign(ResignEvent {
                timestamp: SystemTime::now(),
                log_id: self.log_id,
                role: LogRole::Follower,
                term: Some(self.term),
            }),
        );
        Ok(log_core)
    }

    fn lock(&self) -> MutexGuard<'_, GuardedFollowerData> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AbstractFollower for LogFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    fn append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesFuture {
        Future::ready(self.handle_append_entries(request))
    }
}
