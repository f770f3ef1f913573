//! The leader role of a replicated log.
//!
//! ## Replication
//!
//! The leader keeps one [`FollowerInfo`] per participant, itself included: the leader's own entries are
//! persisted by a [`LocalFollower`] that writes into the leader's [`LogCore`], so the leader counts towards
//! the write concern through the same path as every other participant.
//!
//! [`LogLeader::run_async_step`] sends each follower the entries it has not acknowledged yet, together with
//! the current commit index. A follower gets at most one request at a time; the next one is prepared when
//! the answer arrives. Answers are handled as follows:
//! - Success: the follower's acknowledged index moves to the last index sent, and the commit index is
//!   recomputed.
//! - `NoPrevLogMatch`: the follower's log diverges or is shorter. Its acknowledged index steps back by one
//!   and the follower is asked again right away with an empty request. Once such a request succeeds the
//!   missing entries are sent in one request.
//! - A term higher than the leader's: the leader is stale. It stops replicating and fails its waiters.
//! - Any other rejection, or a failed future: the same request is retried after an exponential backoff of
//!   `retry_backoff_base * 2^min(errors, retry_backoff_max_exponent)`.
//!
//! Answers are queued and handled by whichever thread finds the queue idle, one after the other. A follower
//! that answers inline therefore never makes the leader recurse, however far it has to walk back.
//!
//! ## Commit index
//!
//! The participants are ordered by acknowledged index (descending), ties broken by participant id
//! (ascending). The first `write_concern` of them form the quorum, and the commit index is the acknowledged
//! index of the last of them. The commit index never moves back. A remote follower's acknowledged index
//! counts as 0 until it has answered a request successfully in this term.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use typed_builder::TypedBuilder;

use super::follower::{AbstractFollower, AppendEntriesFuture, FollowerError};
use super::in_memory_log::InMemoryLog;
use super::messages::{AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult};
use super::participant::{ConstructionError, LogError, LogRole};
use super::persisted::LogCore;
use super::status::{FollowerStatistics, LeaderStatus, LogStatistics};
use super::wait_for::{Resolution, Resolver, WaitForFuture, WaitForIteratorFuture, WaitForQueue};
use crate::events::*;
use crate::promise::{self, Future};
use crate::types::{LogEntry, LogId, LogIndex, LogPayload, LogTerm, ParticipantId, QuorumData};

/// Parameters of a leader.
#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [LeaderConfiguration]. On the builder call the following methods to construct a valid [LeaderConfiguration].

    Required:
    - `.write_concern(...)`

    Optional:
    - `.retry_backoff_base(...)`
    - `.retry_backoff_max_exponent(...)`
    - `.auto_replicate(...)`
"
))]
pub struct LeaderConfiguration {
    #[builder(setter(doc = "Set the number of participants, the leader included, that must acknowledge an index before it is committed. Required."))]
    pub write_concern: usize,
    #[builder(default = Duration::from_micros(100),
    setter(doc = "Set the delay before the first retry of a failed append entries request. Defaults to 100 microseconds."))]
    pub retry_backoff_base: Duration,
    #[builder(default = 17,
    setter(doc = "Set the largest power of two the retry delay is scaled by. Defaults to 17."))]
    pub retry_backoff_max_exponent: u32,
    #[builder(default = true,
    setter(doc = "Replicate from a background thread after every insert? If false, the owner calls `run_async_step`. Defaults to true."))]
    pub auto_replicate: bool,
}

/// Persists the leader's own entries into the leader's [`LogCore`].
struct LocalFollower {
    participant_id: ParticipantId,
    term: LogTerm,
    log_core: Mutex<Option<LogCore>>,
}

impl LocalFollower {
    fn take_log_core(&self) -> Option<LogCore> {
        self.log_core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl AbstractFollower for LocalFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    fn append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesFuture {
        let mut log_core = self.log_core.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match log_core.as_mut() {
            None => Ok(AppendEntriesResult::reject(
                self.term,
                AppendEntriesErrorReason::LostLogCore,
            )),
            Some(log_core) => log_core
                .insert(&mut request.entries.into_iter())
                .map(|()| AppendEntriesResult::success(self.term))
                .map_err(|err| FollowerError::Storage(err.to_string())),
        };
        Future::ready(result)
    }
}

struct FollowerInfo {
    follower: Arc<dyn AbstractFollower>,
    last_acked_index: LogIndex,
    last_acked_commit_index: LogIndex,
    // Whether the follower answered a request successfully in this term. Until it has, its acknowledged
    // index is only a starting guess and does not count towards the commit index.
    confirmed: bool,
    // Set after a `NoPrevLogMatch`: requests carry no entries until the follower accepts the previous index.
    walking_back: bool,
    request_in_flight: bool,
    num_errors_since_last_answer: u32,
    last_error_reason: AppendEntriesErrorReason,
    last_contact: Option<SystemTime>,
}

impl FollowerInfo {
    fn new(follower: Arc<dyn AbstractFollower>, last_acked_index: LogIndex, confirmed: bool) -> FollowerInfo {
        FollowerInfo {
            follower,
            last_acked_index,
            last_acked_commit_index: LogIndex::new(0),
            confirmed,
            walking_back: false,
            request_in_flight: false,
            num_errors_since_last_answer: 0,
            last_error_reason: AppendEntriesErrorReason::None,
            last_contact: None,
        }
    }

    fn statistics(&self) -> FollowerStatistics {
        FollowerStatistics {
            local: LogStatistics {
                spear_head: self.last_acked_index,
                commit_index: self.last_acked_commit_index,
            },
            last_error_reason: self.last_error_reason,
            last_error_message: self.last_error_reason.message().to_string(),
            request_in_flight: self.request_in_flight,
            num_errors_since_last_answer: self.num_errors_since_last_answer,
            last_contact: self.last_contact.and_then(|contact| {
                contact
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .ok()
                    .map(|since| since.as_millis() as u64)
            }),
        }
    }
}

struct PreparedAppendEntries {
    follower_index: usize,
    follower: Arc<dyn AbstractFollower>,
    request: AppendEntriesRequest,
    last_index: LogIndex,
    commit_index: LogIndex,
}

struct AppendEntriesResponse {
    follower_index: usize,
    last_index: LogIndex,
    commit_index: LogIndex,
    outcome: Result<AppendEntriesResult, FollowerError>,
}

#[derive(Default)]
struct ResponseQueue {
    responses: VecDeque<AppendEntriesResponse>,
    draining: bool,
}

enum ResponseAction {
    Continue,
    Retry(Duration),
    Stale(LogTerm),
}

pub struct LogLeader {
    participant_id: ParticipantId,
    term: LogTerm,
    log_id: LogId,
    config: LeaderConfiguration,
    local_follower: Arc<LocalFollower>,
    guarded: Mutex<GuardedLeaderData>,
    responses: Mutex<ResponseQueue>,
    weak_self: Weak<LogLeader>,
    event_publisher: Option<Sender<Event>>,
}

struct GuardedLeaderData {
    in_memory_log: InMemoryLog,
    followers: Vec<FollowerInfo>,
    commit_index: LogIndex,
    last_quorum: Option<Arc<QuorumData>>,
    wait_for_queue: WaitForQueue,
    resolver: Resolver,
    did_resign: bool,
    stale: Option<LogTerm>,
    step_trigger: Option<Sender<()>>,
}

impl LogLeader {
    /// Create the leader of `term`, restoring its in-memory log from `log_core`.
    ///
    /// Remote followers are assumed to hold everything but the last entry, so the first request checks the
    /// tail of their log and reconciliation walks back from there.
    pub fn construct(
        participant_id: ParticipantId,
        log_core: LogCore,
        term: LogTerm,
        followers: Vec<Arc<dyn AbstractFollower>>,
        config: LeaderConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Arc<LogLeader>, ConstructionError> {
        let participants = followers.len() + 1;
        if config.write_concern == 0 || config.write_concern > participants {
            return Err(ConstructionError {
                log_core,
                error: LogError::WriteConcernUnsatisfiable {
                    write_concern: config.write_concern,
                    participants,
                },
            });
        }

        let in_memory_log = match log_core
            .read_all()
            .map_err(LogError::from)
            .and_then(|entries| InMemoryLog::from_entries(entries).map_err(LogError::from))
        {
            Ok(in_memory_log) => in_memory_log,
            Err(error) => return Err(ConstructionError { log_core, error }),
        };

        let log_id = log_core.log_id();
        let last_index = in_memory_log.last_index();
        let follower_ids = followers
            .iter()
            .map(|follower| follower.participant_id().clone())
            .collect();
        let local_follower = Arc::new(LocalFollower {
            participant_id: participant_id.clone(),
            term,
            log_core: Mutex::new(Some(log_core)),
        });
        let mut follower_infos = vec![FollowerInfo::new(local_follower.clone(), last_index, true)];
        follower_infos.extend(
            followers
                .into_iter()
                .map(|follower| FollowerInfo::new(follower, last_index.saturating_sub(1), false)),
        );

        Event::publish(
            &event_publisher,
            Event::BecomeLeader(BecomeLeaderEvent {
                timestamp: SystemTime::now(),
                log_id,
                term,
                write_concern: config.write_concern,
                followers: follower_ids,
            }),
        );

        let auto_replicate = config.auto_replicate;
        let leader = Arc::new_cyclic(|weak_self| LogLeader {
            participant_id,
            term,
            log_id,
            config,
            local_follower,
            guarded: Mutex::new(GuardedLeaderData {
                in_memory_log,
                followers: follower_infos,
                commit_index: LogIndex::new(0),
                last_quorum: None,
                wait_for_queue: WaitForQueue::new(),
                resolver: Resolver::start(),
                did_resign: false,
                stale: None,
                step_trigger: None,
            }),
            responses: Mutex::new(ResponseQueue::default()),
            weak_self: weak_self.clone(),
            event_publisher,
        });

        if auto_replicate {
            let step_trigger = leader.start_replication_worker();
            let _ = step_trigger.send(());
            leader.lock().step_trigger = Some(step_trigger);
        }
        Ok(leader)
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn term(&self) -> LogTerm {
        self.term
    }

    pub fn write_concern(&self) -> usize {
        self.config.write_concern
    }

    pub fn commit_index(&self) -> LogIndex {
        self.lock().commit_index
    }

    /// The quorum that committed the current commit index.
    pub fn last_quorum(&self) -> Option<Arc<QuorumData>> {
        self.lock().last_quorum.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.lock().stale.is_some()
    }

    /// A snapshot of the leader's in-memory log.
    pub fn in_memory_log(&self) -> InMemoryLog {
        self.lock().in_memory_log.clone()
    }

    /// The entry at `index`, if it is committed. Entries past the commit index are not returned even when
    /// the leader already holds them.
    pub fn read_replicated_entry(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError> {
        let guarded = self.lock();
        if guarded.did_resign {
            return Err(LogError::LeaderResigned);
        }
        if index > guarded.commit_index {
            return Ok(None);
        }
        Ok(guarded.in_memory_log.entry(index).cloned())
    }

    /// The committed prefix of the log.
    pub fn replicated_log_snapshot(&self) -> Result<InMemoryLog, LogError> {
        let guarded = self.lock();
        if guarded.did_resign {
            return Err(LogError::LeaderResigned);
        }
        Ok(guarded.in_memory_log.remove_back(guarded.commit_index + 1))
    }

    /// Future that resolves, once `index` is committed, with an iterator over the committed entries
    /// starting at `index`.
    pub fn wait_for_iterator(&self, index: LogIndex) -> WaitForIteratorFuture {
        let (promise, future) = promise::channel();
        let weak_self = self.weak_self.clone();
        self.wait_for(index).then(move |outcome| {
            let result = match outcome {
                Ok(Ok(_quorum)) => match weak_self.upgrade() {
                    Some(leader) => leader
                        .replicated_log_snapshot()
                        .map(|committed| committed.iter_from(index)),
                    None => Err(LogError::LeaderResigned),
                },
                Ok(Err(error)) => Err(error),
                Err(broken) => Err(broken.into()),
            };
            promise.fulfil(result);
        });
        future
    }

    /// Append `payload` at the next index and return the index. Replication happens later, either on the
    /// replication thread or in the next [`run_async_step`](Self::run_async_step).
    pub fn insert(&self, payload: impl Into<LogPayload>) -> Result<LogIndex, LogError> {
        let mut guarded = self.lock();
        self.check_active(&guarded)?;
        let index = guarded.in_memory_log.next_index();
        guarded.in_memory_log = guarded.in_memory_log.push(self.term, payload.into());
        if let Some(step_trigger) = &guarded.step_trigger {
            let _ = step_trigger.send(());
        }
        drop(guarded);

        Event::publish(
            &self.event_publisher,
            Event::InsertEntry(InsertEntryEvent {
                timestamp: SystemTime::now(),
                log_id: self.log_id,
                term: self.term,
                index,
            }),
        );
        Ok(index)
    }

    /// Future that resolves with the quorum once `index` is committed. Fails right away if the leader has
    /// resigned or is stale.
    pub fn wait_for(&self, index: LogIndex) -> WaitForFuture {
        let mut guarded = self.lock();
        if let Err(error) = self.check_active(&guarded) {
            return Future::ready(Err(error));
        }
        let future = guarded.wait_for_queue.register(index);
        let commit_index = guarded.commit_index;
        if index <= commit_index {
            let quorum = guarded.last_quorum.clone().unwrap_or_else(|| {
                Arc::new(QuorumData {
                    index: commit_index,
                    term: self.term,
                    quorum: Vec::new(),
                })
            });
            let promises = guarded.wait_for_queue.take_up_to(commit_index);
            guarded
                .resolver
                .submit(Resolution::Commit { promises, quorum });
        }
        future
    }

    /// Send every follower that is idle and behind the entries or the commit index it is missing.
    pub fn run_async_step(&self) {
        let requests = {
            let mut guarded = self.lock();
            if self.check_active(&guarded).is_err() {
                return;
            }
            self.check_commit_index(&mut guarded);
            Self::prepare_append_entries(&self.participant_id, self.term, &mut guarded)
        };
        self.execute_append_entries(requests);
    }

    pub fn status(&self) -> LeaderStatus {
        let guarded = self.lock();
        LeaderStatus {
            local: guarded.in_memory_log.statistics(guarded.commit_index),
            term: self.term,
            write_concern: self.config.write_concern,
            stale: guarded.stale.is_some(),
            follower: guarded
                .followers
                .iter()
                .map(|info| (info.follower.participant_id().clone(), info.statistics()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Give up the [`LogCore`]. Pending waiters fail with [`LogError::LeaderResigned`]; later calls to
    /// `insert` and `wait_for` fail the same way, and answers to requests already sent are ignored.
    pub fn resign(&self) -> Result<LogCore, LogError> {
        let mut guarded = self.lock();
        if guarded.did_resign {
            return Err(LogError::LeaderResigned);
        }
        guarded.did_resign = true;
        guarded.step_trigger = None;
        let promises = guarded.wait_for_queue.take_all();
        guarded.resolver.submit(Resolution::Fail {
            promises,
            error: LogError::LeaderResigned,
        });
        guarded.resolver.shutdown();
        let log_core = self.local_follower.take_log_core();
        drop(guarded);

        Event::publish(
            &self.event_publisher,
            Event::Resign(ResignEvent {
                timestamp: SystemTime::now(),
                log_id: self.log_id,
                role: LogRole::Leader,
                term: Some(self.term),
            }),
        );
        log_core.ok_or(LogError::LeaderResigned)
    }

    fn check_active(&self, guarded: &GuardedLeaderData) -> Result<(), LogError> {
        if guarded.did_resign {
            return Err(LogError::LeaderResigned);
        }
        if let Some(observed_term) = guarded.stale {
            return Err(LogError::LeaderStale {
                term: self.term,
                observed_term,
            });
        }
        Ok(())
    }

    fn prepare_append_entries(
        leader_id: &ParticipantId,
        term: LogTerm,
        guarded: &mut GuardedLeaderData,
    ) -> Vec<PreparedAppendEntries> {
        let last_index = guarded.in_memory_log.last_index();
        let commit_index = guarded.commit_index;
        let in_memory_log = &guarded.in_memory_log;

        guarded
            .followers
            .iter_mut()
            .enumerate()
            .filter_map(|(follower_index, info)| {
                if info.request_in_flight {
                    return None;
                }
                if info.last_acked_index == last_index && info.last_acked_commit_index == commit_index {
                    return None;
                }

                let prev_log_index = info.last_acked_index;
                let prev_log_term = in_memory_log
                    .entry(prev_log_index)
                    .map_or(LogTerm::default(), |entry| entry.term());
                let (entries, sent_up_to) = if info.walking_back {
                    (Vec::new(), prev_log_index)
                } else {
                    (in_memory_log.slice(prev_log_index + 1, last_index), last_index)
                };
                info.request_in_flight = true;

                Some(PreparedAppendEntries {
                    follower_index,
                    follower: info.follower.clone(),
                    request: AppendEntriesRequest {
                        leader_term: term,
                        leader_id: leader_id.clone(),
                        prev_log_term,
                        prev_log_index,
                        leader_commit: commit_index,
                        entries,
                    },
                    last_index: sent_up_to,
                    commit_index,
                })
            })
            .collect()
    }

    fn execute_append_entries(&self, requests: Vec<PreparedAppendEntries>) {
        for prepared in requests {
            Event::publish(
                &self.event_publisher,
                Event::SendAppendEntries(SendAppendEntriesEvent {
                    timestamp: SystemTime::now(),
                    log_id: self.log_id,
                    follower: prepared.follower.participant_id().clone(),
                    prev_log_index: prepared.request.prev_log_index,
                    last_index: prepared.last_index,
                    leader_commit: prepared.commit_index,
                }),
            );

            let weak_self = self.weak_self.clone();
            let (follower_index, last_index, commit_index) =
                (prepared.follower_index, prepared.last_index, prepared.commit_index);
            prepared
                .follower
                .append_entries(prepared.request)
                .then(move |outcome| {
                    if let Some(leader) = weak_self.upgrade() {
                        leader.receive_append_entries_response(AppendEntriesResponse {
                            follower_index,
                            last_index,
                            commit_index,
                            outcome: outcome.unwrap_or_else(|broken| Err(broken.into())),
                        });
                    }
                });
        }
    }

    // Queue the response. If no other call is handling responses, handle the queue until it is empty,
    // including the responses to the requests sent meanwhile.
    fn receive_append_entries_response(&self, response: AppendEntriesResponse) {
        {
            let mut queue = self.responses();
            queue.responses.push_back(response);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        loop {
            let response = {
                let mut queue = self.responses();
                match queue.responses.pop_front() {
                    Some(response) => response,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            let requests = self.handle_append_entries_response(response);
            self.execute_append_entries(requests);
        }
    }

    fn handle_append_entries_response(&self, response: AppendEntriesResponse) -> Vec<PreparedAppendEntries> {
        let AppendEntriesResponse {
            follower_index,
            last_index,
            commit_index,
            outcome,
        } = response;
        let mut guarded = self.lock();
        if guarded.did_resign || guarded.stale.is_some() {
            return Vec::new();
        }
        let action = match guarded.followers.get_mut(follower_index) {
            Some(info) => self.update_follower(info, last_index, commit_index, outcome),
            None => return Vec::new(),
        };
        match action {
            ResponseAction::Continue => {
                self.check_commit_index(&mut guarded);
            }
            ResponseAction::Retry(delay) => self.schedule_retry(follower_index, delay),
            ResponseAction::Stale(observed_term) => {
                self.become_stale(&mut guarded, observed_term);
                return Vec::new();
            }
        }
        Self::prepare_append_entries(&self.participant_id, self.term, &mut guarded)
    }

    fn update_follower(
        &self,
        info: &mut FollowerInfo,
        last_index: LogIndex,
        commit_index: LogIndex,
        outcome: Result<AppendEntriesResult, FollowerError>,
    ) -> ResponseAction {
        match outcome {
            Ok(result) => {
                info.num_errors_since_last_answer = 0;
                info.last_contact = Some(SystemTime::now());
                info.last_error_reason = result.reason;

                if result.success {
                    info.request_in_flight = false;
                    info.confirmed = true;
                    info.walking_back = false;
                    info.last_acked_index = last_index;
                    info.last_acked_commit_index = commit_index;
                    ResponseAction::Continue
                } else if result.term > self.term {
                    ResponseAction::Stale(result.term)
                } else if result.reason == AppendEntriesErrorReason::NoPrevLogMatch
                    && info.last_acked_index > LogIndex::new(0)
                {
                    info.request_in_flight = false;
                    info.walking_back = true;
                    info.last_acked_index = info.last_acked_index.saturating_sub(1);
                    ResponseAction::Continue
                } else {
                    info.num_errors_since_last_answer += 1;
                    ResponseAction::Retry(self.backoff(info.num_errors_since_last_answer))
                }
            }
            Err(err) => {
                info.num_errors_since_last_answer += 1;
                info.last_error_reason = match err {
                    FollowerError::Storage(_) => AppendEntriesErrorReason::PersistenceFailure,
                    _ => AppendEntriesErrorReason::CommunicationError,
                };
                let delay = self.backoff(info.num_errors_since_last_answer);
                log::info!(
                    "append entries to {} of log {} failed ({:?}), retrying in {:?}",
                    info.follower.participant_id(),
                    self.log_id,
                    err,
                    delay
                );
                Event::publish(
                    &self.event_publisher,
                    Event::FollowerUnreachable(FollowerUnreachableEvent {
                        timestamp: SystemTime::now(),
                        log_id: self.log_id,
                        follower: info.follower.participant_id().clone(),
                        num_errors: info.num_errors_since_last_answer,
                        backoff: delay,
                    }),
                );
                ResponseAction::Retry(delay)
            }
        }
    }

    fn backoff(&self, num_errors: u32) -> Duration {
        let exponent = num_errors.min(self.config.retry_backoff_max_exponent).min(31);
        self.config.retry_backoff_base.saturating_mul(1u32 << exponent)
    }

    // The request stays in flight while waiting, so nothing else is sent to the follower meanwhile.
    fn schedule_retry(&self, follower_index: usize, delay: Duration) {
        let weak_self = self.weak_self.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if let Some(leader) = weak_self.upgrade() {
                leader.retry_follower(follower_index);
            }
        });
    }

    fn retry_follower(&self, follower_index: usize) {
        let requests = {
            let mut guarded = self.lock();
            if self.check_active(&guarded).is_err() {
                return;
            }
            if let Some(info) = guarded.followers.get_mut(follower_index) {
                info.request_in_flight = false;
            }
            Self::prepare_append_entries(&self.participant_id, self.term, &mut guarded)
        };
        self.execute_append_entries(requests);
    }

    fn check_commit_index(&self, guarded: &mut GuardedLeaderData) {
        let write_concern = self.config.write_concern;
        let mut acked: Vec<(LogIndex, ParticipantId)> = guarded
            .followers
            .iter()
            .map(|info| {
                let acked = if info.confirmed { info.last_acked_index } else { LogIndex::new(0) };
                (acked, info.follower.participant_id().clone())
            })
            .collect();
        if write_concern == 0 || write_concern > acked.len() {
            return;
        }
        acked.sort_by(|(index_a, id_a), (index_b, id_b)| match index_b.cmp(index_a) {
            Ordering::Equal => id_a.cmp(id_b),
            unequal => unequal,
        });

        let commit_index = acked[write_concern - 1].0;
        if commit_index <= guarded.commit_index {
            return;
        }

        let quorum = Arc::new(QuorumData {
            index: commit_index,
            term: self.term,
            quorum: acked
                .into_iter()
                .take(write_concern)
                .map(|(_, participant_id)| participant_id)
                .collect(),
        });
        guarded.commit_index = commit_index;
        guarded.last_quorum = Some(quorum.clone());
        let promises = guarded.wait_for_queue.take_up_to(commit_index);
        guarded.resolver.submit(Resolution::Commit {
            promises,
            quorum: quorum.clone(),
        });

        Event::publish(
            &self.event_publisher,
            Event::CommitIndexAdvance(CommitIndexAdvanceEvent {
                timestamp: SystemTime::now(),
                log_id: self.log_id,
                term: self.term,
                commit_index,
                quorum: quorum.quorum.clone(),
            }),
        );
    }

    fn become_stale(&self, guarded: &mut GuardedLeaderData, observed_term: LogTerm) {
        log::warn!(
            "leader {} of log {} in term {} saw term {}, stopping replication",
            self.participant_id,
            self.log_id,
            self.term,
            observed_term
        );
        guarded.stale = Some(observed_term);
        guarded.step_trigger = None;
        let promises = guarded.wait_for_queue.take_all();
        guarded.resolver.submit(Resolution::Fail {
            promises,
            error: LogError::LeaderStale {
                term: self.term,
                observed_term,
            },
        });
    }

    fn start_replication_worker(&self) -> Sender<()> {
        let (step_trigger, triggered) = mpsc::channel::<()>();
        let weak_self = self.weak_self.clone();
        thread::spawn(move || {
            while triggered.recv().is_ok() {
                while triggered.try_recv().is_ok() {}
                match weak_self.upgrade() {
                    Some(leader) => leader.run_async_step(),
                    None => return,
                }
            }
        });
        step_trigger
    }

    fn lock(&self) -> MutexGuard<'_, GuardedLeaderData> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn responses(&self) -> MutexGuard<'_, ResponseQueue> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
