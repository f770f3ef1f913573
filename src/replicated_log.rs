/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The facade of one replicated log.
//!
//! A [`ReplicatedLog`] holds the one live [participant](LogParticipant) of a log. A role transition
//! resigns the current participant, takes back its [`LogCore`], and constructs the new participant around
//! it. The whole transition happens under the facade's lock, so concurrent callers observe the log either
//! before or after the transition, never in between.
//!
//! ## Starting a replicated log
//!
//! ```ignore
//! let replicated_log =
//!     ReplicatedLogSpec::builder()
//!     .log_core(LogCore::new(persisted_log))
//!     .log_events(true)
//!     .on_commit_index_advance(commit_handler)
//!     .build()
//!     .start();
//!
//! let leader = replicated_log.become_leader(
//!     ParticipantId::new("A"),
//!     LogTerm::new(1),
//!     followers,
//!     LeaderConfiguration::builder().write_concern(2).build(),
//! )?;
//! ```
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_insert_entry(...)`
//! - `.on_commit_index_advance(...)`
//! - `.on_send_append_entries(...)`
//! - `.on_receive_append_entries(...)`
//! - `.on_follower_unreachable(...)`
//! - `.on_become_leader(...)`
//! - `.on_become_follower(...)`
//! - `.on_resign(...)`

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use typed_builder::TypedBuilder;

use crate::event_bus::{EventBus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::log::follower::{AbstractFollower, LogFollower};
use crate::log::leader::{LeaderConfiguration, LogLeader};
use crate::log::participant::{
    ConstructionError, LogError, LogParticipant, LogRole, LogUnconfiguredParticipant,
};
use crate::log::persisted::LogCore;
use crate::log::status::LogStatus;
use crate::log::wait_for::WaitForFuture;
use crate::promise::Future;
use crate::types::{LogId, LogIndex, LogTerm, ParticipantId};

/// Stores the parameters and event handlers required to start a [ReplicatedLog].
#[derive(TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [ReplicatedLogSpec]. On the builder call the following methods to construct a valid [ReplicatedLogSpec].

    Required:
    - `.log_core(...)`

    Optional:
    - `.log_events(...)`
    - `.on_insert_entry(...)`
    - `.on_commit_index_advance(...)`
    - `.on_send_append_entries(...)`
    - `.on_receive_append_entries(...)`
    - `.on_follower_unreachable(...)`
    - `.on_become_leader(...)`
    - `.on_become_follower(...)`
    - `.on_resign(...)`
"
))]
pub struct ReplicatedLogSpec {
    #[builder(setter(doc = "Set the [LogCore] holding the log's persisted entries. Required."))]
    log_core: LogCore,
    #[builder(default = false, setter(doc = "Enable logging of events? Defaults to false."))]
    log_events: bool,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertEntryEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertEntryEvent>),
    doc = "Register a handler closure to be invoked after the leader inserts an entry. Optional."))]
    on_insert_entry: Option<HandlerPtr<InsertEntryEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitIndexAdvanceEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitIndexAdvanceEvent>),
    doc = "Register a handler closure to be invoked after the leader's commit index advances. Optional."))]
    on_commit_index_advance: Option<HandlerPtr<CommitIndexAdvanceEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendAppendEntriesEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendAppendEntriesEvent>),
    doc = "Register a handler closure to be invoked after the leader sends an append entries request. Optional."))]
    on_send_append_entries: Option<HandlerPtr<SendAppendEntriesEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveAppendEntriesEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveAppendEntriesEvent>),
    doc = "Register a handler closure to be invoked after the follower answers an append entries request. Optional."))]
    on_receive_append_entries: Option<HandlerPtr<ReceiveAppendEntriesEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FollowerUnreachableEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FollowerUnreachableEvent>),
    doc = "Register a handler closure to be invoked after an append entries request fails. Optional."))]
    on_follower_unreachable: Option<HandlerPtr<FollowerUnreachableEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BecomeLeaderEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BecomeLeaderEvent>),
    doc = "Register a handler closure to be invoked after the log gets a leader. Optional."))]
    on_become_leader: Option<HandlerPtr<BecomeLeaderEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BecomeFollowerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BecomeFollowerEvent>),
    doc = "Register a handler closure to be invoked after the log gets a follower. Optional."))]
    on_become_follower: Option<HandlerPtr<BecomeFollowerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ResignEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ResignEvent>),
    doc = "Register a handler closure to be invoked after a participant resigns. Optional."))]
    on_resign: Option<HandlerPtr<ResignEvent>>,
}

impl ReplicatedLogSpec {
    /// Start the event bus, if any handlers are registered, and return the log in the unconfigured state.
    pub fn start(self) -> ReplicatedLog {
        let mut event_handlers = EventHandlers::new(self.log_events);
        event_handlers.insert_entry_handlers.extend(self.on_insert_entry);
        event_handlers.commit_index_advance_handlers.extend(self.on_commit_index_advance);
        event_handlers.send_append_entries_handlers.extend(self.on_send_append_entries);
        event_handlers.receive_append_entries_handlers.extend(self.on_receive_append_entries);
        event_handlers.follower_unreachable_handlers.extend(self.on_follower_unreachable);
        event_handlers.become_leader_handlers.extend(self.on_become_leader);
        event_handlers.become_follower_handlers.extend(self.on_become_follower);
        event_handlers.resign_handlers.extend(self.on_resign);

        let event_bus = EventBus::start(event_handlers);
        let event_publisher = event_bus.as_ref().map(EventBus::publisher);
        ReplicatedLog::with_event_bus(self.log_core, event_bus, event_publisher)
    }
}

enum ParticipantState {
    Active(LogParticipant),
    Resigning,
}

pub struct ReplicatedLog {
    log_id: LogId,
    state: Mutex<ParticipantState>,
    event_publisher: Option<Sender<Event>>,
    // Declared last: dropped after everything that publishes to it.
    _event_bus: Option<EventBus>,
}

impl ReplicatedLog {
    /// A log without event handlers, in the unconfigured state.
    pub fn new(log_core: LogCore) -> ReplicatedLog {
        ReplicatedLog::with_event_bus(log_core, None, None)
    }

    fn with_event_bus(
        log_core: LogCore,
        event_bus: Option<EventBus>,
        event_publisher: Option<Sender<Event>>,
    ) -> ReplicatedLog {
        ReplicatedLog {
            log_id: log_core.log_id(),
            state: Mutex::new(ParticipantState::Active(LogParticipant::Unconfigured(
                LogUnconfiguredParticipant::new(log_core, event_publisher.clone()),
            ))),
            event_publisher,
            _event_bus: event_bus,
        }
    }

    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Resign the current participant and make this server the leader of `term`.
    pub fn become_leader(
        &self,
        participant_id: ParticipantId,
        term: LogTerm,
        followers: Vec<Arc<dyn AbstractFollower>>,
        config: LeaderConfiguration,
    ) -> Result<Arc<LogLeader>, LogError> {
        let participants = followers.len() + 1;
        if config.write_concern == 0 || config.write_concern > participants {
            return Err(LogError::WriteConcernUnsatisfiable {
                write_concern: config.write_concern,
                participants,
            });
        }

        let event_publisher = self.event_publisher.clone();
        self.transition(|log_core| {
            LogLeader::construct(participant_id, log_core, term, followers, config, event_publisher)
                .map(LogParticipant::Leader)
        })
        .and_then(|participant| match participant {
            LogParticipant::Leader(leader) => Ok(leader),
            _ => Err(LogError::NotTheLeader),
        })
    }

    /// Resign the current participant and make this server a follower of `leader_id` in `term`.
    pub fn become_follower(
        &self,
        participant_id: ParticipantId,
        term: LogTerm,
        leader_id: ParticipantId,
    ) -> Result<Arc<LogFollower>, LogError> {
        let event_publisher = self.event_publisher.clone();
        self.transition(|log_core| {
            LogFollower::construct(participant_id, log_core, term, leader_id, event_publisher)
                .map(LogParticipant::Follower)
        })
        .and_then(|participant| match participant {
            LogParticipant::Follower(follower) => Ok(follower),
            _ => Err(LogError::NotAFollower),
        })
    }

    fn transition(
        &self,
        construct: impl FnOnce(LogCore) -> Result<LogParticipant, ConstructionError>,
    ) -> Result<LogParticipant, LogError> {
        let mut state = self.lock();
        let current = match std::mem::replace(&mut *state, ParticipantState::Resigning) {
            ParticipantState::Active(current) => current,
            ParticipantState::Resigning => return Err(LogError::Unavailable),
        };

        let log_core = match current.resign() {
            Ok(log_core) => log_core,
            Err(error) => {
                *state = ParticipantState::Active(current);
                return Err(error);
            }
        };
        log::debug!("log {} resigned its {:?}", self.log_id, current.role());

        match construct(log_core) {
            Ok(participant) => {
                *state = ParticipantState::Active(participant.clone());
                Ok(participant)
            }
            Err(ConstructionError { log_core, error }) => {
                log::warn!("log {} could not construct participant: {}", self.log_id, error);
                *state = ParticipantState::Active(LogParticipant::Unconfigured(
                    LogUnconfiguredParticipant::new(log_core, self.event_publisher.clone()),
                ));
                Err(error)
            }
        }
    }

    pub fn role(&self) -> LogRole {
        match &*self.lock() {
            ParticipantState::Active(participant) => participant.role(),
            ParticipantState::Resigning => LogRole::Resigning,
        }
    }

    pub fn participant(&self) -> Result<LogParticipant, LogError> {
        match &*self.lock() {
            ParticipantState::Active(participant) => Ok(participant.clone()),
            ParticipantState::Resigning => Err(LogError::Unavailable),
        }
    }

    pub fn leader(&self) -> Result<Arc<LogLeader>, LogError> {
        match self.participant()? {
            LogParticipant::Leader(leader) => Ok(leader),
            _ => Err(LogError::NotTheLeader),
        }
    }

    pub fn follower(&self) -> Result<Arc<LogFollower>, LogError> {
        match self.participant()? {
            LogParticipant::Follower(follower) => Ok(follower),
            _ => Err(LogError::NotAFollower),
        }
    }

    pub fn status(&self) -> LogStatus {
        match &*self.lock() {
            ParticipantState::Active(participant) => participant.status(),
            ParticipantState::Resigning => LogStatus::Unconfigured,
        }
    }

    pub fn wait_for(&self, index: LogIndex) -> WaitForFuture {
        match &*self.lock() {
            ParticipantState::Active(participant) => participant.wait_for(index),
            ParticipantState::Resigning => Future::ready(Err(LogError::Unavailable)),
        }
    }

    /// Resign the current leader or follower and return to the unconfigured state. Does nothing if the log
    /// is already unconfigured.
    pub fn shutdown(&self) -> Result<(), LogError> {
        if self.role() == LogRole::Unconfigured {
            return Ok(());
        }
        let event_publisher = self.event_publisher.clone();
        self.transition(|log_core| {
            Ok(LogParticipant::Unconfigured(LogUnconfiguredParticipant::new(
                log_core,
                event_publisher,
            )))
        })
        .map(|_| ())
    }

    /// Resign the current participant and remove the log from storage.
    pub fn drop_log(self) -> Result<(), LogError> {
        let mut state = self.lock();
        let current = match std::mem::replace(&mut *state, ParticipantState::Resigning) {
            ParticipantState::Active(current) => current,
            ParticipantState::Resigning => return Err(LogError::Unavailable),
        };
        let log_core = current.resign()?;
        drop(state);
        log_core.drop_log().map_err(LogError::from)
    }

    fn lock(&self) -> MutexGuard<'_, ParticipantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReplicatedLog {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let ParticipantState::Active(participant) = state {
            if participant.role() != LogRole::Unconfigured {
                let _ = participant.resign();
            }
        }
    }
}
