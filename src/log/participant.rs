//! The participant roles of a replicated log.
//!
//! A [`LogParticipant`] is exactly one of the three roles a server can have in a log. The role owns the
//! log's [`LogCore`] until it resigns. The facade switches on the variant explicitly instead of calling
//! through a trait object.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

use super::follower::LogFollower;
use super::in_memory_log::InMemoryLogError;
use super::leader::LogLeader;
use super::persisted::{LogCore, PersistedLogError};
use super::status::LogStatus;
use super::wait_for::WaitForFuture;
use crate::events::{Event, ResignEvent};
use crate::promise::{BrokenPromise, Future};
use crate::types::{LogId, LogIndex, LogTerm};

#[derive(Debug, Clone)]
pub enum LogError {
    LeaderResigned,
    FollowerResigned,
    ParticipantResigned,
    NotTheLeader,
    NotAFollower,
    Unconfigured,
    Unavailable,
    LeaderStale { term: LogTerm, observed_term: LogTerm },
    WriteConcernUnsatisfiable { write_concern: usize, participants: usize },
    PersistedLog(Arc<PersistedLogError>),
    InMemoryLog(InMemoryLogError),
    BrokenPromise,
}

impl Display for LogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LogError::LeaderResigned => f.write_str("leader resigned"),
            LogError::FollowerResigned => f.write_str("follower resigned"),
            LogError::ParticipantResigned => f.write_str("participant resigned"),
            LogError::NotTheLeader => f.write_str("participant is not the leader"),
            LogError::NotAFollower => f.write_str("participant is not a follower"),
            LogError::Unconfigured => f.write_str("log has no configured participant"),
            LogError::Unavailable => f.write_str("log is unavailable"),
            LogError::LeaderStale { term, observed_term } => {
                write!(f, "leader of term {} is stale, a follower is in term {}", term, observed_term)
            }
            LogError::WriteConcernUnsatisfiable {
                write_concern,
                participants,
            } => write!(
                f,
                "write concern {} cannot be met by {} participants",
                write_concern, participants
            ),
            LogError::PersistedLog(err) => write!(f, "persisted log: {}", err),
            LogError::InMemoryLog(err) => write!(f, "in-memory log: {}", err),
            LogError::BrokenPromise => f.write_str("waiter was dropped without a result"),
        }
    }
}

impl From<PersistedLogError> for LogError {
    fn from(value: PersistedLogError) -> Self {
        LogError::PersistedLog(Arc::new(value))
    }
}

impl From<InMemoryLogError> for LogError {
    fn from(value: InMemoryLogError) -> Self {
        LogError::InMemoryLog(value)
    }
}

impl From<BrokenPromise> for LogError {
    fn from(_: BrokenPromise) -> Self {
        LogError::BrokenPromise
    }
}

/// A participant could not be constructed. The [`LogCore`] it was given is handed back.
pub struct ConstructionError {
    pub log_core: LogCore,
    pub error: LogError,
}

impl fmt::Debug for ConstructionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructionError")
            .field("log_id", &self.log_core.log_id())
            .field("error", &self.error)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogRole {
    Unconfigured,
    Leader,
    Follower,
    Resigning,
}

/// Holds the [`LogCore`] while the log has neither a leader nor a follower.
pub struct LogUnconfiguredParticipant {
    log_id: LogId,
    log_core: Mutex<Option<LogCore>>,
    event_publisher: Option<Sender<Event>>,
}

impl LogUnconfiguredParticipant {
    pub fn new(log_core: LogCore, event_publisher: Option<Sender<Event>>) -> Arc<LogUnconfiguredParticipant> {
        Arc::new(LogUnconfiguredParticipant {
            log_id: log_core.log_id(),
            log_core: Mutex::new(Some(log_core)),
            event_publisher,
        })
    }

    pub fn status(&self) -> LogStatus {
        LogStatus::Unconfigured
    }

    pub fn wait_for(&self, _index: LogIndex) -> WaitForFuture {
        Future::ready(Err(LogError::Unconfigured))
    }

    pub fn resign(&self) -> Result<LogCore, LogError> {
        let log_core = self
            .log_core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(LogError::ParticipantResigned)?;
        Event::publish(
            &self.event_publisher,
            Event::Resign(ResignEvent {
                timestamp: SystemTime::now(),
                log_id: self.log_id,
                role: LogRole::Unconfigured,
                term: None,
            }),
        );
        Ok(log_core)
    }
}

#[derive(Clone)]
pub enum LogParticipant {
    Unconfigured(Arc<LogUnconfiguredParticipant>),
    Leader(Arc<LogLeader>),
    Follower(Arc<LogFollower>),
}

impl LogParticipant {
    pub fn role(&self) -> LogRole {
        match self {
            LogParticipant::Unconfigured(_) => LogRole::Unconfigured,
            LogParticipant::Leader(_) => LogRole::Leader,
            LogParticipant::Follower(_) => LogRole::Follower,
        }
    }

    pub fn status(&self) -> LogStatus {
        match self {
            LogParticipant::Unconfigured(participant) => participant.status(),
            LogParticipant::Leader(leader) => LogStatus::Leader(leader.status()),
            LogParticipant::Follower(follower) => LogStatus::Follower(follower.status()),
        }
    }

    pub fn wait_for(&self, index: LogIndex) -> WaitForFuture {
        match self {
            LogParticipant::Unconfigured(participant) => participant.wait_for(index),
            LogParticipant::Leader(leader) => leader.wait_for(index),
            LogParticipant::Follower(follower) => follower.wait_for(index),
        }
    }

    /// Resign the participant and take its [`LogCore`].
    pub fn resign(&self) -> Result<LogCore, LogError> {
        match self {
            LogParticipant::Unconfigured(participant) => participant.resign(),
            LogParticipant::Leader(leader) => leader.resign(),
            LogParticipant::Follower(follower) => follower.resign(),
        }
    }
}
