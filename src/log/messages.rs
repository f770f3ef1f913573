//! Messages exchanged between a leader and its followers.
//!
//! Both messages are plain data and serialize to JSON objects with camelCase keys, e.g.:
//!
//! ```text
//! {"term":3,"leaderId":"A","prevLogTerm":2,"prevLogIndex":7,"leaderCommit":6,"entries":[...]}
//! {"term":3,"success":false,"reason":"noPrevLogMatch"}
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{LogEntry, LogIndex, LogTerm, ParticipantId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesRequest {
    #[serde(rename = "term")]
    pub leader_term: LogTerm,
    pub leader_id: ParticipantId,
    pub prev_log_term: LogTerm,
    pub prev_log_index: LogIndex,
    pub leader_commit: LogIndex,
    pub entries: Vec<LogEntry>,
}

impl AppendEntriesRequest {
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<AppendEntriesRequest, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Index of the last entry carried, or of the previous entry if the request carries none.
    pub fn last_index(&self) -> LogIndex {
        self.entries
            .last()
            .map_or(self.prev_log_index, |entry| entry.index())
    }
}

/// Why a follower refused an append entries request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppendEntriesErrorReason {
    #[default]
    None,
    InvalidLeaderId,
    LostLogCore,
    WrongTerm,
    NoPrevLogMatch,
    MalformedEntries,
    PersistenceFailure,
    CommunicationError,
}

impl AppendEntriesErrorReason {
    pub fn message(&self) -> &'static str {
        match self {
            AppendEntriesErrorReason::None => "",
            AppendEntriesErrorReason::InvalidLeaderId => "leader id was invalid",
            AppendEntriesErrorReason::LostLogCore => "term has changed and the log core is gone",
            AppendEntriesErrorReason::WrongTerm => "current term is different from leader term",
            AppendEntriesErrorReason::NoPrevLogMatch => "previous log index did not match",
            AppendEntriesErrorReason::MalformedEntries => "entries do not continue the previous log index",
            AppendEntriesErrorReason::PersistenceFailure => "persisting the entries failed",
            AppendEntriesErrorReason::CommunicationError => "follower could not be reached",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesResult {
    pub term: LogTerm,
    pub success: bool,
    #[serde(default)]
    pub reason: AppendEntriesErrorReason,
}

impl AppendEntriesResult {
    pub fn success(term: LogTerm) -> AppendEntriesResult {
        AppendEntriesResult {
            term,
            success: true,
            reason: AppendEntriesErrorReason::None,
        }
    }

    pub fn reject(term: LogTerm, reason: AppendEntriesErrorReason) -> AppendEntriesResult {
        AppendEntriesResult {
            term,
            success: false,
            reason,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<AppendEntriesResult, serde_json::Error> {
        serde_json::from_value(value)
    }
}
