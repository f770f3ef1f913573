//! Status reports of log participants.
//!
//! A [`LogStatus`] serializes to a JSON document tagged by the participant's role:
//!
//! ```text
//! {"role":"leader","term":2,"local":{"spearHead":5,"commitIndex":4},"follower":{"B":{...}}}
//! {"role":"follower","term":2,"leader":"A","local":{"spearHead":5,"commitIndex":4}}
//! {"role":"unconfigured"}
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use super::messages::AppendEntriesErrorReason;
use crate::types::{LogIndex, LogTerm, ParticipantId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub spear_head: LogIndex,
    pub commit_index: LogIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerStatistics {
    #[serde(flatten)]
    pub local: LogStatistics,
    pub last_error_reason: AppendEntriesErrorReason,
    pub last_error_message: String,
    pub request_in_flight: bool,
    pub num_errors_since_last_answer: u32,
    /// Milliseconds since the Unix epoch at which the follower last answered.
    pub last_contact: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderStatus {
    pub local: LogStatistics,
    pub term: LogTerm,
    pub write_concern: usize,
    pub stale: bool,
    pub follower: BTreeMap<ParticipantId, FollowerStatistics>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerStatus {
    pub local: LogStatistics,
    pub leader: ParticipantId,
    pub term: LogTerm,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum LogStatus {
    Unconfigured,
    Leader(LeaderStatus),
    Follower(FollowerStatus),
}

impl LogStatus {
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn local(&self) -> Option<LogStatistics> {
        match self {
            LogStatus::Unconfigured => None,
            LogStatus::Leader(status) => Some(status.local),
            LogStatus::Follower(status) => Some(status.local),
        }
    }
}
