/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of replog-rs events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::log::messages::AppendEntriesResult;
use crate::log::participant::LogRole;
use crate::types::{LogId, LogIndex, LogTerm, ParticipantId, SequenceNumber};

pub enum Event {
    // Events of the replicated log.
    InsertEntry(InsertEntryEvent),
    CommitIndexAdvance(CommitIndexAdvanceEvent),
    SendAppendEntries(SendAppendEntriesEvent),
    ReceiveAppendEntries(ReceiveAppendEntriesEvent),
    FollowerUnreachable(FollowerUnreachableEvent),
    // Role transitions.
    BecomeLeader(BecomeLeaderEvent),
    BecomeFollower(BecomeFollowerEvent),
    Resign(ResignEvent),
    // Events of the revision tree engine.
    ApplyRevisionUpdates(ApplyRevisionUpdatesEvent),
    SerializeRevisionTree(SerializeRevisionTreeEvent),
    HibernateRevisionTree(HibernateRevisionTreeEvent),
    RebuildRevisionTree(RebuildRevisionTreeEvent),
    RevisionTreeInconsistent(RevisionTreeInconsistentEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The bus only goes away on shutdown, when nobody listens anymore.
            let _ = event_publisher.send(event);
        }
    }
}

pub struct InsertEntryEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub term: LogTerm,
    pub index: LogIndex,
}

pub struct CommitIndexAdvanceEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub term: LogTerm,
    pub commit_index: LogIndex,
    pub quorum: Vec<ParticipantId>,
}

pub struct SendAppendEntriesEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub follower: ParticipantId,
    pub prev_log_index: LogIndex,
    pub last_index: LogIndex,
    pub leader_commit: LogIndex,
}

pub struct ReceiveAppendEntriesEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub leader: ParticipantId,
    pub prev_log_index: LogIndex,
    pub num_entries: usize,
    pub result: AppendEntriesResult,
}

pub struct FollowerUnreachableEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub follower: ParticipantId,
    pub num_errors: u32,
    pub backoff: Duration,
}

pub struct BecomeLeaderEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub term: LogTerm,
    pub write_concern: usize,
    pub followers: Vec<ParticipantId>,
}

pub struct BecomeFollowerEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub term: LogTerm,
    pub leader: ParticipantId,
}

pub struct ResignEvent {
    pub timestamp: SystemTime,
    pub log_id: LogId,
    pub role: LogRole,
    pub term: Option<LogTerm>,
}

pub struct ApplyRevisionUpdatesEvent {
    pub timestamp: SystemTime,
    pub collection: String,
    pub applied_seq: SequenceNumber,
    pub inserts: usize,
    pub removals: usize,
    pub truncated: bool,
}

pub struct SerializeRevisionTreeEvent {
    pub timestamp: SystemTime,
    pub collection: String,
    pub seq: SequenceNumber,
    pub root_hash: u64,
    pub bytes: usize,
}

pub struct HibernateRevisionTreeEvent {
    pub timestamp: SystemTime,
    pub collection: String,
    pub compressed_bytes: usize,
}

pub struct RebuildRevisionTreeEvent {
    pub timestamp: SystemTime,
    pub collection: String,
    pub seq: SequenceNumber,
    pub root_hash: u64,
    pub count: u64,
}

pub struct RevisionTreeInconsistentEvent {
    pub timestamp: SystemTime,
    pub collection: String,
    pub injected: bool,
    pub detail: String,
}
