/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the `log_events` flag of
//! [`ReplicatedLogSpec`](crate::replicated_log::ReplicatedLogSpec) or
//! [`MetaCollectionConfiguration`](crate::collection::MetaCollectionConfiguration).
//!
//! replog-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed onto
//! a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitIndexAdvance](crate::events::CommitIndexAdvanceEvent) is printed:
//!
//! ```text
//! CommitIndexAdvance, 1701329264, 12, 3, 41, A B
//! ```
//!
//! In the snippet, the values after the timestamp are the log id, the term, the new commit index and the
//! space-separated ids of the participants that formed the quorum.
//!
//! Revision tree root hashes are printed as the first seven characters of the Base64 encoding of their
//! little-endian bytes.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const INSERT_ENTRY: &str = "InsertEntry";
pub const COMMIT_INDEX_ADVANCE: &str = "CommitIndexAdvance";
pub const SEND_APPEND_ENTRIES: &str = "SendAppendEntries";
pub const RECEIVE_APPEND_ENTRIES: &str = "ReceiveAppendEntries";
pub const FOLLOWER_UNREACHABLE: &str = "FollowerUnreachable";

pub const BECOME_LEADER: &str = "BecomeLeader";
pub const BECOME_FOLLOWER: &str = "BecomeFollower";
pub const RESIGN: &str = "Resign";

pub const APPLY_REVISION_UPDATES: &str = "ApplyRevisionUpdates";
pub const SERIALIZE_REVISION_TREE: &str = "SerializeRevisionTree";
pub const HIBERNATE_REVISION_TREE: &str = "HibernateRevisionTree";
pub const REBUILD_REVISION_TREE: &str = "RebuildRevisionTree";
pub const REVISION_TREE_INCONSISTENT: &str = "RevisionTreeInconsistent";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertEntryEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_entry_event: &InsertEntryEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_ENTRY,
                secs_since_unix_epoch(insert_entry_event.timestamp),
                insert_entry_event.log_id,
                insert_entry_event.term,
                insert_entry_event.index
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitIndexAdvanceEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitIndexAdvanceEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                COMMIT_INDEX_ADVANCE,
                secs_since_unix_epoch(commit_event.timestamp),
                commit_event.log_id,
                commit_event.term,
                commit_event.commit_index,
                participant_list(&commit_event.quorum)
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendAppendEntriesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_event: &SendAppendEntriesEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                SEND_APPEND_ENTRIES,
                secs_since_unix_epoch(send_event.timestamp),
                send_event.log_id,
                send_event.follower,
                send_event.prev_log_index,
                send_event.last_index,
                send_event.leader_commit
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveAppendEntriesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_event: &ReceiveAppendEntriesEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {:?}",
                RECEIVE_APPEND_ENTRIES,
                secs_since_unix_epoch(receive_event.timestamp),
                receive_event.log_id,
                receive_event.leader,
                receive_event.prev_log_index,
                receive_event.num_entries,
                receive_event.result.success,
                receive_event.result.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for FollowerUnreachableEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |unreachable_event: &FollowerUnreachableEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                FOLLOWER_UNREACHABLE,
                secs_since_unix_epoch(unreachable_event.timestamp),
                unreachable_event.log_id,
                unreachable_event.follower,
                unreachable_event.num_errors,
                unreachable_event.backoff.as_micros()
            )
        };
        Box::new(logger)
    }
}

impl Logger for BecomeLeaderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |become_leader_event: &BecomeLeaderEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                BECOME_LEADER,
                secs_since_unix_epoch(become_leader_event.timestamp),
                become_leader_event.log_id,
                become_leader_event.term,
                become_leader_event.write_concern,
                participant_list(&become_leader_event.followers)
            )
        };
        Box::new(logger)
    }
}

impl Logger for BecomeFollowerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |become_follower_event: &BecomeFollowerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                BECOME_FOLLOWER,
                secs_since_unix_epoch(become_follower_event.timestamp),
                become_follower_event.log_id,
                become_follower_event.term,
                become_follower_event.leader
            )
        };
        Box::new(logger)
    }
}

impl Logger for ResignEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |resign_event: &ResignEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}",
                RESIGN,
                secs_since_unix_epoch(resign_event.timestamp),
                resign_event.log_id,
                resign_event.role,
                resign_event
                    .term
                    .map_or(String::from("-"), |term| term.to_string())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyRevisionUpdatesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_event: &ApplyRevisionUpdatesEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                APPLY_REVISION_UPDATES,
                secs_since_unix_epoch(apply_event.timestamp),
                apply_event.collection,
                apply_event.applied_seq,
                apply_event.inserts,
                apply_event.removals,
                apply_event.truncated
            )
        };
        Box::new(logger)
    }
}

impl Logger for SerializeRevisionTreeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |serialize_event: &SerializeRevisionTreeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SERIALIZE_REVISION_TREE,
                secs_since_unix_epoch(serialize_event.timestamp),
                serialize_event.collection,
                serialize_event.seq,
                first_seven_base64_chars(&serialize_event.root_hash.to_le_bytes()),
                serialize_event.bytes
            )
        };
        Box::new(logger)
    }
}

impl Logger for HibernateRevisionTreeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |hibernate_event: &HibernateRevisionTreeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                HIBERNATE_REVISION_TREE,
                secs_since_unix_epoch(hibernate_event.timestamp),
                hibernate_event.collection,
                hibernate_event.compressed_bytes
            )
        };
        Box::new(logger)
    }
}

impl Logger for RebuildRevisionTreeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |rebuild_event: &RebuildRevisionTreeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                REBUILD_REVISION_TREE,
                secs_since_unix_epoch(rebuild_event.timestamp),
                rebuild_event.collection,
                rebuild_event.seq,
                first_seven_base64_chars(&rebuild_event.root_hash.to_le_bytes()),
                rebuild_event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for RevisionTreeInconsistentEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |inconsistent_event: &RevisionTreeInconsistentEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}",
                REVISION_TREE_INCONSISTENT,
                secs_since_unix_epoch(inconsistent_event.timestamp),
                inconsistent_event.collection,
                inconsistent_event.injected,
                inconsistent_event.detail
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

fn participant_list(participants: &[crate::types::ParticipantId]) -> String {
    participants
        .iter()
        .map(|participant| participant.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
