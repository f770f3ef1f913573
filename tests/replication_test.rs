//! Tests of the leader and follower participants, driven by hand through [`DelayedFollower`]s unless a
//! test says otherwise.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::LevelFilter;

use replog_rs::log::follower::{AbstractFollower, LogFollower};
use replog_rs::log::leader::{LeaderConfiguration, LogLeader};
use replog_rs::log::messages::{AppendEntriesErrorReason, AppendEntriesRequest};
use replog_rs::log::participant::LogError;
use replog_rs::log::persisted::LogCore;
use replog_rs::log::status::LogStatus;
use replog_rs::types::{LogEntry, LogIndex, LogPayload, LogTerm, ParticipantId};

mod common;

use common::{
    followers::{DelayedFollower, FailingFollower},
    logging::setup_logger,
    mem_log::MemLog,
    wait_until,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn follower(id: &str, leader: &str, term: u64, log: &MemLog) -> Arc<LogFollower> {
    LogFollower::construct(
        ParticipantId::from(id),
        LogCore::new(log.clone()),
        LogTerm::new(term),
        ParticipantId::from(leader),
        None,
    )
    .unwrap()
}

fn manual_leader(
    term: u64,
    log: &MemLog,
    followers: Vec<Arc<dyn AbstractFollower>>,
    write_concern: usize,
) -> Arc<LogLeader> {
    LogLeader::construct(
        ParticipantId::from("A"),
        LogCore::new(log.clone()),
        LogTerm::new(term),
        followers,
        LeaderConfiguration::builder()
            .write_concern(write_concern)
            .auto_replicate(false)
            .build(),
        None,
    )
    .unwrap()
}

fn ids(names: &[&str]) -> Vec<ParticipantId> {
    names.iter().map(|name| ParticipantId::from(*name)).collect()
}

#[test]
fn write_single_entry() {
    setup_logger(LevelFilter::Debug);
    let (leader_log, follower_log) = (MemLog::new(1), MemLog::new(1));
    let b = follower("B", "A", 1, &follower_log);
    let delayed_b = DelayedFollower::new(b.clone());
    let leader = manual_leader(1, &leader_log, vec![delayed_b.clone()], 2);

    let index = leader.insert("first").unwrap();
    assert_eq!(index, LogIndex::new(1));
    let committed = leader.wait_for(index);
    assert!(!committed.is_ready());

    // The leader persists its own copy right away.
    leader.run_async_step();
    assert_eq!(leader_log.len(), 1);
    assert!(delayed_b.has_pending_append_entries());
    assert!(!committed.wait_timeout(Duration::from_millis(20)));

    assert_eq!(delayed_b.run_async_append_entries(), 1);
    assert!(committed.wait_timeout(TIMEOUT));
    let quorum = committed.join().unwrap();
    assert_eq!(quorum.index, LogIndex::new(1));
    assert_eq!(quorum.term, LogTerm::new(1));
    assert_eq!(quorum.quorum, ids(&["A", "B"]));
    assert_eq!(leader.commit_index(), LogIndex::new(1));
    assert_eq!(follower_log.entries(), leader_log.entries());

    // The follower learns about the commit with the next request.
    let follower_committed = b.wait_for(index);
    assert!(delayed_b.has_pending_append_entries());
    delayed_b.run_async_append_entries();
    assert_eq!(b.commit_index(), LogIndex::new(1));
    assert!(follower_committed.wait_timeout(TIMEOUT));
    assert!(follower_committed.join().unwrap().quorum.is_empty());

    // Nothing left to send.
    leader.run_async_step();
    assert!(!delayed_b.has_pending_append_entries());
}

#[test]
fn commit_waits_for_write_concern() {
    let leader_log = MemLog::new(1);
    let (f1_log, f2_log) = (MemLog::new(1), MemLog::new(1));
    let f1 = DelayedFollower::new(follower("F1", "A", 1, &f1_log));
    let f2 = DelayedFollower::new(follower("F2", "A", 1, &f2_log));
    let leader = manual_leader(1, &leader_log, vec![f1.clone(), f2.clone()], 3);

    let index = leader.insert("payload").unwrap();
    let committed = leader.wait_for(index);
    leader.run_async_step();

    f1.run_async_append_entries();
    assert!(!committed.wait_timeout(Duration::from_millis(50)));
    assert_eq!(leader.commit_index(), LogIndex::new(0));

    f2.run_async_append_entries();
    assert!(committed.wait_timeout(TIMEOUT));
    let quorum = committed.join().unwrap();
    assert_eq!(quorum.index, LogIndex::new(1));
    assert_eq!(quorum.quorum, ids(&["A", "F1", "F2"]));
}

#[test]
fn quorum_is_the_most_advanced_participants() {
    let leader_log = MemLog::new(1);
    let logs: Vec<MemLog> = (0..3).map(|_| MemLog::new(1)).collect();
    let followers: Vec<Arc<DelayedFollower>> = ["D", "C", "B"]
        .iter()
        .zip(&logs)
        .map(|(id, log)| DelayedFollower::new(follower(id, "A", 1, log)))
        .collect();
    let leader = manual_leader(
        1,
        &leader_log,
        followers.iter().map(|f| f.clone() as Arc<dyn AbstractFollower>).collect(),
        3,
    );

    for i in 0..3 {
        leader.insert(format!("entry {}", i).into_bytes()).unwrap();
    }
    let committed = leader.wait_for(LogIndex::new(3));
    leader.run_async_step();

    // D acknowledges first, then C; B never does. The quorum lists the participants by id.
    followers[0].run_async_append_entries();
    assert!(!committed.wait_timeout(Duration::from_millis(20)));
    followers[1].run_async_append_entries();
    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(committed.join().unwrap().quorum, ids(&["A", "C", "D"]));
    assert_eq!(leader.commit_index(), LogIndex::new(3));
}

#[test]
fn waiters_resolve_in_index_order() {
    let (leader_log, follower_log) = (MemLog::new(1), MemLog::new(1));
    let b = follower("B", "A", 1, &follower_log);
    let leader = LogLeader::construct(
        ParticipantId::from("A"),
        LogCore::new(leader_log.clone()),
        LogTerm::new(1),
        vec![b.clone()],
        LeaderConfiguration::builder().write_concern(2).build(),
        None,
    )
    .unwrap();

    let resolved = Arc::new(Mutex::new(Vec::new()));
    let mut last = None;
    for i in 1..=50u64 {
        let index = leader.insert(format!("entry {}", i).into_bytes()).unwrap();
        assert_eq!(index, LogIndex::new(i));
        let resolved = resolved.clone();
        let future = leader.wait_for(index);
        if i == 50 {
            last = Some(leader.wait_for(index));
        }
        future.then(move |outcome| {
            let quorum = outcome.unwrap().unwrap();
            assert!(quorum.quorum.len() >= 2);
            resolved.lock().unwrap().push(i);
        });
    }

    assert!(last.unwrap().wait_timeout(TIMEOUT));
    assert!(wait_until(TIMEOUT, || resolved.lock().unwrap().len() == 50));
    assert_eq!(*resolved.lock().unwrap(), (1..=50).collect::<Vec<_>>());
    assert_eq!(follower_log.len(), 50);
    assert!(wait_until(TIMEOUT, || b.commit_index() == LogIndex::new(50)));
}

#[test]
fn wait_for_committed_index_resolves_immediately() {
    let (leader_log, follower_log) = (MemLog::new(1), MemLog::new(1));
    let b = follower("B", "A", 1, &follower_log);
    let leader = manual_leader(1, &leader_log, vec![b], 2);
    leader.insert("a").unwrap();
    leader.insert("b").unwrap();
    leader.run_async_step();
    assert_eq!(leader.commit_index(), LogIndex::new(2));

    let earlier = leader.wait_for(LogIndex::new(1));
    assert!(earlier.wait_timeout(TIMEOUT));
    assert_eq!(earlier.join().unwrap().index, LogIndex::new(2));
}

#[test]
fn write_concern_one_commits_on_local_persist() {
    let leader_log = MemLog::new(1);
    let leader = manual_leader(1, &leader_log, Vec::new(), 1);
    let index = leader.insert("alone").unwrap();
    let committed = leader.wait_for(index);
    leader.run_async_step();
    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(committed.join().unwrap().quorum, ids(&["A"]));
}

#[test]
fn wake_up_with_persistent_data() {
    let leader_log = MemLog::with_terms(1, &[1, 1, 1]);
    let follower_log = MemLog::new(1);
    let delayed_b = DelayedFollower::new(follower("B", "A", 2, &follower_log));
    let leader = manual_leader(2, &leader_log, vec![delayed_b.clone()], 2);
    assert_eq!(leader.in_memory_log().last_index(), LogIndex::new(3));

    let committed = leader.wait_for(LogIndex::new(3));
    leader.run_async_step();
    // The first request checks index 2, the follower is empty, so the leader walks back to 0.
    delayed_b.run_until_idle(10);

    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(follower_log.terms(), vec![1, 1, 1]);
    assert_eq!(follower_log.entries(), leader_log.entries());

    let status = leader.status();
    let b_stats = &status.follower[&ParticipantId::from("B")];
    assert_eq!(b_stats.local.spear_head, LogIndex::new(3));
    assert_eq!(b_stats.local.commit_index, LogIndex::new(3));
    assert_eq!(b_stats.num_errors_since_last_answer, 0);
    assert_eq!(b_stats.last_error_reason, AppendEntriesErrorReason::None);
}

#[test]
fn follower_drops_divergent_entries() {
    let leader_log = MemLog::with_terms(1, &[1, 1, 3]);
    let follower_log = MemLog::with_terms(1, &[1, 1, 2, 2]);
    let b = follower("B", "A", 4, &follower_log);
    let delayed_b = DelayedFollower::new(b.clone());
    let leader = manual_leader(4, &leader_log, vec![delayed_b.clone()], 2);

    let index = leader.insert("new").unwrap();
    assert_eq!(index, LogIndex::new(4));
    let committed = leader.wait_for(index);
    leader.run_async_step();
    delayed_b.run_until_idle(10);

    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(follower_log.terms(), vec![1, 1, 3, 4]);
    assert_eq!(b.in_memory_log().last_term(), LogTerm::new(4));
    assert_eq!(
        b.in_memory_log()
            .iter_from(LogIndex::new(1))
            .map(|entry| entry.term().int())
            .collect::<Vec<_>>(),
        vec![1, 1, 3, 4]
    );
}

#[test]
fn follower_far_behind_catches_up() {
    // The follower answers inline, so every step back is handled on this thread.
    let leader_log = MemLog::with_terms(1, &[1; 6000]);
    let follower_log = MemLog::new(1);
    let b = follower("B", "A", 2, &follower_log);
    let leader = manual_leader(2, &leader_log, vec![b.clone()], 2);

    let index = leader.insert("new").unwrap();
    assert_eq!(index, LogIndex::new(6001));
    let committed = leader.wait_for(index);
    leader.run_async_step();

    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(committed.join().unwrap().quorum, ids(&["A", "B"]));
    assert_eq!(follower_log.len(), 6001);
    assert_eq!(b.in_memory_log().last_index(), LogIndex::new(6001));
    match leader.status().follower.get(&ParticipantId::from("B")) {
        Some(statistics) => {
            assert_eq!(statistics.local.spear_head, LogIndex::new(6001));
            assert!(!statistics.request_in_flight);
        }
        None => panic!("leader does not report follower B"),
    }
}

fn request(prev_index: u64, prev_term: u64, entries: Vec<LogEntry>) -> AppendEntriesRequest {
    AppendEntriesRequest {
        leader_term: LogTerm::new(2),
        leader_id: ParticipantId::from("A"),
        prev_log_term: LogTerm::new(prev_term),
        prev_log_index: LogIndex::new(prev_index),
        leader_commit: LogIndex::new(0),
        entries,
    }
}

fn entry(term: u64, index: u64) -> LogEntry {
    LogEntry::new(LogTerm::new(term), LogIndex::new(index), LogPayload::from("x"))
}

#[test]
fn rejected_requests_leave_the_log_unchanged() {
    let follower_log = MemLog::with_terms(1, &[1, 1, 2]);
    let b = follower("B", "A", 2, &follower_log);
    let before = follower_log.entries();

    let mismatched_term = b.handle_append_entries(request(2, 2, vec![entry(2, 3)])).unwrap();
    assert!(!mismatched_term.success);
    assert_eq!(mismatched_term.reason, AppendEntriesErrorReason::NoPrevLogMatch);

    let beyond_end = b.handle_append_entries(request(5, 2, vec![entry(2, 6)])).unwrap();
    assert_eq!(beyond_end.reason, AppendEntriesErrorReason::NoPrevLogMatch);

    let gap = b.handle_append_entries(request(1, 1, vec![entry(2, 3)])).unwrap();
    assert_eq!(gap.reason, AppendEntriesErrorReason::MalformedEntries);

    let mut wrong_leader = request(3, 2, vec![entry(2, 4)]);
    wrong_leader.leader_id = ParticipantId::from("C");
    assert_eq!(
        b.handle_append_entries(wrong_leader).unwrap().reason,
        AppendEntriesErrorReason::InvalidLeaderId
    );

    for term in [1, 3] {
        let mut wrong_term = request(3, 2, vec![]);
        wrong_term.leader_term = LogTerm::new(term);
        let result = b.handle_append_entries(wrong_term).unwrap();
        assert_eq!(result.reason, AppendEntriesErrorReason::WrongTerm);
        assert_eq!(result.term, LogTerm::new(2));
    }

    assert_eq!(follower_log.entries(), before);
    assert_eq!(b.in_memory_log().last_index(), LogIndex::new(3));

    let accepted = b.handle_append_entries(request(3, 2, vec![entry(2, 4)])).unwrap();
    assert!(accepted.success);
    assert_eq!(follower_log.len(), 4);
}

#[test]
fn follower_commit_index_is_bounded_by_its_log() {
    let follower_log = MemLog::new(1);
    let b = follower("B", "A", 2, &follower_log);
    let mut req = request(0, 0, vec![entry(2, 1), entry(2, 2)]);
    req.leader_commit = LogIndex::new(10);
    assert!(b.handle_append_entries(req).unwrap().success);
    assert_eq!(b.commit_index(), LogIndex::new(2));

    let json = LogStatus::Follower(b.status()).to_json().unwrap();
    assert_eq!(json["role"], "follower");
    assert_eq!(json["leader"], "A");
    assert_eq!(json["local"]["spearHead"], 2);
    assert_eq!(json["local"]["commitIndex"], 2);
}

#[test]
fn follower_storage_failure_fails_the_request() {
    let follower_log = MemLog::new(1);
    let b = follower("B", "A", 2, &follower_log);
    follower_log.set_fail_writes(true);
    assert!(b.handle_append_entries(request(0, 0, vec![entry(2, 1)])).is_err());
    assert_eq!(b.in_memory_log().last_index(), LogIndex::new(0));

    follower_log.set_fail_writes(false);
    assert!(b.handle_append_entries(request(0, 0, vec![entry(2, 1)])).unwrap().success);
}

#[test]
fn resign_fails_pending_waiters() {
    let leader_log = MemLog::new(1);
    let delayed_b = DelayedFollower::new(follower("B", "A", 1, &MemLog::new(1)));
    let leader = manual_leader(1, &leader_log, vec![delayed_b.clone()], 2);
    for i in 0..5 {
        leader.insert(format!("entry {}", i).into_bytes()).unwrap();
    }
    let pending = leader.wait_for(LogIndex::new(5));
    leader.run_async_step();

    let log_core = leader.resign().unwrap();
    assert_eq!(log_core.read_all().unwrap().len(), 5);
    assert!(pending.wait_timeout(TIMEOUT));
    assert!(matches!(pending.join(), Err(LogError::LeaderResigned)));

    assert!(matches!(leader.insert("late"), Err(LogError::LeaderResigned)));
    assert!(matches!(leader.wait_for(LogIndex::new(1)).join(), Err(LogError::LeaderResigned)));
    assert!(matches!(leader.resign(), Err(LogError::LeaderResigned)));

    // Answers to requests sent before the resignation are ignored.
    delayed_b.run_async_append_entries();
    assert_eq!(leader.commit_index(), LogIndex::new(0));
}

#[test]
fn reads_only_see_committed_entries() {
    let leader_log = MemLog::new(1);
    let delayed_b = DelayedFollower::new(follower("B", "A", 1, &MemLog::new(1)));
    let leader = manual_leader(1, &leader_log, vec![delayed_b.clone()], 2);
    for payload in ["one", "two", "three"] {
        leader.insert(payload).unwrap();
    }
    let iterator = leader.wait_for_iterator(LogIndex::new(2));
    assert!(leader.read_replicated_entry(LogIndex::new(1)).unwrap().is_none());
    assert!(leader.replicated_log_snapshot().unwrap().is_empty());

    leader.run_async_step();
    assert!(!iterator.wait_timeout(Duration::from_millis(20)));
    delayed_b.run_async_append_entries();
    assert!(iterator.wait_timeout(TIMEOUT));
    let entries = iterator.join().unwrap().collect::<Vec<_>>();
    assert_eq!(
        entries.iter().map(|entry| entry.index()).collect::<Vec<_>>(),
        vec![LogIndex::new(2), LogIndex::new(3)]
    );

    // Not yet committed on the leader.
    leader.insert("four").unwrap();
    let first = leader.read_replicated_entry(LogIndex::new(1)).unwrap().unwrap();
    assert_eq!(first.payload(), &LogPayload::from("one"));
    assert!(leader.read_replicated_entry(LogIndex::new(4)).unwrap().is_none());
    assert!(leader.read_replicated_entry(LogIndex::new(9)).unwrap().is_none());

    let snapshot = leader.replicated_log_snapshot().unwrap();
    assert_eq!(snapshot.first_index(), LogIndex::new(1));
    assert_eq!(snapshot.last_index(), LogIndex::new(3));
    assert_eq!(snapshot.len(), 3);
}

#[test]
fn reads_fail_after_resignation() {
    let leader_log = MemLog::new(1);
    let delayed_b = DelayedFollower::new(follower("B", "A", 1, &MemLog::new(1)));
    let leader = manual_leader(1, &leader_log, vec![delayed_b.clone()], 2);
    leader.insert("entry").unwrap();
    let pending = leader.wait_for_iterator(LogIndex::new(1));
    leader.run_async_step();

    leader.resign().unwrap();
    assert!(pending.wait_timeout(TIMEOUT));
    assert!(matches!(pending.join(), Err(LogError::LeaderResigned)));
    assert!(matches!(
        leader.read_replicated_entry(LogIndex::new(1)),
        Err(LogError::LeaderResigned)
    ));
    assert!(matches!(leader.replicated_log_snapshot(), Err(LogError::LeaderResigned)));
    assert!(matches!(
        leader.wait_for_iterator(LogIndex::new(1)).join(),
        Err(LogError::LeaderResigned)
    ));
}

#[test]
fn follower_resign_fails_waiters_and_rejects_requests() {
    let b = follower("B", "A", 2, &MemLog::new(1));
    let pending = b.wait_for(LogIndex::new(1));
    let log_core = b.resign().unwrap();
    assert_eq!(log_core.log_id().int(), 1);
    assert!(pending.wait_timeout(TIMEOUT));
    assert!(matches!(pending.join(), Err(LogError::FollowerResigned)));
    assert_eq!(
        b.handle_append_entries(request(0, 0, vec![entry(2, 1)])).unwrap().reason,
        AppendEntriesErrorReason::LostLogCore
    );
    assert!(matches!(b.resign(), Err(LogError::FollowerResigned)));
}

#[test]
fn stale_leader_stops() {
    let b = FailingFollower::new(follower("B", "A", 3, &MemLog::new(1)));
    let leader = manual_leader(2, &MemLog::new(1), vec![b.clone()], 2);
    let index = leader.insert("x").unwrap();
    let pending = leader.wait_for(index);
    leader.run_async_step();

    assert!(leader.is_stale());
    assert!(pending.wait_timeout(TIMEOUT));
    assert!(matches!(
        pending.join(),
        Err(LogError::LeaderStale { term, observed_term }) if term == LogTerm::new(2) && observed_term == LogTerm::new(3)
    ));
    assert!(matches!(leader.insert("y"), Err(LogError::LeaderStale { .. })));
    let status = leader.status();
    assert!(status.stale);
}

#[test]
fn unreachable_follower_is_retried() {
    setup_logger(LevelFilter::Debug);
    let follower_log = MemLog::new(1);
    let b = FailingFollower::new(follower("B", "A", 1, &follower_log));
    b.set_failing(true);
    let leader = LogLeader::construct(
        ParticipantId::from("A"),
        LogCore::new(MemLog::new(1)),
        LogTerm::new(1),
        vec![b.clone()],
        LeaderConfiguration::builder()
            .write_concern(2)
            .retry_backoff_base(Duration::from_millis(1))
            .retry_backoff_max_exponent(3)
            .auto_replicate(false)
            .build(),
        None,
    )
    .unwrap();

    let index = leader.insert("x").unwrap();
    let committed = leader.wait_for(index);
    leader.run_async_step();
    assert!(wait_until(TIMEOUT, || b.num_requests() >= 3));
    assert!(!committed.is_ready());
    let b_stats = leader.status().follower[&ParticipantId::from("B")].clone();
    assert!(b_stats.num_errors_since_last_answer >= 1);
    assert_eq!(b_stats.last_error_reason, AppendEntriesErrorReason::CommunicationError);

    b.set_failing(false);
    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(committed.join().unwrap().index, index);
    assert_eq!(follower_log.len(), 1);
    assert!(wait_until(TIMEOUT, || {
        leader.status().follower[&ParticipantId::from("B")].num_errors_since_last_answer == 0
    }));
}

#[test]
fn dropped_requests_are_retried() {
    let follower_log = MemLog::new(1);
    let delayed_b = DelayedFollower::new(follower("B", "A", 1, &follower_log));
    let leader = LogLeader::construct(
        ParticipantId::from("A"),
        LogCore::new(MemLog::new(1)),
        LogTerm::new(1),
        vec![delayed_b.clone()],
        LeaderConfiguration::builder()
            .write_concern(2)
            .retry_backoff_base(Duration::from_millis(1))
            .auto_replicate(false)
            .build(),
        None,
    )
    .unwrap();

    let committed = leader.wait_for(leader.insert("x").unwrap());
    leader.run_async_step();
    assert_eq!(delayed_b.drop_pending_append_entries(), 1);
    assert!(wait_until(TIMEOUT, || delayed_b.has_pending_append_entries()));
    delayed_b.run_async_append_entries();
    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(follower_log.len(), 1);
}

#[test]
fn stop_follower_and_rejoin() {
    let follower_log = MemLog::new(1);
    let b = follower("B", "A", 1, &follower_log);
    let delayed_b = DelayedFollower::new(b.clone());
    let leader = manual_leader(1, &MemLog::new(1), vec![delayed_b.clone()], 2);

    for i in 0..3 {
        leader.insert(format!("entry {}", i).into_bytes()).unwrap();
    }
    leader.run_async_step();
    delayed_b.run_until_idle(10);
    assert_eq!(leader.commit_index(), LogIndex::new(3));

    // The follower restarts from its persisted log.
    let log_core = b.resign().unwrap();
    let restarted = LogFollower::construct(
        ParticipantId::from("B"),
        log_core,
        LogTerm::new(1),
        ParticipantId::from("A"),
        None,
    )
    .unwrap();
    assert_eq!(restarted.in_memory_log().last_index(), LogIndex::new(3));
    delayed_b.replace_follower(restarted.clone());

    leader.insert("after restart").unwrap();
    let committed = leader.wait_for(LogIndex::new(4));
    leader.run_async_step();
    delayed_b.run_until_idle(10);
    assert!(committed.wait_timeout(TIMEOUT));
    assert_eq!(follower_log.len(), 4);
    assert_eq!(restarted.commit_index(), LogIndex::new(4));
}

#[test]
fn leader_status_reports_followers() {
    let delayed_b = DelayedFollower::new(follower("B", "A", 1, &MemLog::new(1)));
    let leader = manual_leader(1, &MemLog::new(1), vec![delayed_b.clone()], 2);
    leader.insert("x").unwrap();
    leader.run_async_step();

    let json = LogStatus::Leader(leader.status()).to_json().unwrap();
    assert_eq!(json["role"], "leader");
    assert_eq!(json["term"], 1);
    assert_eq!(json["writeConcern"], 2);
    assert_eq!(json["local"]["spearHead"], 1);
    assert_eq!(json["follower"]["A"]["spearHead"], 1);
    assert_eq!(json["follower"]["B"]["spearHead"], 0);
    assert_eq!(json["follower"]["B"]["requestInFlight"], true);
}

#[test]
fn construction_rejects_unsatisfiable_write_concern() {
    let log = MemLog::with_terms(7, &[1]);
    let error = LogLeader::construct(
        ParticipantId::from("A"),
        LogCore::new(log),
        LogTerm::new(1),
        Vec::new(),
        LeaderConfiguration::builder().write_concern(2).build(),
        None,
    )
    .err()
    .unwrap();
    assert!(matches!(
        error.error,
        LogError::WriteConcernUnsatisfiable { write_concern: 2, participants: 1 }
    ));
    // The core is handed back intact.
    assert_eq!(error.log_core.read_all().unwrap().len(), 1);
}
