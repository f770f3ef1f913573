//! Tests for the structurally shared log buffer.

use replog_rs::log::in_memory_log::{InMemoryLog, InMemoryLogError};
use replog_rs::log::sequence::Sequence;
use replog_rs::types::{LogEntry, LogIndex, LogPayload, LogTerm};

fn entry(term: u64, index: u64) -> LogEntry {
    LogEntry::new(
        LogTerm::new(term),
        LogIndex::new(index),
        LogPayload::from(format!("payload {}", index).into_bytes()),
    )
}

fn indices(entries: impl Iterator<Item = LogEntry>) -> Vec<u64> {
    entries.map(|entry| entry.index().int()).collect()
}

#[test]
fn sequence_push_back_keeps_old_snapshots() {
    let mut sequence = Sequence::new();
    let mut snapshots = Vec::new();
    for i in 0..1000usize {
        if i % 100 == 0 {
            snapshots.push(sequence.clone());
        }
        sequence = sequence.push_back(i);
    }

    assert_eq!(sequence.len(), 1000);
    assert!(sequence.is_balanced());
    assert_eq!(sequence.get(0), Some(&0));
    assert_eq!(sequence.get(517), Some(&517));
    assert_eq!(sequence.get(1000), None);
    assert_eq!(sequence.last(), Some(&999));

    for (n, snapshot) in snapshots.iter().enumerate() {
        assert_eq!(snapshot.len(), n * 100);
        assert!(snapshot.iter().eq(0..n * 100));
    }
}

#[test]
fn sequence_split_and_append() {
    let sequence = Sequence::from_vec((0..500).collect::<Vec<u32>>());
    let (front, back) = sequence.split_at(123);
    assert_eq!(front.len(), 123);
    assert_eq!(back.len(), 377);
    assert_eq!(back.get(0), Some(&123));
    assert!(front.is_balanced() && back.is_balanced());

    let joined = back.append(&front);
    assert_eq!(joined.len(), 500);
    assert!(joined.is_balanced());
    assert!(joined.iter().eq((123..500).chain(0..123)));

    assert!(sequence.take(10).iter().eq(0..10));
    assert!(sequence.skip(490).iter().eq(490..500));
    assert!(sequence.iter_from(495).eq(495..500));
    assert_eq!(sequence.iter_from(900).count(), 0);
}

#[test]
fn sequence_many_small_appends_stay_balanced() {
    let mut sequence = Sequence::new();
    for chunk in 0..200u32 {
        sequence = sequence.append(&Sequence::from_vec(vec![chunk; 7]));
    }
    assert_eq!(sequence.len(), 1400);
    assert!(sequence.is_balanced());
    assert_eq!(sequence.get(7 * 150), Some(&150));
}

#[test]
fn in_memory_log_push_assigns_indices() {
    let log = InMemoryLog::new();
    assert!(log.is_empty());
    assert_eq!(log.last_index(), LogIndex::new(0));
    assert_eq!(log.next_index(), LogIndex::new(1));

    let log = log
        .push(LogTerm::new(1), LogPayload::from("a"))
        .push(LogTerm::new(1), LogPayload::from("b"))
        .push(LogTerm::new(2), LogPayload::from("c"));
    assert_eq!(log.len(), 3);
    assert_eq!(log.last_index(), LogIndex::new(3));
    assert_eq!(log.last_term(), LogTerm::new(2));
    assert_eq!(log.entry(LogIndex::new(2)).map(|e| e.payload().bytes().to_vec()), Some(b"b".to_vec()));
    assert!(log.entry(LogIndex::new(0)).is_none());
    assert!(log.entry(LogIndex::new(4)).is_none());
}

#[test]
fn in_memory_log_snapshots_survive_mutation() {
    let log = InMemoryLog::from_entries((1..=10).map(|i| entry(1, i)).collect()).unwrap();
    let iterator = log.iter_from(LogIndex::new(4));

    let truncated = log.remove_back(LogIndex::new(6));
    let extended = truncated.append(vec![entry(2, 6), entry(2, 7)]).unwrap();

    assert_eq!(indices(iterator.clone()), vec![4, 5, 6, 7, 8, 9, 10]);
    assert_eq!(log.last_index(), LogIndex::new(10));
    assert_eq!(truncated.last_index(), LogIndex::new(5));
    assert_eq!(extended.last_index(), LogIndex::new(7));
    assert_eq!(extended.entry(LogIndex::new(6)).unwrap().term(), LogTerm::new(2));
    assert_eq!(log.entry(LogIndex::new(6)).unwrap().term(), LogTerm::new(1));

    // The iterator restarts from where it was cloned.
    let mut iterator = iterator;
    iterator.next();
    assert_eq!(indices(iterator.clone()), vec![5, 6, 7, 8, 9, 10]);
    assert_eq!(indices(iterator), vec![5, 6, 7, 8, 9, 10]);
}

#[test]
fn in_memory_log_remove_front() {
    let log = InMemoryLog::from_entries((1..=10).map(|i| entry(1, i)).collect()).unwrap();
    let trimmed = log.remove_front(LogIndex::new(5));
    assert_eq!(trimmed.first_index(), LogIndex::new(5));
    assert_eq!(trimmed.len(), 6);
    assert!(trimmed.entry(LogIndex::new(4)).is_none());
    assert_eq!(trimmed.entry(LogIndex::new(5)).unwrap().index(), LogIndex::new(5));
    assert_eq!(indices(trimmed.iter_from(LogIndex::new(1))), (5..=10).collect::<Vec<_>>());
    assert_eq!(log.len(), 10);
}

#[test]
fn in_memory_log_slice() {
    let log = InMemoryLog::from_entries((1..=10).map(|i| entry(1, i)).collect()).unwrap();
    assert_eq!(indices(log.slice(LogIndex::new(3), LogIndex::new(5)).into_iter()), vec![3, 4, 5]);
    assert!(log.slice(LogIndex::new(11), LogIndex::new(12)).is_empty());
    assert_eq!(log.statistics(LogIndex::new(4)).spear_head, LogIndex::new(10));
}

#[test]
fn in_memory_log_starting_after_one() {
    let log = InMemoryLog::from_entries((7..=9).map(|i| entry(3, i)).collect()).unwrap();
    assert_eq!(log.first_index(), LogIndex::new(7));
    assert_eq!(log.last_index(), LogIndex::new(9));
    assert_eq!(log.next_index(), LogIndex::new(10));
}

// The violation checks are debug assertions, so these only run in release builds.
#[cfg(not(debug_assertions))]
#[test]
fn in_memory_log_rejects_gaps_and_decreasing_terms() {
    let log = InMemoryLog::from_entries(vec![entry(2, 1), entry(2, 2)]).unwrap();
    assert_eq!(
        log.append(vec![entry(2, 4)]).err(),
        Some(InMemoryLogError::NonContiguousIndex {
            expected: LogIndex::new(3),
            found: LogIndex::new(4)
        })
    );
    assert_eq!(
        log.append(vec![entry(1, 3)]).err(),
        Some(InMemoryLogError::DecreasingTerm {
            last: LogTerm::new(2),
            found: LogTerm::new(1)
        })
    );
}

#[cfg(debug_assertions)]
#[test]
#[should_panic]
fn in_memory_log_gap_is_a_bug_in_debug_builds() {
    let log = InMemoryLog::from_entries(vec![entry(2, 1), entry(2, 2)]).unwrap();
    let _: Result<InMemoryLog, InMemoryLogError> = log.append(vec![entry(2, 4)]);
}
