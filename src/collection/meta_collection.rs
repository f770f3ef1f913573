/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The buffered-update engine behind a collection's revision tree.
//!
//! ## Buffers and blockers
//!
//! Writers call [MetaCollection::buffer_updates] (or [MetaCollection::buffer_truncate]) with the sequence
//! number their write became visible at. A transaction that may still write registers a blocker for its
//! whole lifetime; the blocker remembers the store's latest sequence number at the time it was placed.
//! Updates are applied only up to the *committable* sequence number:
//!
//! ```text
//! committable(max_commit_seq) = min(max_commit_seq, lowest blocker seq - 1)
//! ```
//!
//! Updates are applied in sequence order. At one sequence number, a truncate clears the tree first, then
//! inserts and removals are applied.
//!
//! ## Locks
//!
//! The collection lock ([TimedRwLock]) is taken by the collection's users. Internally the buffers and the
//! tree each have their own mutex, and a thread that needs both takes the buffers first.
//!
//! ## Recovery
//!
//! If applying updates or a consistency check shows the tree no longer matches the collection, the tree is
//! rebuilt from a full scan of the store and the operation fails with [CollectionError::Inconsistent].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use super::lock::{ReadGuard, TimedRwLock, WriteGuard};
use super::pluggables::CollectionStore;
use super::{CollectionError, MetaCollectionConfiguration};
use crate::event_bus::{EventBus, EventHandlers};
use crate::events::*;
use crate::revision_tree::{RevisionTree, RevisionTreeAccessor, RevisionTreeError};
use crate::types::{RevisionId, SequenceNumber, TransactionId};

#[derive(Default)]
struct UpdateBuffers {
    inserts: BTreeMap<SequenceNumber, Vec<Vec<RevisionId>>>,
    removals: BTreeMap<SequenceNumber, Vec<Vec<RevisionId>>>,
    truncates: BTreeSet<SequenceNumber>,
    blockers: BTreeMap<TransactionId, SequenceNumber>,
    blocker_seqs: BTreeMap<SequenceNumber, usize>,
}

impl UpdateBuffers {
    fn committable_seq(&self, max_commit_seq: SequenceNumber) -> SequenceNumber {
        match self.blocker_seqs.keys().next() {
            Some(lowest) => std::cmp::min(max_commit_seq, SequenceNumber::new(lowest.int().saturating_sub(1))),
            None => max_commit_seq,
        }
    }

    fn has_updates_up_to(&self, seq: SequenceNumber) -> bool {
        let at_or_below = |first: Option<&SequenceNumber>| first.map_or(false, |first| *first <= seq);
        at_or_below(self.truncates.iter().next())
            || at_or_below(self.inserts.keys().next())
            || at_or_below(self.removals.keys().next())
    }

    fn is_empty(&self) -> bool {
        self.truncates.is_empty() && self.inserts.is_empty() && self.removals.is_empty()
    }

    /// Take every update at or below `seq`, grouped per sequence number in ascending order.
    fn take_up_to(&mut self, seq: SequenceNumber) -> Vec<(SequenceNumber, PendingBatch)> {
        let above = SequenceNumber::new(seq.int().saturating_add(1));
        let inserts = split_off_front(&mut self.inserts, above);
        let removals = split_off_front(&mut self.removals, above);
        let truncates = {
            let rest = self.truncates.split_off(&above);
            std::mem::replace(&mut self.truncates, rest)
        };

        let mut batches: BTreeMap<SequenceNumber, PendingBatch> = BTreeMap::new();
        for seq in truncates {
            batches.entry(seq).or_default().truncate = true;
        }
        for (seq, revisions) in inserts {
            batches.entry(seq).or_default().inserts = revisions.concat();
        }
        for (seq, revisions) in removals {
            batches.entry(seq).or_default().removals = revisions.concat();
        }
        batches.into_iter().collect()
    }

    fn drop_up_to(&mut self, seq: SequenceNumber) {
        let _ = self.take_up_to(seq);
    }
}

fn split_off_front<V>(map: &mut BTreeMap<SequenceNumber, V>, above: SequenceNumber) -> BTreeMap<SequenceNumber, V> {
    let rest = map.split_off(&above);
    std::mem::replace(map, rest)
}

#[derive(Default)]
struct PendingBatch {
    truncate: bool,
    inserts: Vec<RevisionId>,
    removals: Vec<RevisionId>,
}

struct TreeState {
    accessor: RevisionTreeAccessor,
    creation_seq: SequenceNumber,
    serialized_seq: SequenceNumber,
    serialized_time: Option<Instant>,
}

/// Sequence numbers that still have updates buffered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdates {
    pub inserts: Vec<SequenceNumber>,
    pub removals: Vec<SequenceNumber>,
    pub truncates: Vec<SequenceNumber>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTreeSummary {
    pub count: u64,
    pub root_value: u64,
    pub depth: u8,
    pub hibernated: bool,
    pub applied_seq: SequenceNumber,
    pub serialized_seq: SequenceNumber,
    pub creation_seq: SequenceNumber,
}

impl RevisionTreeSummary {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub struct MetaCollection<S: CollectionStore> {
    config: MetaCollectionConfiguration,
    store: S,
    exclusive_lock: TimedRwLock,
    buffers: Mutex<UpdateBuffers>,
    tree: Mutex<TreeState>,
    applied_seq: AtomicU64,
    event_publisher: Option<Sender<Event>>,
    _event_bus: Option<EventBus>,
}

impl<S: CollectionStore> MetaCollection<S> {
    /// Open the collection, building its revision tree from a scan of `store`.
    pub fn new(store: S, config: MetaCollectionConfiguration) -> Result<MetaCollection<S>, CollectionError> {
        let event_bus = EventBus::start(EventHandlers::new(config.log_events));
        let event_publisher = event_bus.as_ref().map(EventBus::publisher);
        MetaCollection::open(store, config, event_bus, event_publisher)
    }

    /// Open the collection, publishing its events to `event_publisher` instead of an event bus.
    pub fn with_event_publisher(
        store: S,
        config: MetaCollectionConfiguration,
        event_publisher: Sender<Event>,
    ) -> Result<MetaCollection<S>, CollectionError> {
        MetaCollection::open(store, config, None, Some(event_publisher))
    }

    fn open(
        store: S,
        config: MetaCollectionConfiguration,
        event_bus: Option<EventBus>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<MetaCollection<S>, CollectionError> {
        let (tree, seq) = build_tree_from(&store, &config)?;
        log::info!(
            "opened collection {} with {} revisions at sequence {}",
            config.name,
            tree.count(),
            seq
        );
        let accessor = RevisionTreeAccessor::new(tree, config.name.clone(), config.hibernation_delay);
        Ok(MetaCollection {
            store,
            exclusive_lock: TimedRwLock::new(),
            buffers: Mutex::new(UpdateBuffers::default()),
            tree: Mutex::new(TreeState {
                accessor,
                creation_seq: seq,
                serialized_seq: seq,
                serialized_time: None,
            }),
            applied_seq: AtomicU64::new(seq.int()),
            event_publisher,
            _event_bus: event_bus,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MetaCollectionConfiguration {
        &self.config
    }

    /* ↓↓↓ Collection lock ↓↓↓ */

    pub fn lock_read(&self, timeout: Duration) -> Result<ReadGuard<'_>, CollectionError> {
        self.exclusive_lock.lock_read(timeout)
    }

    pub fn lock_write(&self, timeout: Duration) -> Result<WriteGuard<'_>, CollectionError> {
        self.exclusive_lock.lock_write(timeout)
    }

    /* ↓↓↓ Buffering ↓↓↓ */

    /// Buffer the revisions a write inserted and removed. `seq` is the sequence number the write became
    /// visible at.
    pub fn buffer_updates(
        &self,
        seq: SequenceNumber,
        inserts: Vec<RevisionId>,
        removals: Vec<RevisionId>,
    ) -> Result<(), CollectionError> {
        let mut buffers = self.buffers();
        self.check_not_applied(seq)?;
        if !inserts.is_empty() {
            buffers.inserts.entry(seq).or_default().push(inserts);
        }
        if !removals.is_empty() {
            buffers.removals.entry(seq).or_default().push(removals);
        }
        Ok(())
    }

    /// Buffer the truncation of the whole collection at `seq`.
    pub fn buffer_truncate(&self, seq: SequenceNumber) -> Result<(), CollectionError> {
        let mut buffers = self.buffers();
        self.check_not_applied(seq)?;
        buffers.truncates.insert(seq);
        Ok(())
    }

    fn check_not_applied(&self, seq: SequenceNumber) -> Result<(), CollectionError> {
        let applied = self.applied_seq();
        if seq <= applied {
            log::warn!(
                "collection {} received an update at {} after applying up to {}",
                self.config.name,
                seq,
                applied
            );
            return Err(CollectionError::StaleSequence { seq, applied });
        }
        Ok(())
    }

    /// Hold back updates above the store's current sequence number until the blocker is removed.
    pub fn place_revision_tree_blocker(&self, transaction_id: TransactionId) -> Result<(), CollectionError> {
        let mut buffers = self.buffers();
        if buffers.blockers.contains_key(&transaction_id) {
            return Err(CollectionError::BlockerExists(transaction_id));
        }
        let seq = self.store.latest_sequence_number();
        buffers.blockers.insert(transaction_id, seq);
        *buffers.blocker_seqs.entry(seq).or_default() += 1;
        Ok(())
    }

    /// Remove the transaction's blocker. Removing a blocker that does not exist does nothing.
    pub fn remove_revision_tree_blocker(&self, transaction_id: TransactionId) {
        let mut buffers = self.buffers();
        let seq = match buffers.blockers.remove(&transaction_id) {
            Some(seq) => seq,
            None => {
                log::debug!("collection {} has no blocker for transaction {}", self.config.name, transaction_id);
                return;
            }
        };
        if let Some(count) = buffers.blocker_seqs.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                buffers.blocker_seqs.remove(&seq);
            }
        }
    }

    /// Highest sequence number updates may be applied up to, given `max_commit_seq`.
    pub fn committable_seq(&self, max_commit_seq: SequenceNumber) -> SequenceNumber {
        self.buffers().committable_seq(max_commit_seq)
    }

    pub fn pending_updates(&self) -> PendingUpdates {
        let buffers = self.buffers();
        PendingUpdates {
            inserts: buffers.inserts.keys().copied().collect(),
            removals: buffers.removals.keys().copied().collect(),
            truncates: buffers.truncates.iter().copied().collect(),
        }
    }

    pub fn applied_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.applied_seq.load(Ordering::Acquire))
    }

    /* ↓↓↓ Applying and serializing ↓↓↓ */

    /// Apply every buffered update that is safe to apply given `max_commit_seq`.
    pub fn apply_updates(&self, max_commit_seq: SequenceNumber) -> Result<(), CollectionError> {
        let mut buffers = self.buffers();
        let committable = buffers.committable_seq(max_commit_seq);
        let mut state = self.tree_state();
        let result = self.apply_buffered(&mut buffers, &mut state, committable);
        drop(state);
        drop(buffers);

        match result {
            Err(err) => self.recover_from_inconsistency(err),
            Ok(()) => Ok(()),
        }
    }

    fn apply_buffered(
        &self,
        buffers: &mut UpdateBuffers,
        state: &mut TreeState,
        committable: SequenceNumber,
    ) -> Result<(), RevisionTreeError> {
        if committable <= self.applied_seq() {
            return Ok(());
        }

        let batches = buffers.take_up_to(committable);
        let (mut inserts, mut removals, mut truncated) = (0, 0, false);
        for (_, batch) in batches {
            if batch.truncate {
                state.accessor.clear()?;
                truncated = true;
            }
            state.accessor.insert(&batch.inserts)?;
            state.accessor.remove(&batch.removals)?;
            inserts += batch.inserts.len();
            removals += batch.removals.len();
        }
        self.applied_seq.fetch_max(committable.int(), Ordering::AcqRel);

        if inserts > 0 || removals > 0 || truncated {
            Event::publish(
                &self.event_publisher,
                Event::ApplyRevisionUpdates(ApplyRevisionUpdatesEvent {
                    timestamp: SystemTime::now(),
                    collection: self.config.name.clone(),
                    applied_seq: committable,
                    inserts,
                    removals,
                    truncated,
                }),
            );
        }
        Ok(())
    }

    /// Whether there is anything the next [serialize_revision_tree](Self::serialize_revision_tree) would
    /// write.
    pub fn need_to_persist_revision_tree(&self, max_commit_seq: SequenceNumber) -> bool {
        let buffers = self.buffers();
        let committable = buffers.committable_seq(max_commit_seq);
        if buffers.has_updates_up_to(committable) {
            return true;
        }
        let state = self.tree_state();
        self.applied_seq() > state.serialized_seq
    }

    /// The sequence number the last serialized tree is valid for. When nothing is buffered up to the
    /// committable sequence number and the tree is unchanged since it was serialized, the serialized tree is
    /// valid up to the committable sequence number as well.
    pub fn last_serialized_revision_tree(&self, max_commit_seq: SequenceNumber) -> SequenceNumber {
        let buffers = self.buffers();
        let committable = buffers.committable_seq(max_commit_seq);
        let mut state = self.tree_state();
        if !buffers.has_updates_up_to(committable) && self.applied_seq() <= state.serialized_seq {
            state.serialized_seq = std::cmp::max(state.serialized_seq, committable);
            self.applied_seq.fetch_max(state.serialized_seq.int(), Ordering::AcqRel);
        }
        state.serialized_seq
    }

    /// Apply the safely applicable updates and append the tree's binary form to `output`.
    ///
    /// Unless `force` is set, nothing is written if the tree has not changed since the last serialization
    /// and that serialization is younger than the configured interval. Returns the sequence number the
    /// serialized tree is valid for.
    pub fn serialize_revision_tree(
        &self,
        output: &mut Vec<u8>,
        max_commit_seq: SequenceNumber,
        force: bool,
    ) -> Result<SequenceNumber, CollectionError> {
        self.apply_updates(max_commit_seq)?;

        let mut state = self.tree_state();
        let applied = self.applied_seq();
        let changed = applied > state.serialized_seq;
        let recent = state
            .serialized_time
            .map_or(false, |time| time.elapsed() < self.config.serialize_interval);
        if !force && !changed && recent {
            return Ok(state.serialized_seq);
        }

        if self.config.verify_before_serialize {
            if let Err(err) = state.accessor.check_consistency() {
                drop(state);
                return self.recover_from_inconsistency(err);
            }
        }

        let start = output.len();
        state.accessor.serialize_binary(output)?;
        let root_hash = state.accessor.root_value()?;
        state.serialized_seq = applied;
        state.serialized_time = Some(Instant::now());
        if let Some(compressed_bytes) = state.accessor.hibernate(false) {
            self.publish_hibernation(compressed_bytes);
        }

        Event::publish(
            &self.event_publisher,
            Event::SerializeRevisionTree(SerializeRevisionTreeEvent {
                timestamp: SystemTime::now(),
                collection: self.config.name.clone(),
                seq: applied,
                root_hash,
                bytes: output.len() - start,
            }),
        );
        Ok(applied)
    }

    /* ↓↓↓ Snapshots and summaries ↓↓↓ */

    /// A copy of the tree with every update applied that is safe to apply at the store's latest sequence
    /// number.
    pub fn revision_tree(&self) -> Result<RevisionTree, CollectionError> {
        self.apply_updates(self.store.latest_sequence_number())?;
        let mut state = self.tree_state();
        let tree = state.accessor.clone_tree()?;
        if let Some(compressed_bytes) = state.accessor.hibernate(false) {
            self.publish_hibernation(compressed_bytes);
        }
        Ok(tree)
    }

    /// Summary of the collection's tree, or of a tree freshly built from the store if `from_collection` is
    /// set.
    pub fn revision_tree_summary(&self, from_collection: bool) -> Result<RevisionTreeSummary, CollectionError> {
        if from_collection {
            let (tree, seq) = self.revision_tree_from_collection()?;
            return Ok(RevisionTreeSummary {
                count: tree.count(),
                root_value: tree.root_value(),
                depth: tree.depth(),
                hibernated: false,
                applied_seq: seq,
                serialized_seq: seq,
                creation_seq: seq,
            });
        }

        let mut state = self.tree_state();
        let hibernated = state.accessor.is_hibernated();
        Ok(RevisionTreeSummary {
            count: state.accessor.count()?,
            root_value: state.accessor.root_value()?,
            depth: state.accessor.depth(),
            hibernated,
            applied_seq: self.applied_seq(),
            serialized_seq: state.serialized_seq,
            creation_seq: state.creation_seq,
        })
    }

    /* ↓↓↓ Rebuilding ↓↓↓ */

    /// Build a tree from a scan of the store, without installing it.
    pub fn revision_tree_from_collection(&self) -> Result<(RevisionTree, SequenceNumber), CollectionError> {
        build_tree_from(&self.store, &self.config)
    }

    /// Replace the tree with one that is valid as of `seq`. Updates buffered at or below `seq` are dropped.
    pub fn set_revision_tree(&self, tree: RevisionTree, seq: SequenceNumber) {
        let mut buffers = self.buffers();
        buffers.drop_up_to(seq);
        let mut state = self.tree_state();
        state.accessor = RevisionTreeAccessor::new(tree, self.config.name.clone(), self.config.hibernation_delay);
        state.creation_seq = seq;
        state.serialized_seq = seq;
        state.serialized_time = None;
        self.applied_seq.store(seq.int(), Ordering::Release);
    }

    /// Replace the tree with one built from a scan of the store.
    pub fn rebuild_revision_tree(&self) -> Result<(), CollectionError> {
        let (tree, seq) = self.revision_tree_from_collection()?;
        let (root_hash, count) = (tree.root_value(), tree.count());
        self.set_revision_tree(tree, seq);
        log::info!(
            "rebuilt revision tree of {} with {} revisions at sequence {}",
            self.config.name,
            count,
            seq
        );
        Event::publish(
            &self.event_publisher,
            Event::RebuildRevisionTree(RebuildRevisionTreeEvent {
                timestamp: SystemTime::now(),
                collection: self.config.name.clone(),
                seq,
                root_hash,
                count,
            }),
        );
        Ok(())
    }

    fn recover_from_inconsistency<T>(&self, err: RevisionTreeError) -> Result<T, CollectionError> {
        let injected = err.is_injected();
        if injected {
            log::warn!("revision tree of {} is inconsistent (injected): {}", self.config.name, err);
        } else {
            log::error!("revision tree of {} is inconsistent: {}", self.config.name, err);
        }
        Event::publish(
            &self.event_publisher,
            Event::RevisionTreeInconsistent(RevisionTreeInconsistentEvent {
                timestamp: SystemTime::now(),
                collection: self.config.name.clone(),
                injected,
                detail: err.to_string(),
            }),
        );
        self.rebuild_revision_tree()?;
        Err(CollectionError::Inconsistent(err))
    }

    /* ↓↓↓ Hibernation and failure injection ↓↓↓ */

    /// Ask the tree to hibernate. The tree is only compressed when no updates are buffered, and, unless
    /// `force` is set, after enough requests.
    pub fn hibernate_revision_tree(&self, force: bool) {
        let buffers = self.buffers();
        if !buffers.is_empty() {
            return;
        }
        let mut state = self.tree_state();
        if let Some(compressed_bytes) = state.accessor.hibernate(force) {
            self.publish_hibernation(compressed_bytes);
        }
    }

    pub fn is_revision_tree_hibernated(&self) -> bool {
        self.tree_state().accessor.is_hibernated()
    }

    /// Overwrite the tree's root aggregate, so the next consistency check fails.
    pub fn corrupt_revision_tree(&self, count: u64, hash: u64) -> Result<(), CollectionError> {
        self.tree_state().accessor.corrupt(count, hash)?;
        Ok(())
    }

    fn publish_hibernation(&self, compressed_bytes: usize) {
        Event::publish(
            &self.event_publisher,
            Event::HibernateRevisionTree(HibernateRevisionTreeEvent {
                timestamp: SystemTime::now(),
                collection: self.config.name.clone(),
                compressed_bytes,
            }),
        );
    }

    fn buffers(&self) -> MutexGuard<'_, UpdateBuffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_state(&self) -> MutexGuard<'_, TreeState> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_tree_from<S: CollectionStore>(
    store: &S,
    config: &MetaCollectionConfiguration,
) -> Result<(RevisionTree, SequenceNumber), CollectionError> {
    let mut tree = RevisionTree::new(config.revision_tree_depth)?;
    let scan = store.scan_revisions()?;
    let batch_size = config.rebuild_batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    for revision in scan.revisions {
        batch.push(revision?);
        if batch.len() == batch_size {
            tree.insert(&batch);
            batch.clear();
        }
    }
    tree.insert(&batch);
    Ok((tree, scan.sequence_number))
}
