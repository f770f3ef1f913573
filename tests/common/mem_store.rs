//! A volatile [`CollectionStore`] with a sequence number that advances on every write.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use replog_rs::collection::{CollectionError, CollectionStore, RevisionScan};
use replog_rs::types::{RevisionId, SequenceNumber};

#[derive(Default)]
struct StoreState {
    seq: u64,
    revisions: BTreeSet<RevisionId>,
}

#[derive(Clone, Default)]
pub(crate) struct MemStore(Arc<Mutex<StoreState>>);

impl MemStore {
    pub(crate) fn new() -> MemStore {
        MemStore::default()
    }

    pub(crate) fn with_revisions(revisions: impl IntoIterator<Item = RevisionId>) -> MemStore {
        let store = MemStore::new();
        store.write(revisions.into_iter().collect(), Vec::new());
        store
    }

    /// Apply a write and return the sequence number it became visible at.
    pub(crate) fn write(&self, inserts: Vec<RevisionId>, removals: Vec<RevisionId>) -> SequenceNumber {
        let mut state = self.0.lock().unwrap();
        state.seq += 1;
        state.revisions.extend(inserts);
        for revision in removals {
            state.revisions.remove(&revision);
        }
        SequenceNumber::new(state.seq)
    }

    pub(crate) fn truncate(&self) -> SequenceNumber {
        let mut state = self.0.lock().unwrap();
        state.seq += 1;
        state.revisions.clear();
        SequenceNumber::new(state.seq)
    }

    /// Advance the sequence number without touching the revisions.
    pub(crate) fn tick(&self) -> SequenceNumber {
        let mut state = self.0.lock().unwrap();
        state.seq += 1;
        SequenceNumber::new(state.seq)
    }

    pub(crate) fn revisions(&self) -> Vec<RevisionId> {
        self.0.lock().unwrap().revisions.iter().copied().collect()
    }
}

impl CollectionStore for MemStore {
    fn latest_sequence_number(&self) -> SequenceNumber {
        SequenceNumber::new(self.0.lock().unwrap().seq)
    }

    fn scan_revisions(&self) -> Result<RevisionScan<'_>, CollectionError> {
        let state = self.0.lock().unwrap();
        let revisions: Vec<_> = state.revisions.iter().copied().map(Ok).collect();
        Ok(RevisionScan {
            sequence_number: SequenceNumber::new(state.seq),
            revisions: Box::new(revisions.into_iter()),
        })
    }
}
