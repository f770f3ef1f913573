/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The storage a [MetaCollection](super::MetaCollection) keeps a revision tree for.
//!
//! The store only has to report how far its writes have progressed and to scan the revisions it holds as
//! of one consistent snapshot. Writers report their changes to the collection themselves, through
//! [buffer_updates](super::MetaCollection::buffer_updates).

use super::CollectionError;
use crate::types::{RevisionId, SequenceNumber};

pub trait CollectionStore: Send + Sync + 'static {
    /// Sequence number of the latest write visible in the store.
    fn latest_sequence_number(&self) -> SequenceNumber;

    /// Every revision in the store, as of one snapshot.
    fn scan_revisions(&self) -> Result<RevisionScan<'_>, CollectionError>;
}

/// A snapshot scan of the revisions in a [CollectionStore].
pub struct RevisionScan<'a> {
    /// Sequence number the snapshot was taken at. Writes after it are not part of the scan.
    pub sequence_number: SequenceNumber,
    pub revisions: Box<dyn Iterator<Item = Result<RevisionId, CollectionError>> + 'a>,
}
