/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Keeping a collection's revision tree in step with its storage.
//!
//! Writes to a collection become visible at a storage sequence number, but concurrent transactions make
//! them visible out of order: a transaction that started earlier may still commit at a sequence number
//! below one that is already visible. A [MetaCollection] therefore buffers every revision update under its
//! sequence number and applies it to the tree only once no registered transaction ("blocker") could still
//! produce an update at or below it.

pub mod lock;

pub mod meta_collection;

pub mod pluggables;

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use typed_builder::TypedBuilder;

pub use lock::{AccessMode, ReadGuard, TimedRwLock, WriteGuard};
pub use meta_collection::{MetaCollection, PendingUpdates, RevisionTreeSummary};
pub use pluggables::{CollectionStore, RevisionScan};

use crate::revision_tree::RevisionTreeError;
use crate::types::{SequenceNumber, TransactionId};

#[derive(Debug)]
pub enum CollectionError {
    /// The collection lock could not be acquired in time. The caller may retry.
    LockTimeout { mode: AccessMode, timeout: Duration },
    /// The tree no longer matches the collection. It has been rebuilt from a collection scan.
    Inconsistent(RevisionTreeError),
    RevisionTree(RevisionTreeError),
    /// An update was buffered at or below the sequence number the tree has already been advanced to.
    StaleSequence { seq: SequenceNumber, applied: SequenceNumber },
    BlockerExists(TransactionId),
    Store(String),
}

impl Display for CollectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::LockTimeout { mode, timeout } => {
                write!(f, "{:?} lock not acquired within {:?}", mode, timeout)
            }
            CollectionError::Inconsistent(err) => write!(f, "revision tree inconsistent: {}", err),
            CollectionError::RevisionTree(err) => write!(f, "revision tree: {}", err),
            CollectionError::StaleSequence { seq, applied } => write!(
                f,
                "update at sequence {} arrived after the tree reached {}",
                seq, applied
            ),
            CollectionError::BlockerExists(trx) => write!(f, "transaction {} already holds a blocker", trx),
            CollectionError::Store(message) => write!(f, "store: {}", message),
        }
    }
}

impl From<RevisionTreeError> for CollectionError {
    fn from(value: RevisionTreeError) -> Self {
        CollectionError::RevisionTree(value)
    }
}

/// Parameters of a [MetaCollection].
#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [MetaCollectionConfiguration]. On the builder call the following methods to construct a valid [MetaCollectionConfiguration].

    Required:
    - `.name(...)`

    Optional:
    - `.revision_tree_depth(...)`
    - `.hibernation_delay(...)`
    - `.serialize_interval(...)`
    - `.rebuild_batch_size(...)`
    - `.lock_timeout(...)`
    - `.verify_before_serialize(...)`
    - `.log_events(...)`
"
))]
pub struct MetaCollectionConfiguration {
    #[builder(setter(into, doc = "Set the collection's name, used in logs and events. Required."))]
    pub name: String,
    #[builder(default = 6, setter(doc = "Set the depth of the collection's revision tree, 1 to 7. Defaults to 6."))]
    pub revision_tree_depth: u8,
    #[builder(default = 10, setter(doc = "Set the number of hibernation requests ignored before the tree is compressed. Defaults to 10."))]
    pub hibernation_delay: u32,
    #[builder(default = Duration::from_secs(30), setter(doc = "Set the age after which an unchanged tree is serialized again. Defaults to 30 seconds."))]
    pub serialize_interval: Duration,
    #[builder(default = 5000, setter(doc = "Set the number of revisions inserted into the tree at once during a rebuild. Defaults to 5000."))]
    pub rebuild_batch_size: usize,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set the default timeout for acquiring the collection lock. Defaults to 10 seconds."))]
    pub lock_timeout: Duration,
    #[builder(default = true, setter(doc = "Check the tree's consistency before serializing it? Defaults to true."))]
    pub verify_before_serialize: bool,
    #[builder(default = false, setter(doc = "Enable logging of events? Defaults to false."))]
    pub log_events: bool,
}
