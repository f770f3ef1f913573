/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A replicated, quorum-committed log, and the revision-tree engine that keeps a collection's replicas
//! comparable.
//!
//! ## Replicated log
//!
//! A [`ReplicatedLog`](replicated_log::ReplicatedLog) is, at any time, either unconfigured, the
//! [leader](log::leader::LogLeader) of a term, or a [follower](log::follower::LogFollower) of one. The
//! leader appends entries and replicates them to its followers; an entry is committed once as many
//! participants as the leader's write concern have persisted it. Callers learn about commits through
//! [`wait_for`](replicated_log::ReplicatedLog::wait_for) futures, which resolve in index order.
//!
//! Durable storage is pluggable: anything that implements [`PersistedLog`](log::persisted::PersistedLog)
//! can hold a log's entries, and [`KeyValueLog`](log::kv_log::KeyValueLog) adapts any key/value store that
//! implements [`KVStore`](log::pluggables::KVStore).
//!
//! ## Revision trees
//!
//! A [`RevisionTree`](revision_tree::RevisionTree) summarizes a collection's document revisions in a way
//! that does not depend on the order they were added in. A [`MetaCollection`](collection::MetaCollection)
//! keeps one such tree in step with a [`CollectionStore`](collection::CollectionStore), holding back
//! updates until every transaction that could still write below them has finished.

pub mod collection;

pub(crate) mod event_bus;

pub mod events;

pub mod log;

pub mod logging;

pub mod promise;

pub mod replicated_log;

pub mod revision_tree;

pub mod types;
