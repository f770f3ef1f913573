/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replicated log engine.
//!
//! Leaf to root:
//! - [`sequence`] and [`in_memory_log`]: the structurally shared, immutable view of a log's entries.
//! - [`persisted`]: the durable storage contract and the [`LogCore`](persisted::LogCore) that owns it, with a
//!   key/value backed implementation in [`kv_log`].
//! - [`messages`] and [`status`]: what participants send each other and report about themselves.
//! - [`follower`], [`leader`] and [`participant`]: the participant roles.
//!
//! The [`ReplicatedLog`](crate::replicated_log::ReplicatedLog) facade ties a log's roles together.

pub mod follower;

pub mod in_memory_log;

pub mod kv_log;

pub mod leader;

pub mod messages;

pub mod participant;

pub mod persisted;

pub mod pluggables;

pub mod sequence;

pub mod status;

pub mod wait_for;
