/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared by the replicated log and the revision tree engine.
//!
//! The types in [`basic`] are "inert": they are sent around, persisted, and inspected, but have no active
//! behavior of their own. They follow the newtype pattern.

pub mod basic;

pub use basic::*;
