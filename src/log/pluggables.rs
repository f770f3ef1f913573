/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable key/value persistence of replicated logs.
//!
//! [`KeyValueLog`](super::kv_log::KeyValueLog) stores a log in any ordered key/value store that implements
//! [`KVStore`]. Writes are grouped into a [`WriteBatch`], which the store must apply atomically and durably.
//! A store that cannot apply a batch returns a [`KVWriteError`] and leaves its contents unchanged.

use std::fmt::{self, Display, Formatter};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVWriteError(pub String);

impl Display for KVWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "write batch was not applied: {}", self.0)
    }
}

impl std::error::Error for KVWriteError {}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All key/value pairs with `from <= key < to`, ordered by key.
    fn range(&self, from: &[u8], to: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
