//! Holds a collection's revision tree either live or compressed.
//!
//! Most trees are idle most of the time, so the accessor may swap a live tree for its zstd-compressed
//! binary form ("hibernation") and restore it the next time any operation needs the tree. At most one of
//! the two forms is kept at a time.
//!
//! Only the leaves are compressed. Waking up recomputes every inner node from them, so a tree whose inner
//! nodes were corrupted (see [`RevisionTree::corrupt`]) comes back consistent, and the marker that tags
//! such corruption as injected is dropped with it. Check consistency before hibernating to observe it.
//!
//! The accessor is not synchronized. Its owner guards it with a mutex.

use std::io::{Read, Write};

use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

use super::tree::{RevisionTree, RevisionTreeError};
use crate::types::RevisionId;

const COMPRESSION_LEVEL: i32 = 1;

pub struct RevisionTreeAccessor {
    collection: String,
    depth: u8,
    tree: Option<RevisionTree>,
    compressed: Vec<u8>,
    hibernation_delay: u32,
    hibernation_requests: u32,
    compressible: bool,
}

impl RevisionTreeAccessor {
    pub fn new(tree: RevisionTree, collection: impl Into<String>, hibernation_delay: u32) -> RevisionTreeAccessor {
        RevisionTreeAccessor {
            collection: collection.into(),
            depth: tree.depth(),
            tree: Some(tree),
            compressed: Vec::new(),
            hibernation_delay,
            hibernation_requests: 0,
            compressible: true,
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn is_hibernated(&self) -> bool {
        self.tree.is_none()
    }

    pub fn is_compressible(&self) -> bool {
        self.compressible
    }

    pub fn insert(&mut self, revisions: &[RevisionId]) -> Result<(), RevisionTreeError> {
        self.ensure_tree()?.insert(revisions);
        Ok(())
    }

    pub fn remove(&mut self, revisions: &[RevisionId]) -> Result<(), RevisionTreeError> {
        self.ensure_tree()?.remove(revisions)
    }

    pub fn clear(&mut self) -> Result<(), RevisionTreeError> {
        self.ensure_tree()?.clear();
        Ok(())
    }

    pub fn clone_tree(&mut self) -> Result<RevisionTree, RevisionTreeError> {
        Ok(self.ensure_tree()?.clone())
    }

    pub fn count(&mut self) -> Result<u64, RevisionTreeError> {
        Ok(self.ensure_tree()?.count())
    }

    pub fn root_value(&mut self) -> Result<u64, RevisionTreeError> {
        Ok(self.ensure_tree()?.root_value())
    }

    pub fn check_consistency(&mut self) -> Result<(), RevisionTreeError> {
        self.ensure_tree()?.check_consistency()
    }

    pub fn serialize_binary(&mut self, output: &mut Vec<u8>) -> Result<(), RevisionTreeError> {
        self.ensure_tree()?.serialize_binary(output)
    }

    pub fn corrupt(&mut self, count: u64, hash: u64) -> Result<(), RevisionTreeError> {
        self.ensure_tree()?.corrupt(count, hash);
        Ok(())
    }

    /// Size of the compressed form. Compresses the live tree if there is one, so it is not cheap.
    pub fn compressed_size(&mut self) -> Result<usize, RevisionTreeError> {
        match &self.tree {
            Some(tree) => Ok(compress(tree)?.len()),
            None => Ok(self.compressed.len()),
        }
    }

    /// Compress the live tree. Unless `force` is set, the first `hibernation_delay` requests since the last
    /// hibernation are ignored.
    ///
    /// Returns the compressed size when the tree was hibernated.
    pub fn hibernate(&mut self, force: bool) -> Option<usize> {
        let tree = match &self.tree {
            Some(tree) if self.compressible => tree,
            _ => return None,
        };

        self.hibernation_requests += 1;
        if !force && self.hibernation_requests <= self.hibernation_delay {
            return None;
        }
        self.hibernation_requests = 0;

        match compress(tree) {
            Ok(compressed) => {
                log::debug!(
                    "hibernated revision tree of {}: {} bytes",
                    self.collection,
                    compressed.len()
                );
                self.compressed = compressed;
                self.tree = None;
                Some(self.compressed.len())
            }
            Err(err) => {
                log::warn!(
                    "could not compress revision tree of {}, keeping it live: {}",
                    self.collection,
                    err
                );
                self.compressible = false;
                None
            }
        }
    }

    /// The live tree, decompressing it first if the accessor is hibernated.
    pub fn ensure_tree(&mut self) -> Result<&mut RevisionTree, RevisionTreeError> {
        if self.tree.is_none() {
            let tree = decompress(&self.compressed)?;
            if tree.depth() != self.depth {
                log::error!(
                    "revision tree of {} came back with depth {}, expected {}",
                    self.collection,
                    tree.depth(),
                    self.depth
                );
                return Err(RevisionTreeError::InvalidDepth(tree.depth()));
            }
            self.compressed = Vec::new();
            self.tree = Some(tree);
        }
        match self.tree.as_mut() {
            Some(tree) => Ok(tree),
            None => Err(RevisionTreeError::InvalidDepth(self.depth)),
        }
    }
}

fn compress(tree: &RevisionTree) -> Result<Vec<u8>, RevisionTreeError> {
    let mut serialized = Vec::new();
    tree.serialize_binary(&mut serialized)?;
    let mut encoder = ZstdEncoder::new(Vec::new(), COMPRESSION_LEVEL).map_err(RevisionTreeError::Compression)?;
    encoder.write_all(&serialized).map_err(RevisionTreeError::Compression)?;
    encoder.finish().map_err(RevisionTreeError::Compression)
}

fn decompress(compressed: &[u8]) -> Result<RevisionTree, RevisionTreeError> {
    let mut decoder = ZstdDecoder::new(compressed).map_err(RevisionTreeError::Compression)?;
    let mut serialized = Vec::new();
    decoder.read_to_end(&mut serialized).map_err(RevisionTreeError::Compression)?;
    RevisionTree::deserialize(&serialized)
}
