/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A fixed-depth hash/count accumulator over the revisions of a collection.
//!
//! A tree of depth `d` has `d + 1` levels. Level `l` holds `8^l` nodes, so the leaves (level `d`) split the
//! 64-bit hash space into `8^d` buckets; a revision lands in the bucket named by the top `3d` bits of its
//! hash. Every node holds the number of revisions below it and the XOR of their hashes. Both combine
//! commutatively and are invertible, so a batch of inserts and removals gives the same tree in any order,
//! and a removal exactly cancels the matching insert.
//!
//! Two trees over the same revisions have equal [root values](RevisionTree::root_value), which makes the
//! root a cheap first comparison between replicas. The [binary format](RevisionTree::serialize_binary)
//! carries only the non-empty leaves.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::types::RevisionId;

pub const BRANCHING_BITS: u32 = 3;

pub const BRANCHING_FACTOR: usize = 1 << BRANCHING_BITS;

pub const MIN_DEPTH: u8 = 1;

pub const MAX_DEPTH: u8 = 7;

pub const BINARY_FORMAT_VERSION: u8 = 1;

#[derive(Debug)]
pub enum RevisionTreeError {
    InvalidDepth(u8),
    /// Removing the batch would take a leaf's count below zero. The tree is unchanged.
    RemoveFromEmptyBucket { leaf: u32 },
    /// A node's aggregate does not match its children. `injected` is true when the tree was corrupted on
    /// purpose through [RevisionTree::corrupt].
    Inconsistent { level: u8, position: u32, injected: bool },
    UnsupportedVersion(u8),
    LeafOutOfRange { leaf: u32, depth: u8 },
    DuplicateLeaf { leaf: u32 },
    Encode(io::Error),
    Decode(io::Error),
    Compression(io::Error),
}

impl RevisionTreeError {
    pub fn is_injected(&self) -> bool {
        matches!(self, RevisionTreeError::Inconsistent { injected: true, .. })
    }
}

impl Display for RevisionTreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RevisionTreeError::InvalidDepth(depth) => {
                write!(f, "depth {} is outside {}..={}", depth, MIN_DEPTH, MAX_DEPTH)
            }
            RevisionTreeError::RemoveFromEmptyBucket { leaf } => {
                write!(f, "removal from empty bucket {}", leaf)
            }
            RevisionTreeError::Inconsistent { level, position, injected } => write!(
                f,
                "node {} on level {} does not match its children{}",
                position,
                level,
                if *injected { " (injected)" } else { "" }
            ),
            RevisionTreeError::UnsupportedVersion(version) => {
                write!(f, "unsupported binary format version {}", version)
            }
            RevisionTreeError::LeafOutOfRange { leaf, depth } => {
                write!(f, "leaf {} does not exist in a tree of depth {}", leaf, depth)
            }
            RevisionTreeError::DuplicateLeaf { leaf } => write!(f, "leaf {} appears twice", leaf),
            RevisionTreeError::Encode(err) => write!(f, "encode: {}", err),
            RevisionTreeError::Decode(err) => write!(f, "decode: {}", err),
            RevisionTreeError::Compression(err) => write!(f, "compression: {}", err),
        }
    }
}

/// Aggregate of the revisions below one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub count: u64,
    pub hash: u64,
}

// Counts wrap instead of panicking: a corrupted node stays wrong and is caught by the consistency check.
impl Node {
    fn add(&mut self, hash: u64) {
        self.count = self.count.wrapping_add(1);
        self.hash ^= hash;
    }

    fn subtract(&mut self, hash: u64) {
        self.count = self.count.wrapping_sub(1);
        self.hash ^= hash;
    }

    fn combine(&mut self, other: &Node) {
        self.count = self.count.wrapping_add(other.count);
        self.hash ^= other.hash;
    }

    fn checked_combine(&mut self, other: &Node) -> Option<()> {
        self.count = self.count.checked_add(other.count)?;
        self.hash ^= other.hash;
        Some(())
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BinaryImage {
    version: u8,
    depth: u8,
    leaves: Vec<(u32, u64, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionTree {
    depth: u8,
    // All levels, root first. Level `l` starts at `level_offset(l)`.
    nodes: Vec<Node>,
    injected: bool,
}

impl RevisionTree {
    pub fn new(depth: u8) -> Result<RevisionTree, RevisionTreeError> {
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
            return Err(RevisionTreeError::InvalidDepth(depth));
        }
        Ok(RevisionTree {
            depth,
            nodes: vec![Node::default(); level_offset(depth + 1)],
            injected: false,
        })
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn count(&self) -> u64 {
        self.nodes[0].count
    }

    /// Summary hash of the whole tree. The empty tree's root value is 0.
    pub fn root_value(&self) -> u64 {
        self.nodes[0].hash
    }

    pub fn num_leaves(&self) -> usize {
        level_width(self.depth)
    }

    pub fn leaf(&self, leaf: u32) -> Option<Node> {
        if (leaf as usize) < self.num_leaves() {
            Some(self.nodes[level_offset(self.depth) + leaf as usize])
        } else {
            None
        }
    }

    /// The bucket `revision` hashes into.
    pub fn leaf_for(&self, revision: RevisionId) -> u32 {
        leaf_of(hash_revision(revision), self.depth)
    }

    pub fn insert(&mut self, revisions: &[RevisionId]) {
        for &revision in revisions {
            let hash = hash_revision(revision);
            let leaf = leaf_of(hash, self.depth);
            for level in 0..=self.depth {
                let index = self.node_index(level, leaf);
                self.nodes[index].add(hash);
            }
        }
    }

    /// Remove a batch of revisions. Either the whole batch is removed, or the tree is left untouched.
    ///
    /// Fails with [RevisionTreeError::RemoveFromEmptyBucket] if a leaf holds fewer revisions than the batch
    /// removes from it, and with [RevisionTreeError::Inconsistent] if an inner node does.
    pub fn remove(&mut self, revisions: &[RevisionId]) -> Result<(), RevisionTreeError> {
        let mut per_leaf: BTreeMap<u32, u64> = BTreeMap::new();
        for &revision in revisions {
            *per_leaf.entry(self.leaf_for(revision)).or_default() += 1;
        }
        let leaves = level_offset(self.depth);
        for (&leaf, &removals) in &per_leaf {
            if self.nodes[leaves + leaf as usize].count < removals {
                return Err(RevisionTreeError::RemoveFromEmptyBucket { leaf });
            }
        }
        for level in 0..self.depth {
            let mut per_node: BTreeMap<usize, u64> = BTreeMap::new();
            for (&leaf, &removals) in &per_leaf {
                *per_node.entry(self.node_index(level, leaf)).or_default() += removals;
            }
            for (index, removals) in per_node {
                if self.nodes[index].count < removals {
                    return Err(RevisionTreeError::Inconsistent {
                        level,
                        position: (index - level_offset(level)) as u32,
                        injected: self.injected,
                    });
                }
            }
        }

        for &revision in revisions {
            let hash = hash_revision(revision);
            let leaf = leaf_of(hash, self.depth);
            for level in 0..=self.depth {
                let index = self.node_index(level, leaf);
                self.nodes[index].subtract(hash);
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.nodes.iter_mut().for_each(|node| *node = Node::default());
        self.injected = false;
    }

    /// Check that every inner node is the aggregate of its children.
    pub fn check_consistency(&self) -> Result<(), RevisionTreeError> {
        for level in 0..self.depth {
            let parents = level_offset(level);
            let children = level_offset(level + 1);
            for position in 0..level_width(level) {
                let mut expected = Node::default();
                let first_child = children + position * BRANCHING_FACTOR;
                for child in &self.nodes[first_child..first_child + BRANCHING_FACTOR] {
                    expected.combine(child);
                }
                if self.nodes[parents + position] != expected {
                    return Err(RevisionTreeError::Inconsistent {
                        level,
                        position: position as u32,
                        injected: self.injected,
                    });
                }
            }
        }
        Ok(())
    }

    /// Overwrite the root aggregate. Used to test the consistency and rebuild paths.
    pub fn corrupt(&mut self, count: u64, hash: u64) {
        self.nodes[0] = Node { count, hash };
        self.injected = true;
    }

    /// Append the binary form of the tree to `output`.
    pub fn serialize_binary(&self, output: &mut Vec<u8>) -> Result<(), RevisionTreeError> {
        let offset = level_offset(self.depth);
        let leaves = self.nodes[offset..]
            .iter()
            .enumerate()
            .filter(|(_, node)| node.count > 0)
            .map(|(leaf, node)| (leaf as u32, node.count, node.hash))
            .collect();
        BinaryImage {
            version: BINARY_FORMAT_VERSION,
            depth: self.depth,
            leaves,
        }
        .serialize(output)
        .map_err(RevisionTreeError::Encode)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<RevisionTree, RevisionTreeError> {
        let image = BinaryImage::try_from_slice(bytes).map_err(RevisionTreeError::Decode)?;
        if image.version != BINARY_FORMAT_VERSION {
            return Err(RevisionTreeError::UnsupportedVersion(image.version));
        }
        let mut tree = RevisionTree::new(image.depth)?;
        let offset = level_offset(tree.depth);
        for (leaf, count, hash) in image.leaves {
            if leaf as usize >= tree.num_leaves() {
                return Err(RevisionTreeError::LeafOutOfRange { leaf, depth: tree.depth });
            }
            let node = &mut tree.nodes[offset + leaf as usize];
            if node.count > 0 {
                return Err(RevisionTreeError::DuplicateLeaf { leaf });
            }
            *node = Node { count, hash };
        }
        tree.recompute_inner_nodes()?;
        Ok(tree)
    }

    fn recompute_inner_nodes(&mut self) -> Result<(), RevisionTreeError> {
        for level in (0..self.depth).rev() {
            let parents = level_offset(level);
            let children = level_offset(level + 1);
            for position in 0..level_width(level) {
                let mut aggregate = Node::default();
                let first_child = children + position * BRANCHING_FACTOR;
                for child in &self.nodes[first_child..first_child + BRANCHING_FACTOR] {
                    aggregate.checked_combine(child).ok_or_else(|| {
                        RevisionTreeError::Decode(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("revision count overflows on level {}", level),
                        ))
                    })?;
                }
                self.nodes[parents + position] = aggregate;
            }
        }
        Ok(())
    }

    fn node_index(&self, level: u8, leaf: u32) -> usize {
        let shift = BRANCHING_BITS * (self.depth - level) as u32;
        level_offset(level) + (leaf >> shift) as usize
    }
}

/// SHA-256 of the revision's little-endian bytes, truncated to the first 8 bytes.
pub fn hash_revision(revision: RevisionId) -> u64 {
    let digest = Sha256::digest(revision.to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn leaf_of(hash: u64, depth: u8) -> u32 {
    (hash >> (64 - BRANCHING_BITS * depth as u32)) as u32
}

fn level_width(level: u8) -> usize {
    1 << (BRANCHING_BITS * level as u32)
}

// Number of nodes above `level`: (8^level - 1) / 7.
fn level_offset(level: u8) -> usize {
    (level_width(level) - 1) / (BRANCHING_FACTOR - 1)
}
