//! A persistent, structurally shared sequence.
//!
//! [`Sequence`] is an AVL-balanced rope whose leaves hold up to [`LEAF_CAPACITY`] elements. Every operation
//! returns a new sequence and leaves the receiver untouched; the two share every subtree the operation did
//! not have to rebuild. Appending, splitting and indexing are O(log n).
//!
//! Iterators own a reference to the root they started from, so they keep observing the snapshot they were
//! created on no matter what happens to the sequence afterwards.

use std::{cmp::max, sync::Arc};

pub const LEAF_CAPACITY: usize = 32;

enum Node<T> {
    Leaf(Vec<T>),
    Branch {
        left: Arc<Node<T>>,
        right: Arc<Node<T>>,
        len: usize,
        height: u8,
    },
}

impl<T> Node<T> {
    fn len(&self) -> usize {
        match self {
            Node::Leaf(items) => items.len(),
            Node::Branch { len, .. } => *len,
        }
    }

    fn height(&self) -> u8 {
        match self {
            Node::Leaf(_) => 0,
            Node::Branch { height, .. } => *height,
        }
    }
}

fn branch<T>(left: Arc<Node<T>>, right: Arc<Node<T>>) -> Arc<Node<T>> {
    Arc::new(Node::Branch {
        len: left.len() + right.len(),
        height: 1 + max(left.height(), right.height()),
        left,
        right,
    })
}

fn merge_or_branch<T: Clone>(left: Arc<Node<T>>, right: Arc<Node<T>>) -> Arc<Node<T>> {
    if let (Node::Leaf(l), Node::Leaf(r)) = (&*left, &*right) {
        if l.len() + r.len() <= LEAF_CAPACITY {
            let mut items = Vec::with_capacity(l.len() + r.len());
            items.extend_from_slice(l);
            items.extend_from_slice(r);
            return Arc::new(Node::Leaf(items));
        }
    }
    branch(left, right)
}

// (a, (b, c)) => ((a, b), c)
fn rotate_left<T>(node: Arc<Node<T>>) -> Arc<Node<T>> {
    if let Node::Branch { left: a, right, .. } = &*node {
        if let Node::Branch { left: b, right: c, .. } = &**right {
            return branch(branch(a.clone(), b.clone()), c.clone());
        }
    }
    node
}

// ((a, b), c) => (a, (b, c))
fn rotate_right<T>(node: Arc<Node<T>>) -> Arc<Node<T>> {
    if let Node::Branch { left, right: c, .. } = &*node {
        if let Node::Branch { left: a, right: b, .. } = &**left {
            return branch(a.clone(), branch(b.clone(), c.clone()));
        }
    }
    node
}

fn join<T: Clone>(left: Arc<Node<T>>, right: Arc<Node<T>>) -> Arc<Node<T>> {
    let (hl, hr) = (left.height(), right.height());
    if hl > hr + 1 {
        join_right(left, right)
    } else if hr > hl + 1 {
        join_left(left, right)
    } else {
        merge_or_branch(left, right)
    }
}

// Requires height(tl) > height(tr) + 1: walk down the right spine of `tl`.
fn join_right<T: Clone>(tl: Arc<Node<T>>, tr: Arc<Node<T>>) -> Arc<Node<T>> {
    let (l, c) = match &*tl {
        Node::Branch { left, right, .. } => (left.clone(), right.clone()),
        Node::Leaf(_) => return merge_or_branch(tl, tr),
    };
    if c.height() <= tr.height() + 1 {
        let t1 = merge_or_branch(c, tr);
        if t1.height() <= l.height() + 1 {
            branch(l, t1)
        } else {
            rotate_left(branch(l, rotate_right(t1)))
        }
    } else {
        let t1 = join_right(c, tr);
        if t1.height() <= l.height() + 1 {
            branch(l, t1)
        } else {
            rotate_left(branch(l, t1))
        }
    }
}

// Requires height(tr) > height(tl) + 1: walk down the left spine of `tr`.
fn join_left<T: Clone>(tl: Arc<Node<T>>, tr: Arc<Node<T>>) -> Arc<Node<T>> {
    let (c, r) = match &*tr {
        Node::Branch { left, right, .. } => (left.clone(), right.clone()),
        Node::Leaf(_) => return merge_or_branch(tl, tr),
    };
    if c.height() <= tl.height() + 1 {
        let t1 = merge_or_branch(tl, c);
        if t1.height() <= r.height() + 1 {
            branch(t1, r)
        } else {
            rotate_right(branch(rotate_left(t1), r))
        }
    } else {
        let t1 = join_left(tl, c);
        if t1.height() <= r.height() + 1 {
            branch(t1, r)
        } else {
            rotate_right(branch(t1, r))
        }
    }
}

fn join_opt<T: Clone>(left: Option<Arc<Node<T>>>, right: Option<Arc<Node<T>>>) -> Option<Arc<Node<T>>> {
    match (left, right) {
        (Some(l), Some(r)) => Some(join(l, r)),
        (l, None) => l,
        (None, r) => r,
    }
}

type Halves<T> = (Option<Arc<Node<T>>>, Option<Arc<Node<T>>>);

fn split<T: Clone>(node: &Arc<Node<T>>, at: usize) -> Halves<T> {
    if at == 0 {
        return (None, Some(node.clone()));
    }
    if at >= node.len() {
        return (Some(node.clone()), None);
    }
    match &**node {
        Node::Leaf(items) => (
            Some(Arc::new(Node::Leaf(items[..at].to_vec()))),
            Some(Arc::new(Node::Leaf(items[at..].to_vec()))),
        ),
        Node::Branch { left, right, .. } => {
            let left_len = left.len();
            if at < left_len {
                let (a, b) = split(left, at);
                (a, join_opt(b, Some(right.clone())))
            } else if at == left_len {
                (Some(left.clone()), Some(right.clone()))
            } else {
                let (a, b) = split(right, at - left_len);
                (join_opt(Some(left.clone()), a), b)
            }
        }
    }
}

fn push_rightmost<T: Clone>(node: &Arc<Node<T>>, value: T) -> Result<Arc<Node<T>>, T> {
    match &**node {
        Node::Leaf(items) if items.len() < LEAF_CAPACITY => {
            let mut items = items.clone();
            items.push(value);
            Ok(Arc::new(Node::Leaf(items)))
        }
        Node::Leaf(_) => Err(value),
        Node::Branch { left, right, .. } => {
            push_rightmost(right, value).map(|right| branch(left.clone(), right))
        }
    }
}

fn build<T: Clone>(leaves: &[Arc<Node<T>>]) -> Option<Arc<Node<T>>> {
    match leaves.len() {
        0 => None,
        1 => Some(leaves[0].clone()),
        n => {
            let (left, right) = leaves.split_at(n / 2);
            join_opt(build(left), build(right))
        }
    }
}

fn balanced<T>(node: &Node<T>) -> bool {
    match node {
        Node::Leaf(items) => !items.is_empty() && items.len() <= LEAF_CAPACITY,
        Node::Branch {
            left,
            right,
            len,
            height,
        } => {
            let (hl, hr) = (left.height(), right.height());
            hl.abs_diff(hr) <= 1
                && *height == 1 + max(hl, hr)
                && *len == left.len() + right.len()
                && balanced(left)
                && balanced(right)
        }
    }
}

/// An immutable sequence with cheap copies, appends and slices.
pub struct Sequence<T> {
    root: Option<Arc<Node<T>>>,
}

impl<T> Clone for Sequence<T> {
    fn clone(&self) -> Self {
        Sequence {
            root: self.root.clone(),
        }
    }
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Sequence { root: None }
    }
}

impl<T: Clone> Sequence<T> {
    pub fn new() -> Self {
        Sequence { root: None }
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        let leaves: Vec<Arc<Node<T>>> = items
            .chunks(LEAF_CAPACITY)
            .map(|chunk| Arc::new(Node::Leaf(chunk.to_vec())))
            .collect();
        Sequence {
            root: build(&leaves),
        }
    }

    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, mut position: usize) -> Option<&T> {
        let mut node = self.root.as_deref()?;
        if position >= node.len() {
            return None;
        }
        loop {
            match node {
                Node::Leaf(items) => return items.get(position),
                Node::Branch { left, right, .. } => {
                    if position < left.len() {
                        node = &**left;
                    } else {
                        position -= left.len();
                        node = &**right;
                    }
                }
            }
        }
    }

    pub fn last(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|position| self.get(position))
    }

    pub fn push_back(&self, value: T) -> Self {
        let root = match &self.root {
            None => Arc::new(Node::Leaf(vec![value])),
            Some(root) => match push_rightmost(root, value) {
                Ok(root) => root,
                Err(value) => join(root.clone(), Arc::new(Node::Leaf(vec![value]))),
            },
        };
        Sequence { root: Some(root) }
    }

    pub fn append(&self, other: &Sequence<T>) -> Self {
        Sequence {
            root: join_opt(self.root.clone(), other.root.clone()),
        }
    }

    /// Split into the first `at` elements and the rest.
    pub fn split_at(&self, at: usize) -> (Self, Self) {
        match &self.root {
            None => (Sequence::new(), Sequence::new()),
            Some(root) => {
                let (left, right) = split(root, at);
                (Sequence { root: left }, Sequence { root: right })
            }
        }
    }

    pub fn take(&self, count: usize) -> Self {
        self.split_at(count).0
    }

    pub fn skip(&self, count: usize) -> Self {
        self.split_at(count).1
    }

    pub fn iter(&self) -> SequenceIter<T> {
        self.iter_from(0)
    }

    /// Iterate over a frozen snapshot of the sequence, starting at `start`.
    pub fn iter_from(&self, start: usize) -> SequenceIter<T> {
        let mut stack = Vec::new();
        let mut offset = start;
        let mut current = match &self.root {
            Some(root) if start < root.len() => root.clone(),
            _ => {
                return SequenceIter {
                    stack,
                    leaf: None,
                    position: 0,
                }
            }
        };
        loop {
            let next = match &*current {
                Node::Leaf(_) => break,
                Node::Branch { left, right, .. } => {
                    if offset < left.len() {
                        stack.push(right.clone());
                        left.clone()
                    } else {
                        offset -= left.len();
                        right.clone()
                    }
                }
            };
            current = next;
        }
        SequenceIter {
            stack,
            leaf: Some(current),
            position: offset,
        }
    }

    /// Whether every node satisfies the AVL balance and size invariants.
    pub fn is_balanced(&self) -> bool {
        self.root.as_deref().map_or(true, balanced)
    }
}

#[derive(Clone)]
pub struct SequenceIter<T> {
    stack: Vec<Arc<Node<T>>>,
    leaf: Option<Arc<Node<T>>>,
    position: usize,
}

impl<T: Clone> Iterator for SequenceIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(leaf) = &self.leaf {
                if let Node::Leaf(items) = &**leaf {
                    if let Some(item) = items.get(self.position) {
                        self.position += 1;
                        return Some(item.clone());
                    }
                }
            }

            let mut node = self.stack.pop()?;
            loop {
                let next = match &*node {
                    Node::Leaf(_) => break,
                    Node::Branch { left, right, .. } => {
                        self.stack.push(right.clone());
                        left.clone()
                    }
                };
                node = next;
            }
            self.leaf = Some(node);
            self.position = 0;
        }
    }
}
