//! Revision trees: order-independent summaries of a collection's document revisions, used to compare
//! replicas.

pub mod accessor;

pub mod tree;

pub use accessor::RevisionTreeAccessor;
pub use tree::{RevisionTree, RevisionTreeError};
