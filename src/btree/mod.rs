//! B-tree storage backing
//!
//! Secondary indexes live in copy-on-write B-link trees whose nodes are
//! records in the store. This module provides the two record families the
//! tree needs (the logical-to-physical pointer table and the immutable node
//! table) plus the ordered-key seam the tree algorithm is driven through.

pub mod backend;
pub mod index;

pub use backend::{BdTreeNodeData, BdTreeNodeTable, BdTreePointerTable};
pub use index::{IndexEntry, IndexKey, IndexTree, LocalBTreeIndex};

/// Stable identity of a B-tree node
///
/// Logical and physical pointers are disjoint 64-bit id spaces; a logical
/// pointer survives node rewrites, a physical pointer names one immutable
/// version of the node's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPtr(pub u64);

/// Identity of one immutable version of a node's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalPtr(pub u64);
