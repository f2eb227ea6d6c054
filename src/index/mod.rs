mod b_plus_tree;
mod index_iterator;
mod transaction;
mod tree_page;

pub use b_plus_tree::BPlusTree;
pub use index_iterator::IndexIterator;
pub use transaction::{PageLatch, Transaction};
pub use tree_page::{
    InternalPage, InternalPageRef, LeafPage, LeafPageRef, NodePageRef, INTERNAL_CAPACITY,
    LEAF_CAPACITY,
};
