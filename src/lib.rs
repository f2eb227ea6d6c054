//! Stratum - the storage-engine core of a teaching database
//!
//! This crate provides a fixed-size page buffer pool on top of a
//! block-addressable disk, and a concurrent B+ tree index layered on top
//! of it. Together they form a durable, ordered key-to-record mapping
//! with point lookup, range iteration, insertion and deletion.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and reserved pages
//!   - `DiskManager`: reads and writes pages to/from a database file
//!   - `DiskScheduler`: worker-thread disk I/O queue
//!   - `HeaderPage`: catalog of `(index name, root page id)` records on
//!     the reserved page 0
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into a fixed set of frames
//!   - `LruReplacer`: least-recently-unpinned eviction policy
//!   - `Frame`: per-frame metadata; its data lock is the page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII latch-and-pin guards
//!
//! - **Index** (`index`): the B+ tree
//!   - `BPlusTree`: insert/remove/get with latch crabbing and
//!     coalesce/redistribute rebalancing
//!   - `IndexIterator`: forward cursor over the leaf chain
//!   - `Transaction`: per-operation latch queue and deleted-page set
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum::buffer::BufferPoolManager;
//! use stratum::index::{BPlusTree, Transaction};
//! use stratum::storage::disk::DiskManager;
//! use stratum::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(50, disk_manager));
//!
//! let tree = BPlusTree::new("test_index", Arc::clone(&bpm), 32, 32);
//! let mut txn = Transaction::new();
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0)), &mut txn)
//!     .unwrap();
//!
//! let mut result = Vec::new();
//! assert!(tree.get_value(42, &mut result, &mut txn).unwrap());
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{KeyType, PageId, RecordId, Result, SlotId, StratumError};
