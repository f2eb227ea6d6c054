use std::collections::HashSet;

use crate::buffer::{ReadPageGuard, WritePageGuard};
use crate::common::PageId;

/// A latch held on a tree page during an operation.
pub enum PageLatch {
    Read(ReadPageGuard),
    Write(WritePageGuard),
}

impl PageLatch {
    pub fn page_id(&self) -> PageId {
        match self {
            PageLatch::Read(guard) => guard.page_id(),
            PageLatch::Write(guard) => guard.page_id(),
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            PageLatch::Read(guard) => guard.data(),
            PageLatch::Write(guard) => guard.data(),
        }
    }
}

/// Per-operation context for the B+ tree: the queue of latches acquired
/// while crabbing down the tree, in acquisition order, and the set of
/// pages scheduled for deletion once the operation has released
/// everything.
///
/// A `None` entry stands for the root-id guard, which is not a frame
/// latch; the release walk treats it like any other queue position.
/// Dropping the transaction drops every held guard, so an abandoned
/// operation cannot leave latches or pins behind.
#[derive(Default)]
pub struct Transaction {
    page_set: Vec<Option<PageLatch>>,
    deleted_page_set: HashSet<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a latch to the queue; `None` records the root-id-guard
    /// sentinel.
    pub fn add_to_page_set(&mut self, latch: Option<PageLatch>) {
        self.page_set.push(latch);
    }

    pub fn page_set_len(&self) -> usize {
        self.page_set.len()
    }

    /// Removes and returns the queue's front entry.
    pub(crate) fn pop_front_page(&mut self) -> Option<Option<PageLatch>> {
        if self.page_set.is_empty() {
            None
        } else {
            Some(self.page_set.remove(0))
        }
    }

    /// Drains the whole queue in acquisition order.
    pub(crate) fn take_page_set(&mut self) -> Vec<Option<PageLatch>> {
        std::mem::take(&mut self.page_set)
    }

    pub(crate) fn page_set(&self) -> &[Option<PageLatch>] {
        &self.page_set
    }

    pub(crate) fn page_set_mut(&mut self) -> &mut [Option<PageLatch>] {
        &mut self.page_set
    }

    /// The write guard at queue position `index`. Panics when the entry
    /// is the sentinel or a read latch: insert and remove descend with
    /// write latches only.
    pub(crate) fn write_guard_at(&mut self, index: usize) -> &mut WritePageGuard {
        match self.page_set[index].as_mut() {
            Some(PageLatch::Write(guard)) => guard,
            _ => panic!("expected a write latch at queue position {index}"),
        }
    }

    pub fn add_to_deleted_page_set(&mut self, page_id: PageId) {
        self.deleted_page_set.insert(page_id);
    }

    pub fn deleted_page_set(&self) -> &HashSet<PageId> {
        &self.deleted_page_set
    }

    /// Drains the deletion set.
    pub fn take_deleted_page_set(&mut self) -> HashSet<PageId> {
        std::mem::take(&mut self.deleted_page_set)
    }
}
