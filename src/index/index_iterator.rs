use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{KeyType, RecordId, Result};

use super::tree_page::LeafPageRef;

/// Forward cursor over the tree's leaves in key order.
///
/// The iterator holds the read latch and pin of at most one leaf at a
/// time. Stepping past a leaf's last entry releases that leaf before the
/// next one is fetched through its sibling link, so a waiting writer can
/// never be mutually blocked against the cursor.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            index,
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
        }
    }

    /// True once the cursor has moved past the last entry.
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(KeyType, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.leaf.as_ref()?;
            let leaf = LeafPageRef::new(guard.data());

            if self.index < leaf.size() as usize {
                let item = (leaf.key_at(self.index), leaf.rid_at(self.index));
                self.index += 1;
                return Some(Ok(item));
            }

            let next_id = leaf.next_page_id();
            // Release the current leaf before chasing the sibling link.
            self.leaf = None;
            if !next_id.is_valid() {
                return None;
            }
            match self.bpm.read_page(next_id) {
                Ok(next_guard) => {
                    self.leaf = Some(next_guard);
                    self.index = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
