use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{
    KeyType, PageId, RecordId, Result, StratumError, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::index_iterator::IndexIterator;
use super::transaction::{PageLatch, Transaction};
use super::tree_page::{
    set_parent_page_id, InternalPage, InternalPageRef, LeafPage, LeafPageRef, NodePageRef,
};

/// What a descent intends to do at the leaf; decides the latch kind taken
/// on each node and the safety predicate for early release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchMode {
    Read,
    Insert,
    Delete,
}

/// Guard over the tree's root page id. Distinct from any frame latch;
/// holding it in write mode is the only way to change the root.
enum RootGuard<'a> {
    Read(RwLockReadGuard<'a, PageId>),
    Write(RwLockWriteGuard<'a, PageId>),
}

impl RootGuard<'_> {
    fn root_id(&self) -> PageId {
        match self {
            RootGuard::Read(guard) => **guard,
            RootGuard::Write(guard) => **guard,
        }
    }

    fn set(&mut self, root_id: PageId) {
        match self {
            RootGuard::Write(guard) => **guard = root_id,
            RootGuard::Read(_) => unreachable!("root changed under a read guard"),
        }
    }
}

/// A B+ tree whose nodes are pages fetched through the buffer pool.
///
/// Keys map to record ids, keys are unique, and leaves are chained for
/// in-order iteration. Concurrent operations follow latch crabbing: a
/// descent takes the child's latch before releasing ancestors, and
/// releases every ancestor as soon as the child proves safe for the
/// operation at hand.
pub struct BPlusTree {
    index_name: String,
    root_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    leaf_max_size: i32,
    internal_max_size: i32,
}

impl BPlusTree {
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            root_id: RwLock::new(INVALID_PAGE_ID),
            bpm,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Reopens an index whose root id was persisted in the header page.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let root_id = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_record(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };
        Ok(Self {
            index_name,
            root_id: RwLock::new(root_id),
            bpm,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id.read()
    }

    pub fn is_empty(&self) -> bool {
        !self.root_id.read().is_valid()
    }

    /// Point lookup. On a hit the record id is appended to `result` and
    /// true is returned.
    pub fn get_value(
        &self,
        key: KeyType,
        result: &mut Vec<RecordId>,
        txn: &mut Transaction,
    ) -> Result<bool> {
        let mut root_guard = Some(RootGuard::Read(self.root_id.read()));
        if !root_guard.as_ref().unwrap().root_id().is_valid() {
            return Ok(false);
        }
        txn.add_to_page_set(None);

        let outcome = self.get_value_inner(key, result, txn, &mut root_guard);
        self.release_all(txn, &mut root_guard);
        outcome
    }

    fn get_value_inner<'a>(
        &'a self,
        key: KeyType,
        result: &mut Vec<RecordId>,
        txn: &mut Transaction,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<bool> {
        self.find_leaf(key, LatchMode::Read, false, txn, root_guard)?;
        let latch = txn
            .page_set()
            .last()
            .and_then(|entry| entry.as_ref())
            .expect("descent left no leaf latch");
        let leaf = LeafPageRef::new(latch.data());
        match leaf.lookup(key) {
            Some(rid) => {
                result.push(rid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Inserts a unique key. Returns false when the key already exists.
    pub fn insert(&self, key: KeyType, rid: RecordId, txn: &mut Transaction) -> Result<bool> {
        let mut root_guard = Some(RootGuard::Write(self.root_id.write()));
        txn.add_to_page_set(None);

        let outcome = self.insert_inner(key, rid, txn, &mut root_guard);
        let cleanup = self.finish(txn, &mut root_guard);
        let inserted = outcome?;
        cleanup?;
        Ok(inserted)
    }

    fn insert_inner<'a>(
        &'a self,
        key: KeyType,
        rid: RecordId,
        txn: &mut Transaction,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<bool> {
        if !root_guard.as_ref().unwrap().root_id().is_valid() {
            self.start_new_tree(key, rid, root_guard)?;
            return Ok(true);
        }

        self.find_leaf(key, LatchMode::Insert, false, txn, root_guard)?;
        let leaf_pos = txn.page_set_len() - 1;

        let new_size = {
            let guard = txn.write_guard_at(leaf_pos);
            if LeafPageRef::new(guard.data()).lookup(key).is_some() {
                return Ok(false);
            }
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.insert(key, rid)
        };

        // A node can sit exactly at max_size after a merge, so the next
        // insert overshoots by one; split on reaching the bound either way.
        if new_size >= self.leaf_max_size {
            self.split_leaf(txn, leaf_pos, root_guard)?;
        }
        Ok(true)
    }

    fn start_new_tree<'a>(
        &'a self,
        key: KeyType,
        rid: RecordId,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        let mut guard = self.bpm.new_page_write()?;
        let root_id = guard.page_id();
        {
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.init(root_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, rid);
        }
        drop(guard);

        root_guard
            .as_mut()
            .expect("root guard released before the root was set")
            .set(root_id);
        self.update_root_record(root_id)?;
        debug!(index = %self.index_name, root = %root_id, "started new tree");
        Ok(())
    }

    /// Splits the leaf at queue position `leaf_pos`, which has just
    /// reached `leaf_max_size` entries.
    fn split_leaf<'a>(
        &'a self,
        txn: &mut Transaction,
        leaf_pos: usize,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        let mut sibling_guard = self.bpm.new_page_write()?;
        let sibling_id = sibling_guard.page_id();

        let (leaf_id, old_next, split_key) = {
            let leaf_guard = txn.write_guard_at(leaf_pos);
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            let leaf_id = leaf.page_id();
            let parent_id = leaf.parent_page_id();
            let old_next = leaf.next_page_id();

            let mut sibling = LeafPage::new(sibling_guard.data_mut());
            sibling.init(sibling_id, parent_id, self.leaf_max_size);
            leaf.move_half_to(&mut sibling);

            sibling.set_next_page_id(old_next);
            sibling.set_prev_page_id(leaf_id);
            leaf.set_next_page_id(sibling_id);

            (leaf_id, old_next, sibling.key_at(0))
        };

        if old_next.is_valid() {
            let mut next_guard = self.bpm.write_page(old_next)?;
            LeafPage::new(next_guard.data_mut()).set_prev_page_id(sibling_id);
        }

        debug!(leaf = %leaf_id, sibling = %sibling_id, key = split_key, "split leaf");
        self.insert_into_parent(txn, leaf_pos, split_key, &mut sibling_guard, root_guard)
    }

    /// Hooks a freshly split-off node into the parent of the node at
    /// `child_pos`, growing a new root when the split reached the top.
    /// Splits the parent recursively when it overflows in turn.
    fn insert_into_parent<'a>(
        &'a self,
        txn: &mut Transaction,
        child_pos: usize,
        key: KeyType,
        new_child_guard: &mut WritePageGuard,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        let (old_id, old_parent) = {
            let guard = txn.write_guard_at(child_pos);
            let node = NodePageRef::new(guard.data());
            (node.page_id(), node.parent_page_id())
        };
        let new_child_id = new_child_guard.page_id();

        if !old_parent.is_valid() {
            // The split node was the root: grow the tree by one level.
            let mut root_page_guard = self.bpm.new_page_write()?;
            let new_root_id = root_page_guard.page_id();
            {
                let mut root = InternalPage::new(root_page_guard.data_mut());
                root.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_id, key, new_child_id);
            }
            set_parent_page_id(txn.write_guard_at(child_pos).data_mut(), new_root_id);
            set_parent_page_id(new_child_guard.data_mut(), new_root_id);
            drop(root_page_guard);

            root_guard
                .as_mut()
                .expect("root guard released before a root split")
                .set(new_root_id);
            self.update_root_record(new_root_id)?;
            debug!(index = %self.index_name, root = %new_root_id, "grew new root");
            return Ok(());
        }

        // The parent must have been retained by the descent: the child
        // was unsafe, otherwise it could not have split.
        assert!(child_pos >= 1, "split node has a parent but no queue entry");
        let parent_pos = child_pos - 1;

        let new_size = {
            let parent_guard = txn.write_guard_at(parent_pos);
            let mut parent = InternalPage::new(parent_guard.data_mut());
            debug_assert_eq!(parent.page_id(), old_parent);
            parent.insert_node_after(old_id, key, new_child_id)
        };

        if new_size >= self.internal_max_size {
            let mut sibling_guard = self.bpm.new_page_write()?;
            let sibling_id = sibling_guard.page_id();

            let (split_key, moved) = {
                let parent_guard = txn.write_guard_at(parent_pos);
                let mut parent = InternalPage::new(parent_guard.data_mut());
                let size = parent.size() as usize;
                let split_from = size - size / 2;
                let split_key = parent.key_at(split_from);

                let mut sibling = InternalPage::new(sibling_guard.data_mut());
                sibling.init(sibling_id, parent.parent_page_id(), self.internal_max_size);
                let moved = parent.move_half_to(&mut sibling);
                (split_key, moved)
            };

            for child in moved {
                if child == new_child_id {
                    set_parent_page_id(new_child_guard.data_mut(), sibling_id);
                } else {
                    self.set_parent_of(txn, child, sibling_id)?;
                }
            }

            debug!(internal = %old_parent, sibling = %sibling_id, key = split_key, "split internal");
            self.insert_into_parent(txn, parent_pos, split_key, &mut sibling_guard, root_guard)?;
        }
        Ok(())
    }

    /// Removes a key; removing an absent key is a no-op.
    pub fn remove(&self, key: KeyType, txn: &mut Transaction) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut root_guard = Some(RootGuard::Write(self.root_id.write()));
        txn.add_to_page_set(None);

        let outcome = self.remove_inner(key, txn, &mut root_guard);
        let cleanup = self.finish(txn, &mut root_guard);
        outcome?;
        cleanup
    }

    fn remove_inner<'a>(
        &'a self,
        key: KeyType,
        txn: &mut Transaction,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        // Re-check now that the root-id guard is held.
        if !root_guard.as_ref().unwrap().root_id().is_valid() {
            return Ok(());
        }

        self.find_leaf(key, LatchMode::Delete, false, txn, root_guard)?;
        let leaf_pos = txn.page_set_len() - 1;

        let underfull = {
            let guard = txn.write_guard_at(leaf_pos);
            let mut leaf = LeafPage::new(guard.data_mut());
            let index = leaf.key_index(key);
            if index >= leaf.size() as usize || leaf.key_at(index) != key {
                return Ok(());
            }
            leaf.remove_at(index);
            let min = if leaf.parent_page_id().is_valid() {
                leaf.min_size()
            } else {
                1
            };
            leaf.size() < min
        };

        if underfull {
            self.coalesce_or_redistribute(txn, leaf_pos, root_guard)?;
        }
        Ok(())
    }

    /// Restores the size invariant of the underfull node at queue
    /// position `pos`: redistribute a single entry from a sibling when
    /// one can spare it, otherwise merge with a sibling and recurse on
    /// the parent if the removal of its separator leaves it underfull.
    fn coalesce_or_redistribute<'a>(
        &'a self,
        txn: &mut Transaction,
        pos: usize,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        let (node_id, parent_id, node_is_leaf) = {
            let guard = txn.write_guard_at(pos);
            let node = NodePageRef::new(guard.data());
            (node.page_id(), node.parent_page_id(), node.is_leaf())
        };

        if !parent_id.is_valid() {
            return self.adjust_root(txn, pos, root_guard);
        }
        let parent_pos = pos - 1;

        let (node_index, left_id, right_id) = {
            let parent_guard = txn.write_guard_at(parent_pos);
            let parent = InternalPageRef::new(parent_guard.data());
            let node_index = parent
                .value_index(node_id)
                .expect("underfull node missing from its parent");
            let left_id = if node_index > 0 {
                parent.child_at(node_index - 1)
            } else {
                INVALID_PAGE_ID
            };
            let right_id = if node_index + 1 < parent.size() as usize {
                parent.child_at(node_index + 1)
            } else {
                INVALID_PAGE_ID
            };
            (node_index, left_id, right_id)
        };

        // Prefer borrowing: left sibling first, then right.
        let mut left_guard = if left_id.is_valid() {
            Some(self.bpm.write_page(left_id)?)
        } else {
            None
        };
        if let Some(sibling_guard) = left_guard.as_mut() {
            let sibling = NodePageRef::new(sibling_guard.data());
            if sibling.size() > sibling.min_size() {
                self.redistribute(txn, pos, parent_pos, sibling_guard, 1, node_index)?;
                return Ok(());
            }
        }

        let mut right_guard = if right_id.is_valid() {
            Some(self.bpm.write_page(right_id)?)
        } else {
            None
        };
        if let Some(sibling_guard) = right_guard.as_mut() {
            let sibling = NodePageRef::new(sibling_guard.data());
            if sibling.size() > sibling.min_size() {
                self.redistribute(txn, pos, parent_pos, sibling_guard, 0, node_index)?;
                return Ok(());
            }
        }

        // No sibling can spare an entry: merge.
        let parent_underfull;
        if let Some(mut left) = left_guard {
            // Move this node's contents into its left sibling and drop
            // the node.
            let middle_key = {
                let parent_guard = txn.write_guard_at(parent_pos);
                InternalPageRef::new(parent_guard.data()).key_at(node_index)
            };

            if node_is_leaf {
                let next_id = {
                    let node_guard = txn.write_guard_at(pos);
                    let mut node = LeafPage::new(node_guard.data_mut());
                    let mut recipient = LeafPage::new(left.data_mut());
                    node.move_all_to(&mut recipient);
                    recipient.next_page_id()
                };
                if next_id.is_valid() {
                    // The successor leaf is the right sibling when one
                    // exists, and its latch is already in hand then.
                    if let Some(right) = right_guard.as_mut() {
                        debug_assert_eq!(right.page_id(), next_id);
                        LeafPage::new(right.data_mut()).set_prev_page_id(left_id);
                    } else {
                        let mut next_guard = self.bpm.write_page(next_id)?;
                        LeafPage::new(next_guard.data_mut()).set_prev_page_id(left_id);
                    }
                }
            } else {
                let moved = {
                    let node_guard = txn.write_guard_at(pos);
                    let mut node = InternalPage::new(node_guard.data_mut());
                    let mut recipient = InternalPage::new(left.data_mut());
                    node.move_all_to(&mut recipient, middle_key)
                };
                for child in moved {
                    self.set_parent_of(txn, child, left_id)?;
                }
            }

            parent_underfull = {
                let parent_guard = txn.write_guard_at(parent_pos);
                let mut parent = InternalPage::new(parent_guard.data_mut());
                parent.remove_at(node_index);
                let min = if parent.parent_page_id().is_valid() {
                    parent.min_size()
                } else {
                    2
                };
                parent.size() < min
            };
            txn.add_to_deleted_page_set(node_id);
            debug!(node = %node_id, into = %left_id, "coalesced into left sibling");
        } else {
            // Leftmost child: pull the right sibling's contents into
            // this node and drop the sibling.
            let mut right = right_guard.expect("underfull non-root node has no siblings");
            let middle_key = {
                let parent_guard = txn.write_guard_at(parent_pos);
                InternalPageRef::new(parent_guard.data()).key_at(node_index + 1)
            };

            if node_is_leaf {
                let next_id = {
                    let node_guard = txn.write_guard_at(pos);
                    let mut node = LeafPage::new(node_guard.data_mut());
                    let mut sibling = LeafPage::new(right.data_mut());
                    sibling.move_all_to(&mut node);
                    node.next_page_id()
                };
                if next_id.is_valid() {
                    let mut next_guard = self.bpm.write_page(next_id)?;
                    LeafPage::new(next_guard.data_mut()).set_prev_page_id(node_id);
                }
            } else {
                let moved = {
                    let node_guard = txn.write_guard_at(pos);
                    let mut node = InternalPage::new(node_guard.data_mut());
                    let mut sibling = InternalPage::new(right.data_mut());
                    sibling.move_all_to(&mut node, middle_key)
                };
                for child in moved {
                    self.set_parent_of(txn, child, node_id)?;
                }
            }

            parent_underfull = {
                let parent_guard = txn.write_guard_at(parent_pos);
                let mut parent = InternalPage::new(parent_guard.data_mut());
                parent.remove_at(node_index + 1);
                let min = if parent.parent_page_id().is_valid() {
                    parent.min_size()
                } else {
                    2
                };
                parent.size() < min
            };
            txn.add_to_deleted_page_set(right.page_id());
            debug!(node = %right.page_id(), into = %node_id, "coalesced right sibling");
        }

        if parent_underfull {
            self.coalesce_or_redistribute(txn, parent_pos, root_guard)?;
        }
        Ok(())
    }

    /// Moves a single entry from `sibling` into the node at `pos`.
    /// `index == 0` means the sibling is the right neighbor, `index == 1`
    /// the left; the parent's separator key is rotated accordingly.
    fn redistribute(
        &self,
        txn: &mut Transaction,
        pos: usize,
        parent_pos: usize,
        sibling_guard: &mut WritePageGuard,
        index: usize,
        node_index: usize,
    ) -> Result<()> {
        let node_is_leaf = {
            let guard = txn.write_guard_at(pos);
            NodePageRef::new(guard.data()).is_leaf()
        };

        let (node_id, moved_child) = {
            let (head, tail) = txn.page_set_mut().split_at_mut(pos);
            let parent_guard = match head[parent_pos].as_mut() {
                Some(PageLatch::Write(guard)) => guard,
                _ => panic!("parent latch not retained for redistribution"),
            };
            let node_guard = match tail[0].as_mut() {
                Some(PageLatch::Write(guard)) => guard,
                _ => panic!("node latch missing for redistribution"),
            };
            let node_id = node_guard.page_id();
            let mut parent = InternalPage::new(parent_guard.data_mut());

            let moved_child = if node_is_leaf {
                let mut node = LeafPage::new(node_guard.data_mut());
                let mut sibling = LeafPage::new(sibling_guard.data_mut());
                if index == 0 {
                    sibling.move_first_to_end_of(&mut node);
                    parent.set_key_at(node_index + 1, sibling.key_at(0));
                } else {
                    sibling.move_last_to_front_of(&mut node);
                    parent.set_key_at(node_index, node.key_at(0));
                }
                None
            } else {
                let mut node = InternalPage::new(node_guard.data_mut());
                let mut sibling = InternalPage::new(sibling_guard.data_mut());
                if index == 0 {
                    let up_key = sibling.key_at(1);
                    let down_key = parent.key_at(node_index + 1);
                    let child = sibling.move_first_to_end_of(&mut node, down_key);
                    parent.set_key_at(node_index + 1, up_key);
                    Some(child)
                } else {
                    let up_key = sibling.key_at(sibling.size() as usize - 1);
                    let down_key = parent.key_at(node_index);
                    let child = sibling.move_last_to_front_of(&mut node, down_key);
                    parent.set_key_at(node_index, up_key);
                    Some(child)
                }
            };
            (node_id, moved_child)
        };

        if let Some(child) = moved_child {
            self.set_parent_of(txn, child, node_id)?;
        }
        let from_right = index == 0;
        debug!(node = %node_id, from_right, "redistributed one entry");
        Ok(())
    }

    /// Handles an underfull root: an internal root left with a single
    /// child is collapsed onto that child, an emptied leaf root ends the
    /// tree. The old root is scheduled for deletion.
    fn adjust_root<'a>(
        &'a self,
        txn: &mut Transaction,
        pos: usize,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        let (old_root_id, is_leaf, size, only_child) = {
            let guard = txn.write_guard_at(pos);
            let node = NodePageRef::new(guard.data());
            let only_child = if !node.is_leaf() && node.size() == 1 {
                InternalPageRef::new(guard.data()).child_at(0)
            } else {
                INVALID_PAGE_ID
            };
            (node.page_id(), node.is_leaf(), node.size(), only_child)
        };

        if !is_leaf && size == 1 {
            self.set_parent_of(txn, only_child, INVALID_PAGE_ID)?;
            root_guard
                .as_mut()
                .expect("root guard released before a root collapse")
                .set(only_child);
            self.update_root_record(only_child)?;
            txn.add_to_deleted_page_set(old_root_id);
            debug!(index = %self.index_name, root = %only_child, "collapsed root");
        } else if is_leaf && size == 0 {
            root_guard
                .as_mut()
                .expect("root guard released before the tree emptied")
                .set(INVALID_PAGE_ID);
            self.update_root_record(INVALID_PAGE_ID)?;
            txn.add_to_deleted_page_set(old_root_id);
            debug!(index = %self.index_name, "tree is now empty");
        }
        Ok(())
    }

    /// Iterator positioned at the first entry of the leftmost leaf.
    pub fn iter(&self) -> Result<IndexIterator> {
        self.make_iterator(None)
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn iter_from(&self, key: KeyType) -> Result<IndexIterator> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, key: Option<KeyType>) -> Result<IndexIterator> {
        let mut root_guard = Some(RootGuard::Read(self.root_id.read()));
        if !root_guard.as_ref().unwrap().root_id().is_valid() {
            return Ok(IndexIterator::empty(Arc::clone(&self.bpm)));
        }

        // The transaction is local: an error drops every latch with it.
        let mut txn = Transaction::new();
        txn.add_to_page_set(None);
        self.find_leaf(
            key.unwrap_or(0),
            LatchMode::Read,
            key.is_none(),
            &mut txn,
            &mut root_guard,
        )?;

        let latch = txn
            .take_page_set()
            .pop()
            .flatten()
            .expect("descent left no leaf latch");
        let PageLatch::Read(guard) = latch else {
            unreachable!("read descent produced a write latch")
        };
        let index = match key {
            Some(key) => LeafPageRef::new(guard.data()).key_index(key),
            None => 0,
        };
        Ok(IndexIterator::new(Arc::clone(&self.bpm), guard, index))
    }

    /// Descends from the root to the leaf covering `key` (or the leftmost
    /// leaf), latching each node in `mode`'s latch kind and appending it
    /// to the transaction's queue. Ancestors, including the root-id
    /// guard's sentinel, are released as soon as the current node is safe
    /// for the operation.
    fn find_leaf<'a>(
        &'a self,
        key: KeyType,
        mode: LatchMode,
        left_most: bool,
        txn: &mut Transaction,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<()> {
        let mut child_id = root_guard
            .as_ref()
            .expect("descent without the root-id guard")
            .root_id();

        loop {
            let latch = match mode {
                LatchMode::Read => PageLatch::Read(self.bpm.read_page(child_id)?),
                LatchMode::Insert | LatchMode::Delete => {
                    PageLatch::Write(self.bpm.write_page(child_id)?)
                }
            };

            let (is_leaf, safe, next_id) = {
                let data = latch.data();
                let node = NodePageRef::new(data);
                let is_leaf = node.is_leaf();
                let next_id = if is_leaf {
                    INVALID_PAGE_ID
                } else if left_most {
                    InternalPageRef::new(data).child_at(0)
                } else {
                    InternalPageRef::new(data).lookup(key)
                };
                (is_leaf, Self::is_safe(&node, mode), next_id)
            };

            txn.add_to_page_set(Some(latch));
            if safe {
                self.release_ancestors(txn, root_guard);
            }
            if is_leaf {
                return Ok(());
            }
            child_id = next_id;
        }
    }

    /// A node is safe when the operation cannot propagate a structural
    /// change above it: reads always, inserts when one more entry cannot
    /// fill it, deletes when one fewer entry cannot underflow it.
    fn is_safe(node: &NodePageRef<'_>, mode: LatchMode) -> bool {
        match mode {
            LatchMode::Read => true,
            LatchMode::Insert => node.size() < node.max_size() - 1,
            LatchMode::Delete => {
                if node.is_root() {
                    if node.is_leaf() {
                        // Removing the last entry empties the tree and
                        // rewrites the root id.
                        node.size() > 1
                    } else {
                        node.size() > 2
                    }
                } else {
                    node.size() > node.min_size()
                }
            }
        }
    }

    /// Releases everything in the queue except the most recent entry, in
    /// acquisition order. The sentinel releases the root-id guard.
    fn release_ancestors<'a>(
        &'a self,
        txn: &mut Transaction,
        root_guard: &mut Option<RootGuard<'a>>,
    ) {
        while txn.page_set_len() > 1 {
            match txn.pop_front_page() {
                Some(None) => {
                    root_guard.take();
                }
                Some(Some(latch)) => drop(latch),
                None => break,
            }
        }
    }

    /// Releases the whole queue in acquisition order.
    fn release_all<'a>(&'a self, txn: &mut Transaction, root_guard: &mut Option<RootGuard<'a>>) {
        for entry in txn.take_page_set() {
            if entry.is_none() {
                root_guard.take();
            }
        }
        root_guard.take();
    }

    /// Releases all latches, then drains the deleted-page set.
    fn finish<'a>(&'a self, txn: &mut Transaction, root_guard: &mut Option<RootGuard<'a>>) -> Result<()> {
        self.release_all(txn, root_guard);
        for page_id in txn.take_deleted_page_set() {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Rewrites a child's parent pointer. The write is routed through a
    /// latch the operation already holds when the child sits on the
    /// descent path; re-latching it would self-deadlock.
    fn set_parent_of(&self, txn: &mut Transaction, child_id: PageId, parent_id: PageId) -> Result<()> {
        for entry in txn.page_set_mut() {
            if let Some(PageLatch::Write(guard)) = entry {
                if guard.page_id() == child_id {
                    set_parent_page_id(guard.data_mut(), parent_id);
                    return Ok(());
                }
            }
        }
        let mut guard = self.bpm.write_page(child_id)?;
        set_parent_page_id(guard.data_mut(), parent_id);
        Ok(())
    }

    /// Persists the root id under this tree's name in the header page.
    fn update_root_record(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_id)
            && !header.insert_record(&self.index_name, root_id)
        {
            return Err(StratumError::HeaderPageFull);
        }
        Ok(())
    }

    /// Graphviz dot rendering of the tree, for debugging.
    pub fn to_graph(&self) -> Result<String> {
        let mut out = String::from("digraph tree {\n");
        let root_id = self.root_page_id();
        if root_id.is_valid() {
            self.graph_node(root_id, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn graph_node(&self, page_id: PageId, out: &mut String) -> Result<()> {
        enum Node {
            Leaf { label: String, next: PageId },
            Internal { label: String, children: Vec<PageId> },
        }

        let node = {
            let guard = self.bpm.read_page(page_id)?;
            if NodePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafPageRef::new(guard.data());
                let keys: Vec<String> = (0..leaf.size() as usize)
                    .map(|i| leaf.key_at(i).to_string())
                    .collect();
                Node::Leaf {
                    label: keys.join("|"),
                    next: leaf.next_page_id(),
                }
            } else {
                let internal = InternalPageRef::new(guard.data());
                let mut cells = vec![String::from("*")];
                for i in 1..internal.size() as usize {
                    cells.push(internal.key_at(i).to_string());
                }
                Node::Internal {
                    label: cells.join("|"),
                    children: (0..internal.size() as usize)
                        .map(|i| internal.child_at(i))
                        .collect(),
                }
            }
        };

        match node {
            Node::Leaf { label, next } => {
                let _ = writeln!(
                    out,
                    "  leaf_{} [shape=record, label=\"P{}: {}\"];",
                    page_id.as_i32(),
                    page_id.as_i32(),
                    label
                );
                if next.is_valid() {
                    let _ = writeln!(
                        out,
                        "  leaf_{} -> leaf_{};",
                        page_id.as_i32(),
                        next.as_i32()
                    );
                }
            }
            Node::Internal { label, children } => {
                let _ = writeln!(
                    out,
                    "  int_{} [shape=record, label=\"P{}: {}\"];",
                    page_id.as_i32(),
                    page_id.as_i32(),
                    label
                );
                for child in children {
                    let child_guard = self.bpm.read_page(child)?;
                    let prefix = if NodePageRef::new(child_guard.data()).is_leaf() {
                        "leaf"
                    } else {
                        "int"
                    };
                    drop(child_guard);
                    let _ = writeln!(
                        out,
                        "  int_{} -> {}_{};",
                        page_id.as_i32(),
                        prefix,
                        child.as_i32()
                    );
                    self.graph_node(child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Indented text dump of the tree, for debugging.
    pub fn to_outline(&self) -> Result<String> {
        let mut out = String::new();
        let root_id = self.root_page_id();
        if root_id.is_valid() {
            self.outline_node(root_id, 0, &mut out)?;
        } else {
            out.push_str("(empty tree)\n");
        }
        Ok(out)
    }

    fn outline_node(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let indent = "  ".repeat(depth);
        let children = {
            let guard = self.bpm.read_page(page_id)?;
            if NodePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafPageRef::new(guard.data());
                let keys: Vec<String> = (0..leaf.size() as usize)
                    .map(|i| leaf.key_at(i).to_string())
                    .collect();
                let _ = writeln!(
                    out,
                    "{}leaf {} [{}] next={}",
                    indent,
                    page_id.as_i32(),
                    keys.join(","),
                    leaf.next_page_id().as_i32()
                );
                Vec::new()
            } else {
                let internal = InternalPageRef::new(guard.data());
                let mut keys = Vec::new();
                for i in 1..internal.size() as usize {
                    keys.push(internal.key_at(i).to_string());
                }
                let _ = writeln!(
                    out,
                    "{}internal {} [{}]",
                    indent,
                    page_id.as_i32(),
                    keys.join(",")
                );
                (0..internal.size() as usize)
                    .map(|i| internal.child_at(i))
                    .collect()
            }
        };
        for child in children {
            self.outline_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::storage::disk::DiskManager;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::NamedTempFile;

    fn setup(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (Arc::new(BufferPoolManager::new(pool_size, dm)), temp_file)
    }

    fn rid(n: KeyType) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(0))
    }

    struct LeafInfo {
        id: PageId,
        next: PageId,
        prev: PageId,
        keys: Vec<KeyType>,
    }

    fn walk(
        bpm: &BufferPoolManager,
        page_id: PageId,
        expected_parent: PageId,
        leaves: &mut Vec<LeafInfo>,
    ) {
        let guard = bpm.read_page(page_id).unwrap();
        let node = NodePageRef::new(guard.data());
        assert_eq!(
            node.parent_page_id(),
            expected_parent,
            "bad parent pointer on page {page_id}"
        );

        if node.is_leaf() {
            let leaf = LeafPageRef::new(guard.data());
            leaves.push(LeafInfo {
                id: page_id,
                next: leaf.next_page_id(),
                prev: leaf.prev_page_id(),
                keys: (0..leaf.size() as usize).map(|i| leaf.key_at(i)).collect(),
            });
        } else {
            let internal = InternalPageRef::new(guard.data());
            let children: Vec<PageId> = (0..internal.size() as usize)
                .map(|i| internal.child_at(i))
                .collect();
            drop(guard);
            for child in children {
                walk(bpm, child, page_id, leaves);
            }
        }
    }

    /// Walks the whole tree checking parent pointers and both sibling
    /// links, and returns the keys in leaf-chain order.
    fn check_structure(tree: &BPlusTree, bpm: &BufferPoolManager) -> Vec<KeyType> {
        let root_id = tree.root_page_id();
        if !root_id.is_valid() {
            return Vec::new();
        }

        let mut leaves = Vec::new();
        walk(bpm, root_id, INVALID_PAGE_ID, &mut leaves);

        assert!(!leaves.first().unwrap().prev.is_valid());
        assert!(!leaves.last().unwrap().next.is_valid());
        for pair in leaves.windows(2) {
            assert_eq!(pair[0].next, pair[1].id, "broken next link");
            assert_eq!(pair[1].prev, pair[0].id, "broken prev link");
        }

        let keys: Vec<KeyType> = leaves.iter().flat_map(|leaf| leaf.keys.clone()).collect();
        assert!(
            keys.windows(2).all(|w| w[0] < w[1]),
            "keys out of order: {keys:?}"
        );
        keys
    }

    #[test]
    fn test_structure_after_sequential_inserts() {
        let (bpm, _temp) = setup(64);
        let tree = BPlusTree::new("seq", Arc::clone(&bpm), 4, 4);
        let mut txn = Transaction::new();

        for key in 1..=64 {
            assert!(tree.insert(key, rid(key), &mut txn).unwrap());
            assert_eq!(bpm.total_pin_count(), 0);
        }
        assert_eq!(check_structure(&tree, &bpm), (1..=64).collect::<Vec<_>>());
    }

    #[test]
    fn test_structure_after_reverse_inserts_and_removal() {
        let (bpm, _temp) = setup(64);
        let tree = BPlusTree::new("rev", Arc::clone(&bpm), 4, 4);
        let mut txn = Transaction::new();

        for key in (1..=48).rev() {
            assert!(tree.insert(key, rid(key), &mut txn).unwrap());
        }
        assert_eq!(check_structure(&tree, &bpm), (1..=48).collect::<Vec<_>>());

        for key in (1..=48).rev() {
            tree.remove(key, &mut txn).unwrap();
            assert_eq!(bpm.total_pin_count(), 0);
        }
        assert!(tree.is_empty());
        assert!(check_structure(&tree, &bpm).is_empty());
    }

    #[test]
    fn test_structure_under_random_churn() {
        let (bpm, _temp) = setup(64);
        let tree = BPlusTree::new("churn", Arc::clone(&bpm), 4, 4);
        let mut txn = Transaction::new();
        let mut rng = StdRng::seed_from_u64(42);
        let mut model = std::collections::BTreeSet::new();

        for step in 0..1500 {
            let key: KeyType = rng.gen_range(0..300);
            if rng.gen_bool(0.4) {
                tree.remove(key, &mut txn).unwrap();
                model.remove(&key);
            } else {
                let inserted = tree.insert(key, rid(key), &mut txn).unwrap();
                assert_eq!(inserted, model.insert(key));
            }

            if step % 100 == 99 {
                assert_eq!(
                    check_structure(&tree, &bpm),
                    model.iter().copied().collect::<Vec<_>>()
                );
                assert_eq!(bpm.total_pin_count(), 0);
            }
        }

        assert_eq!(
            check_structure(&tree, &bpm),
            model.iter().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_header_record_follows_root_changes() {
        let (bpm, _temp) = setup(32);
        let tree = BPlusTree::new("rooted", Arc::clone(&bpm), 4, 4);
        let mut txn = Transaction::new();

        let persisted_root = |bpm: &BufferPoolManager| {
            let guard = bpm.read_page(HEADER_PAGE_ID).unwrap();
            HeaderPageRef::new(guard.data()).get_record("rooted")
        };
        assert_eq!(persisted_root(&bpm), None);

        tree.insert(1, rid(1), &mut txn).unwrap();
        assert_eq!(persisted_root(&bpm), Some(tree.root_page_id()));

        // Push the tree through a root split and a root collapse; the
        // header record must follow every change.
        for key in 2..=16 {
            tree.insert(key, rid(key), &mut txn).unwrap();
        }
        assert_eq!(persisted_root(&bpm), Some(tree.root_page_id()));

        for key in 1..=16 {
            tree.remove(key, &mut txn).unwrap();
        }
        assert_eq!(persisted_root(&bpm), Some(INVALID_PAGE_ID));
        assert!(tree.is_empty());
    }
}
