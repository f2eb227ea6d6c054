use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolState;
use super::Frame;

/// RAII guard holding a page's read latch and pin.
///
/// Dropping the guard releases the latch and then unpins the page. The
/// unpin always passes `is_dirty = false`: dirtiness is tracked on the
/// frame itself when a write guard hands out mutable bytes.
pub struct ReadPageGuard {
    page_id: PageId,
    /// Keeps the frame alive for the transmuted guard below
    _frame: Arc<Frame>,
    state: Arc<PoolState>,
    guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The caller must pass the `Arc` of the frame whose data lock is
    /// taken; the guard's lifetime is erased and re-tied to that `Arc`.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, state: Arc<PoolState>) -> Self {
        let guard = frame.data.read();
        let guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(guard);

        Self {
            page_id,
            _frame: frame,
            state,
            guard: Some(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap()[..]
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before giving the pin back.
        self.guard.take();
        self.state.unpin(self.page_id, false);
    }
}

/// RAII guard holding a page's write latch and pin.
///
/// `data_mut` marks the frame dirty, so the eventual unpin does not need
/// to carry a dirty flag of its own.
pub struct WritePageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
    state: Arc<PoolState>,
    guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, state: Arc<PoolState>) -> Self {
        let guard = frame.data.write();
        let guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(guard);

        Self {
            page_id,
            frame,
            state,
            guard: Some(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap()[..]
    }

    /// Mutable access to the page bytes; marks the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.mark_dirty();
        &mut self.guard.as_mut().unwrap()[..]
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.state.unpin(self.page_id, false);
    }
}
