use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// One slot of the buffer pool: the bytes of the resident page plus the
/// bookkeeping the pool and the page guards share.
///
/// The `RwLock` around the bytes is the page latch. It is independent of
/// the pool's mutex and is held by callers across pool calls, which is
/// what the B+ tree's crabbing protocol relies on. The metadata obeys a
/// split protocol: pin-count and page-identity transitions happen only
/// under the pool mutex, while the dirty bit is set by write guards
/// outside it and stays sticky until flush or eviction clears it under
/// the mutex again.
pub struct Frame {
    frame_id: FrameId,
    /// Resident page, INVALID_PAGE_ID while the frame is free
    page_id: AtomicI32,
    /// Number of users holding this frame against eviction
    pin_count: AtomicU32,
    /// Set when the bytes diverge from disk
    dirty: AtomicBool,
    /// Page bytes; the lock doubles as the page latch
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicI32::new(INVALID_PAGE_ID.as_i32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_i32(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Takes one pin and returns the new count.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Gives back one pin and returns the new count, or None when the
    /// count is already zero — an unbalanced unpin, which the pool
    /// reports back to the caller as an error. The load-then-store pair
    /// is not a race: every pin transition runs under the pool mutex.
    pub fn unpin(&self) -> Option<u32> {
        let current = self.pin_count.load(Ordering::Acquire);
        if current == 0 {
            return None;
        }
        self.pin_count.store(current - 1, Ordering::Release);
        Some(current - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Records that the bytes diverge from disk. Write guards call this
    /// without the pool mutex; only flush and eviction clear it again.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Returns the frame to its free state: no page, no pins, clean,
    /// zeroed bytes.
    pub fn reset(&self) {
        self.set_page_id(INVALID_PAGE_ID);
        self.pin_count.store(0, Ordering::Release);
        self.clear_dirty();
        self.data.write().fill(0);
    }
}
