use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::common::{FrameId, PageId, Result, StratumError, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruReplacer, ReadPageGuard, WritePageGuard};

/// Mapping state guarded by the pool mutex.
struct PoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page
    free_list: VecDeque<FrameId>,
}

/// State shared between the pool and the page guards it hands out.
pub(crate) struct PoolState {
    /// The buffer pool frames
    frames: Vec<Arc<Frame>>,
    /// Single mutex serializing every mapping change
    inner: Mutex<PoolInner>,
    /// LRU replacer for eviction decisions
    replacer: LruReplacer,
}

impl PoolState {
    /// Gives back one pin on a resident page. Returns false when the page
    /// is not resident or its pin count is already zero (a double unpin
    /// is a caller bug). The dirty flag is sticky until the page is
    /// flushed or evicted.
    pub(crate) fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        if is_dirty {
            frame.mark_dirty();
        }
        match frame.unpin() {
            None => false,
            Some(0) => {
                self.replacer.unpin(frame_id);
                true
            }
            Some(_) => true,
        }
    }
}

/// BufferPoolManager owns a fixed array of page frames and a page table
/// mapping resident page IDs to frames. It fetches pages from disk on
/// demand and evicts the least recently unpinned page when it runs out of
/// frames.
///
/// Frame latches are orthogonal to the pool mutex: callers acquire them
/// through [`ReadPageGuard`]/[`WritePageGuard`] after the pool has pinned
/// the frame, and may hold them across further pool calls.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state, also captured by page guards for their unpin
    state: Arc<PoolState>,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Fetches a page into the buffer pool and pins it. The caller must
    /// balance this with exactly one `unpin_page` (or drop of a guard
    /// built on top of it). Fails with `BufferPoolFull` when every frame
    /// is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if !page_id.is_valid() {
            return Err(StratumError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.pin(frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.available_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            // The frame stays empty; hand it back.
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.data.write().copy_from_slice(&data);
        frame.set_page_id(page_id);
        frame.clear_dirty();
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);

        Ok(Arc::clone(frame))
    }

    /// Allocates a fresh page on disk, pins it into a zeroed frame and
    /// materializes it by writing the zeroed page out.
    pub fn new_page(&self) -> Result<Arc<Frame>> {
        let mut inner = self.state.inner.lock();

        let frame_id = self.available_frame(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        frame.set_page_id(page_id);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);

        let zeros = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_write_sync(page_id, &zeros) {
            inner.page_table.remove(&page_id);
            frame.reset();
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        Ok(Arc::clone(frame))
    }

    /// See [`PoolState::unpin`].
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident dirty page back to disk and clears its dirty
    /// flag. Pure write-back: the page stays resident and keeps its pin
    /// count. Returns false when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let inner = self.state.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            data.copy_from_slice(&frame.data.read()[..]);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.clear_dirty();
        }

        Ok(true)
    }

    /// Drops a page from the pool and deallocates it on disk. A page that
    /// is not resident is deallocated directly. Returns false when the
    /// page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            self.disk_scheduler.disk_manager().deallocate_page(page_id);
            return Ok(true);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        frame.reset();
        self.state.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id);

        Ok(true)
    }

    /// Flushes every resident dirty page.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.state.inner.lock();

        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = &self.state.frames[frame_id.as_usize()];
            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                data.copy_from_slice(&frame.data.read()[..]);
                self.disk_scheduler.schedule_write_sync(page_id, &data)?;
                frame.clear_dirty();
            }
        }

        Ok(())
    }

    /// Fetches a page and takes its read latch.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Fetches a page and takes its write latch.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Allocates a new page and takes its write latch.
    pub fn new_page_write(&self) -> Result<WritePageGuard> {
        let frame = self.new_page()?;
        let page_id = frame.page_id();
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    pub fn replacer_size(&self) -> usize {
        self.state.replacer.size()
    }

    /// Pin count of a resident page, None when not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Sum of pin counts across all frames. Zero whenever no operation is
    /// in flight and no guard is outstanding.
    pub fn total_pin_count(&self) -> u32 {
        self.state.frames.iter().map(|f| f.pin_count()).sum()
    }

    /// True when every page-table entry points at a frame that agrees on
    /// its page id and no frame is shared by two entries.
    pub fn check_page_table(&self) -> bool {
        let inner = self.state.inner.lock();
        let mut seen = std::collections::HashSet::new();
        inner.page_table.iter().all(|(&page_id, &frame_id)| {
            seen.insert(frame_id) && self.state.frames[frame_id.as_usize()].page_id() == page_id
        })
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Picks a frame for reuse: free list first, then the replacer's
    /// victim, writing the victim back when dirty. The returned frame is
    /// reset and absent from the page table.
    fn available_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.state.replacer.victim() else {
            return Err(StratumError::BufferPoolFull);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            data.copy_from_slice(&frame.data.read()[..]);
            if let Err(e) = self.disk_scheduler.schedule_write_sync(old_page_id, &data) {
                // Put the victim back so the pool stays consistent.
                self.state.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        trace!(%old_page_id, %frame_id, "evicting page");
        inner.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }
}
