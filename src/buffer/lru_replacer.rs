use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::common::FrameId;

/// Recency bookkeeping: frames keyed by the stamp they were last unpinned
/// at. The smallest stamp is the least recently unpinned frame.
struct LruInner {
    next_stamp: u64,
    /// stamp -> frame, ordered oldest first
    order: BTreeMap<u64, FrameId>,
    /// frame -> its stamp in `order`
    stamps: HashMap<FrameId, u64>,
}

/// LRU replacement policy over frame identifiers.
///
/// Tracks the frames that are resident and unpinned, in the order they
/// became unpinned. `victim` hands out the least recently unpinned frame.
/// The replacer knows nothing about page contents; the buffer pool tells
/// it when frames are pinned and unpinned.
pub struct LruReplacer {
    /// Maximum number of frames the replacer will track
    capacity: usize,
    inner: Mutex<LruInner>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                next_stamp: 0,
                order: BTreeMap::new(),
                stamps: HashMap::new(),
            }),
        }
    }

    /// Removes and returns the least recently unpinned frame, or None if
    /// no frame is tracked.
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let (&stamp, &frame_id) = inner.order.iter().next()?;
        inner.order.remove(&stamp);
        inner.stamps.remove(&frame_id);
        Some(frame_id)
    }

    /// Stops tracking a frame because it is in active use. Idempotent.
    pub fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(stamp) = inner.stamps.remove(&frame_id) {
            inner.order.remove(&stamp);
        }
    }

    /// Starts tracking a frame at the most-recent position. A frame that
    /// is already tracked keeps its original position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.stamps.contains_key(&frame_id) {
            return;
        }
        // The buffer pool never tracks more frames than exist; evicting
        // the oldest here keeps the bound anyway.
        while inner.stamps.len() >= self.capacity {
            let Some((&stamp, &oldest)) = inner.order.iter().next() else {
                break;
            };
            inner.order.remove(&stamp);
            inner.stamps.remove(&oldest);
        }
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.order.insert(stamp, frame_id);
        inner.stamps.insert(frame_id, stamp);
    }

    /// Number of tracked frames.
    pub fn size(&self) -> usize {
        self.inner.lock().stamps.len()
    }
}
