//! Integration tests for the LRU replacement policy

use std::sync::Arc;
use std::thread;

use stratum::buffer::LruReplacer;
use stratum::common::FrameId;

#[test]
fn test_least_recently_unpinned_order() {
    let replacer = LruReplacer::new(7);

    for i in [1usize, 2, 3, 4, 5, 6] {
        replacer.unpin(FrameId::new(i));
    }
    assert_eq!(replacer.size(), 6);

    assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    assert_eq!(replacer.victim(), Some(FrameId::new(3)));
    assert_eq!(replacer.size(), 3);
}

#[test]
fn test_pin_interleaved_with_unpin() {
    let replacer = LruReplacer::new(7);

    for i in [1usize, 2, 3] {
        replacer.unpin(FrameId::new(i));
    }
    replacer.pin(FrameId::new(1));
    replacer.pin(FrameId::new(2));
    assert_eq!(replacer.size(), 1);

    // 2 returns after 3 became unpinned earlier.
    replacer.unpin(FrameId::new(2));
    assert_eq!(replacer.victim(), Some(FrameId::new(3)));
    assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    assert_eq!(replacer.victim(), None);
}

#[test]
fn test_unpin_is_idempotent_for_recency() {
    let replacer = LruReplacer::new(7);

    replacer.unpin(FrameId::new(1));
    replacer.unpin(FrameId::new(2));
    replacer.unpin(FrameId::new(1));

    assert_eq!(replacer.size(), 2);
    assert_eq!(replacer.victim(), Some(FrameId::new(1)));
}

#[test]
fn test_concurrent_unpin_victim() {
    let replacer = Arc::new(LruReplacer::new(64));

    let unpinners: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..16 {
                    replacer.unpin(FrameId::new(t * 16 + i));
                }
            })
        })
        .collect();
    for handle in unpinners {
        handle.join().unwrap();
    }
    assert_eq!(replacer.size(), 64);

    let victims: Vec<_> = (0..2)
        .map(|_| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(frame_id) = replacer.victim() {
                    seen.push(frame_id);
                }
                seen
            })
        })
        .collect();

    let mut all: Vec<FrameId> = victims
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    all.sort();
    all.dedup();
    // Every frame was evicted exactly once across both threads.
    assert_eq!(all.len(), 64);
    assert_eq!(replacer.size(), 0);
}
