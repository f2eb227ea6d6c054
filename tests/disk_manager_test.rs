//! Integration tests for the disk manager

use std::sync::Arc;
use std::thread;

use stratum::common::{PageId, PAGE_SIZE};
use stratum::storage::disk::{DiskManager, DiskScheduler};
use tempfile::NamedTempFile;

#[test]
fn test_write_read_many_pages() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let mut page_ids = Vec::new();
    for i in 0..16u8 {
        let page_id = dm.allocate_page().unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = i;
        data[PAGE_SIZE - 1] = i;
        dm.write_page(page_id, &data).unwrap();
        page_ids.push(page_id);
    }

    for (i, &page_id) in page_ids.iter().enumerate() {
        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[0], i as u8);
        assert_eq!(data[PAGE_SIZE - 1], i as u8);
    }

    assert!(dm.num_reads() >= 16);
    assert!(dm.num_writes() >= 16);
}

#[test]
fn test_reopen_preserves_page_count() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = DiskManager::new(&path).unwrap();
        for _ in 0..5 {
            let page_id = dm.allocate_page().unwrap();
            dm.write_page(page_id, &[1u8; PAGE_SIZE]).unwrap();
        }
    }

    let dm = DiskManager::new(&path).unwrap();
    assert_eq!(dm.num_pages(), 6);
    // New allocations continue past the existing pages.
    assert_eq!(dm.allocate_page().unwrap(), PageId::new(6));
}

#[test]
fn test_concurrent_allocations_are_unique() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dm = Arc::clone(&dm);
            thread::spawn(move || (0..32).map(|_| dm.allocate_page().unwrap()).collect::<Vec<_>>())
        })
        .collect();

    let mut all: Vec<PageId> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 128);
}

#[test]
fn test_scheduler_interleaved_io() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = Arc::new(DiskScheduler::new(dm));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for _ in 0..8 {
                    let page_id = scheduler.disk_manager().allocate_page().unwrap();
                    let mut data = [0u8; PAGE_SIZE];
                    data[0] = t;
                    scheduler.schedule_write_sync(page_id, &data).unwrap();

                    let mut read_back = [0u8; PAGE_SIZE];
                    scheduler.schedule_read_sync(page_id, &mut read_back).unwrap();
                    assert_eq!(read_back[0], t);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
