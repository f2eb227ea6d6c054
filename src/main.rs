use std::sync::Arc;

use stratum::buffer::BufferPoolManager;
use stratum::index::{BPlusTree, Transaction};
use stratum::storage::disk::DiskManager;
use stratum::{PageId, RecordId, SlotId};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratum=debug".into()),
        )
        .init();

    println!("Stratum - a teaching storage engine");
    println!("===================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    println!("Created disk manager for: {db_path}");

    let bpm = Arc::new(BufferPoolManager::new(16, disk_manager));
    println!("Created buffer pool with 16 frames\n");

    // Small fan-outs so the demo tree actually splits.
    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), 4, 4);
    let mut txn = Transaction::new();

    for key in 1..=10 {
        let rid = RecordId::new(PageId::new(100 + key), SlotId::new(0));
        tree.insert(key, rid, &mut txn).expect("insert failed");
    }
    println!("Inserted keys 1..=10");

    let mut result = Vec::new();
    for key in [3, 7, 42] {
        result.clear();
        let found = tree
            .get_value(key, &mut result, &mut txn)
            .expect("lookup failed");
        if found {
            println!("  get({key}) -> {}", result[0]);
        } else {
            println!("  get({key}) -> not found");
        }
    }

    let keys: Vec<i32> = tree
        .iter()
        .expect("iterator failed")
        .map(|item| item.map(|(key, _)| key))
        .collect::<stratum::Result<_>>()
        .expect("scan failed");
    println!("In-order scan: {keys:?}");

    tree.remove(5, &mut txn).expect("remove failed");
    tree.remove(6, &mut txn).expect("remove failed");
    println!("Removed keys 5 and 6\n");

    println!("Tree structure:");
    print!("{}", tree.to_outline().expect("outline failed"));

    bpm.flush_all().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully");
}
