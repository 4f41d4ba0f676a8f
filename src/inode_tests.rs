use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::store::memory::MemoryKv;
use crate::store::{KvSection, SortedKv, SECTION_INODE};

fn ledger(kv: &MemoryKv) -> InodeLedger {
    let shared: Arc<dyn SortedKv> = Arc::new(kv.clone());
    InodeLedger::new(KvSection::new(shared, SECTION_INODE), Duration::from_millis(50))
}

/// Kv whose point lookups yield first, forcing lookups started back to back
/// to interleave.
struct YieldingKv(MemoryKv);

#[async_trait::async_trait]
impl SortedKv for YieldingKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.0.get(key).await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> { self.0.put(key, value).await }

    async fn delete(&self, key: &[u8]) -> Result<()> { self.0.delete(key).await }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.0.write_batch(ops).await
    }

    async fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.0.scan(start, end).await
    }

    async fn close(&self) -> Result<()> { self.0.close().await }
}

#[tokio::test(start_paused = true)]
async fn writes_are_batched_and_visible_after_sync() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(1, "data", 100).await.unwrap();
    led.record_write(1, "data", 40).await.unwrap(); // smaller, must not shrink
    led.record_write(1, "tree", 16).await.unwrap();
    // Nothing persisted before the debounce window closes.
    assert_eq!(kv.len(), 0);
    led.sync().await.unwrap();
    assert_eq!(led.size_of(1).await.unwrap(), 116);
}

#[tokio::test(start_paused = true)]
async fn sync_is_immediate_when_idle() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.sync().await.unwrap();
    assert_eq!(led.size_of(7).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn max_extent_survives_across_bursts() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(1, "data", 500).await.unwrap();
    led.sync().await.unwrap();
    // A later, smaller write in a fresh burst must not shrink the entry.
    led.record_write(1, "data", 10).await.unwrap();
    led.sync().await.unwrap();
    assert_eq!(led.size_of(1).await.unwrap(), 500);
}

#[tokio::test(start_paused = true)]
async fn adjacent_fid_namespaces_are_disjoint() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(9, "data", 100).await.unwrap();
    led.record_write(9, "tree", 32).await.unwrap();
    led.record_write(10, "data", 7).await.unwrap();
    led.sync().await.unwrap();
    assert_eq!(led.size_of(9).await.unwrap(), 132);
    assert_eq!(led.size_of(10).await.unwrap(), 7);
    assert_eq!(led.list_files(10).await.unwrap(), vec!["data".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_touch_writes_keep_the_larger_extent() {
    let kv = MemoryKv::new();
    let shared: Arc<dyn SortedKv> = Arc::new(YieldingKv(kv.clone()));
    let led =
        InodeLedger::new(KvSection::new(shared, SECTION_INODE), Duration::from_millis(50));

    // Both writes miss the overlay and suspend in the persisted lookup; the
    // smaller one resumes last and must not clobber the larger extent.
    let large = {
        let led = led.clone();
        tokio::spawn(async move { led.record_write(1, "data", 100).await.unwrap() })
    };
    let small = {
        let led = led.clone();
        tokio::spawn(async move { led.record_write(1, "data", 50).await.unwrap() })
    };
    large.await.unwrap();
    small.await.unwrap();

    led.sync().await.unwrap();
    assert_eq!(led.size_of(1).await.unwrap(), 100);
}

#[tokio::test(start_paused = true)]
async fn rewrite_after_destroy_in_same_burst_starts_from_zero() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(1, "data", 100).await.unwrap();
    led.sync().await.unwrap();

    // Destroy and rewrite inside one debounce window: the stale persisted
    // size must not leak into the fresh entry.
    led.record_destroy(1, "data").await.unwrap();
    led.record_write(1, "data", 10).await.unwrap();
    led.sync().await.unwrap();

    assert_eq!(led.size_of(1).await.unwrap(), 10);
    assert_eq!(led.list_files(1).await.unwrap(), vec!["data".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn destroy_removes_entry() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(2, "data", 64).await.unwrap();
    led.record_write(2, "bitfield", 8).await.unwrap();
    led.sync().await.unwrap();
    led.record_destroy(2, "data").await.unwrap();
    led.sync().await.unwrap();
    assert_eq!(led.size_of(2).await.unwrap(), 8);
    assert_eq!(led.list_files(2).await.unwrap(), vec!["bitfield".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn burst_flushes_as_single_batch_after_fixed_delay() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(1, "a", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    // Still inside the original window; this must not restart the timer.
    led.record_write(1, "b", 2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    // 55ms after the first mutation the window has closed and both entries
    // are already persisted together; a restarted timer would still be
    // waiting here.
    assert_eq!(kv.len(), 2);
    assert_eq!(led.size_of(1).await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn list_files_returns_relative_suffixes() {
    let kv = MemoryKv::new();
    let led = ledger(&kv);
    led.record_write(3, "oplog", 10).await.unwrap();
    led.record_write(3, "sub/data", 20).await.unwrap();
    led.sync().await.unwrap();
    let mut files = led.list_files(3).await.unwrap();
    files.sort();
    assert_eq!(files, vec!["oplog".to_string(), "sub/data".to_string()]);
}
