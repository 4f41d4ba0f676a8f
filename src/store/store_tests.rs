use super::memory::{MemoryBackend, MemoryKv};
use super::*;

#[tokio::test]
async fn kv_scan_is_ordered_and_range_bounded() {
    let kv = MemoryKv::new();
    for k in ["a/2", "a/1", "b/1", "a/3", "c/9"] {
        kv.put(k.as_bytes(), b"v").await.unwrap();
    }
    let rows = kv.scan(b"a/", b"b/").await.unwrap();
    let keys: Vec<_> = rows.iter().map(|(k, _)| String::from_utf8(k.clone()).unwrap()).collect();
    assert_eq!(keys, vec!["a/1", "a/2", "a/3"]);
}

#[tokio::test]
async fn kv_batch_applies_in_order() {
    let kv = MemoryKv::new();
    kv.write_batch(vec![
        BatchOp::Put { key: b"k".to_vec(), value: b"1".to_vec() },
        BatchOp::Put { key: b"k".to_vec(), value: b"2".to_vec() },
        BatchOp::Delete { key: b"gone".to_vec() },
    ])
    .await
    .unwrap();
    assert_eq!(kv.get(b"k").await.unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn closed_kv_rejects_operations() {
    let kv = MemoryKv::new();
    kv.put(b"k", b"v").await.unwrap();
    kv.close().await.unwrap();
    assert!(kv.get(b"k").await.is_err());
    // Reopen against the same map sees the durable contents.
    let kv2 = kv.reopen();
    assert_eq!(kv2.get(b"k").await.unwrap(), Some(b"v".to_vec()));
}

#[tokio::test]
async fn sections_are_isolated_views() {
    let kv: std::sync::Arc<dyn SortedKv> = std::sync::Arc::new(MemoryKv::new());
    let a = KvSection::new(kv.clone(), "a/");
    let b = KvSection::new(kv.clone(), "b/");
    a.put(b"k", b"from-a").await.unwrap();
    b.put(b"k", b"from-b").await.unwrap();
    assert_eq!(a.get(b"k").await.unwrap(), Some(b"from-a".to_vec()));
    assert_eq!(b.get(b"k").await.unwrap(), Some(b"from-b".to_vec()));
    // Scans return section-relative keys.
    let rows = a.scan(b"", b"\xff").await.unwrap();
    assert_eq!(rows, vec![(b"k".to_vec(), b"from-a".to_vec())]);
}

#[tokio::test]
async fn backend_write_read_roundtrip_with_gap_fill() {
    let be = MemoryBackend::new();
    let h = be.open("1/data").await.unwrap();
    h.write(4, b"abcd").await.unwrap();
    // The gap before the write reads back as zeroes.
    assert_eq!(h.read(0, 8).await.unwrap(), vec![0, 0, 0, 0, b'a', b'b', b'c', b'd']);
    // Short read clamps to the written extent.
    assert_eq!(h.read(6, 100).await.unwrap(), b"cd".to_vec());
}

#[tokio::test]
async fn backend_read_missing_file_errors() {
    let be = MemoryBackend::new();
    let h = be.open("nope").await.unwrap();
    assert!(h.read(0, 1).await.is_err());
}

#[tokio::test]
async fn backend_destroy_removes_and_is_tolerant() {
    let be = MemoryBackend::new();
    let h = be.open("1/data").await.unwrap();
    h.write(0, b"xyz").await.unwrap();
    h.destroy().await.unwrap();
    assert!(be.contents("1/data").is_none());
    // Destroying a path that never existed succeeds.
    let h2 = be.open("1/other").await.unwrap();
    h2.destroy().await.unwrap();
}

#[tokio::test]
async fn backend_handle_close_state() {
    let be = MemoryBackend::new();
    let h = be.open("f").await.unwrap();
    assert!(h.is_open());
    h.close().await.unwrap();
    assert!(!h.is_open());
    assert!(h.write(0, b"x").await.is_err());
}
