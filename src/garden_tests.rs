use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::store::memory::{MemoryBackend, MemoryKv};
use crate::test_utils::{as_log, keypair_args, random_keypair, LogMapper};

fn test_config() -> GardenConfig {
    GardenConfig { flush_delay: Duration::from_millis(10), ..GardenConfig::default() }
}

fn garden() -> (Arc<Garden>, MemoryBackend, MemoryKv) {
    let backend = MemoryBackend::new();
    let kv = MemoryKv::new();
    let g = Garden::with_config(
        Arc::new(backend.clone()),
        Arc::new(kv.clone()),
        None,
        test_config(),
    );
    g.register("log", Arc::new(LogMapper));
    (Arc::new(g), backend, kv)
}

#[tokio::test(start_paused = true)]
async fn plant_then_get_returns_same_identity() {
    let (g, _, _) = garden();
    let (key, secret) = random_keypair();
    let planted = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    assert_eq!(planted.public_key(), key);

    let got = g.get(&key).await.unwrap();
    assert_eq!(got.public_key(), key);
    // The planted instance is cached; get must not load a second copy.
    assert!(Arc::ptr_eq(&planted, &got));
}

#[tokio::test(start_paused = true)]
async fn plant_unknown_type_fails() {
    let (g, _, _) = garden();
    let err = g.plant("missing", None, serde_json::Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), "unknown_type");
}

#[tokio::test(start_paused = true)]
async fn fids_are_monotonic_and_unique() {
    let (g, _, _) = garden();
    assert_eq!(g.next_fid().await.unwrap(), 1);
    assert_eq!(g.next_fid().await.unwrap(), 2);
    assert_eq!(g.next_fid().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fid_allocation_never_collides() {
    let (g, _, _) = garden();
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let g = g.clone();
        tasks.push(tokio::spawn(async move { g.next_fid().await.unwrap() }));
    }
    let mut fids: Vec<u64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    fids.sort_unstable();
    fids.dedup();
    assert_eq!(fids.len(), 16);
}

#[tokio::test(start_paused = true)]
async fn plant_override_controls_construction() {
    let (g, _, _) = garden();
    let (key, secret) = random_keypair();
    let args = keypair_args(&key, &secret);
    let override_fn: PlantOverride = Box::new(move |store, mapper| {
        Box::pin(async move { mapper.create(store, &args).await })
    });
    let core = g
        .plant_with("log", Some(key), serde_json::Value::Null, Some(override_fn))
        .await
        .unwrap();
    assert_eq!(core.public_key(), key);
    assert!(Arc::ptr_eq(&core, &g.get(&key).await.unwrap()));
}

#[tokio::test(start_paused = true)]
async fn get_unknown_key_is_not_found() {
    let (g, _, _) = garden();
    let err = g.get(&[0x11; 32]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn replant_of_existing_key_reuses_instance() {
    let (g, _, _) = garden();
    let (key, secret) = random_keypair();
    let first = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    let second = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test(start_paused = true)]
async fn ban_blocks_get_and_replant() {
    let (g, _, _) = garden();
    let (key, secret) = random_keypair();
    g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();

    assert!(!g.is_banned(&key).await.unwrap());
    g.ban(&key, false).await.unwrap();
    assert!(g.is_banned(&key).await.unwrap());
    // Idempotent.
    g.ban(&key, false).await.unwrap();

    assert_eq!(g.get(&key).await.unwrap_err().kind(), "banned");
    let err = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap_err();
    assert_eq!(err.kind(), "banned");
}

#[tokio::test(start_paused = true)]
async fn ban_with_purge_removes_physical_files() {
    let (g, backend, _) = garden();
    let (key, secret) = random_keypair();
    let core = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    as_log(&core).append(b"hello").await.unwrap();
    g.sync().await.unwrap();
    assert!(backend.contents("1/data").is_some());

    g.ban(&key, true).await.unwrap();
    assert!(backend.contents("1/data").is_none());
    assert!(backend.contents("1/key").is_none());
}

#[tokio::test(start_paused = true)]
async fn purge_soft_deletes_metadata_and_destroys_files() {
    let (g, backend, _) = garden();
    let (key, secret) = random_keypair();
    let core = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    as_log(&core).append(&[7u8; 64]).await.unwrap();
    g.sync().await.unwrap();

    g.purge(&key, false).await.unwrap();
    assert_eq!(g.get(&key).await.unwrap_err().kind(), "deleted");
    // Soft delete: the record survives with the flag set.
    let rec = g.meta.get(&key).await.unwrap();
    assert!(rec.deleted);
    assert!(rec.deleted_at.is_some());
    assert!(!rec.banned);
    assert!(backend.contents("1/data").is_none());
    // The ledger namespace is empty afterwards.
    assert_eq!(g.ledger.size_of(rec.fid).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn purge_with_ban_flag_delegates_to_ban() {
    let (g, _, _) = garden();
    let (key, secret) = random_keypair();
    g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    g.purge(&key, true).await.unwrap();
    assert!(g.is_banned(&key).await.unwrap());
    assert_eq!(g.get(&key).await.unwrap_err().kind(), "banned");
}

#[tokio::test(start_paused = true)]
async fn is_banned_answers_false_for_unknown_keys() {
    let (g, _, _) = garden();
    assert!(!g.is_banned(&[0x42; 32]).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn size_accounting_is_namespace_scoped() {
    let (g, _, _) = garden();
    let (k1, s1) = random_keypair();
    let (k2, s2) = random_keypair();
    let c1 = g.plant("log", Some(k1), keypair_args(&k1, &s1)).await.unwrap();
    g.plant("log", Some(k2), keypair_args(&k2, &s2)).await.unwrap();

    as_log(&c1).append(&[0u8; 100]).await.unwrap();
    g.sync().await.unwrap();

    let fid1 = g.keys.get(&k1).await.unwrap().unwrap();
    let fid2 = g.keys.get(&k2).await.unwrap().unwrap();
    // key (32) + secret_key (64) + data (100) for core 1.
    assert_eq!(g.ledger.size_of(fid1).await.unwrap(), 196);
    // Core 2 never wrote payload bytes: key material only.
    assert_eq!(g.ledger.size_of(fid2).await.unwrap(), 96);
}

#[tokio::test(start_paused = true)]
async fn close_closes_instances_and_stores() {
    let (g, _, kv) = garden();
    let (key, secret) = random_keypair();
    let core = g.plant("log", Some(key), keypair_args(&key, &secret)).await.unwrap();
    as_log(&core).append(b"tail").await.unwrap();

    g.close().await.unwrap();
    assert!(as_log(&core).closed());
    // Pending ledger entries were flushed before the stores closed.
    let reopened = kv.reopen();
    let entries = reopened.scan(b"inode/", b"inode0").await.unwrap();
    assert!(!entries.is_empty());
    // The shared kv is closed; further garden use is unsupported.
    assert!(g.sync().await.is_ok());
    assert!(kv.get(b"counter/fid").await.is_err());
}
