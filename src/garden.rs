//!
//! Garden controller
//! -----------------
//! Top-level orchestrator: owns the fid counter, the key index, the
//! metadata store, the inode ledger and the feed cache, and exposes the
//! plant/get/ban/purge/close/sync lifecycle over one byte backend and one
//! sorted key-value store.
//!
//! Concurrency model: a single cooperative-scheduling execution context per
//! garden instance. Interleaving happens only at await points; shared maps
//! use short synchronous locks, and the only lock held across an await is
//! the fid allocation mutex, which exists precisely to serialize the
//! read-increment-persist sequence.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use tracing::{debug, info, warn};

use crate::cache::FeedCache;
use crate::error::{GardenError, Result};
use crate::inode::InodeLedger;
use crate::intercept::{NamespacedStore, StoreMultiplexer};
use crate::mapper::{Core, Mapper, MapperRegistry};
use crate::meta::{now_ms, CoreRecord, KeyIndex, MetadataStore};
use crate::secrets::SecretsChannel;
use crate::store::{
    ByteBackend, KvSection, SortedKv, SECTION_COUNTER, SECTION_INODE, SECTION_KEYS, SECTION_META,
};

const FID_COUNTER_KEY: &[u8] = b"fid";

/// Caller-supplied plant override: receives the namespaced store and the
/// registered mapper and resolves with the instance. The returned future is
/// the completion signal.
pub type PlantOverride = Box<
    dyn FnOnce(NamespacedStore, Arc<dyn Mapper>) -> BoxFuture<'static, Result<Arc<dyn Core>>>
        + Send,
>;

#[derive(Debug, Clone)]
pub struct GardenConfig {
    /// Debounce window for the inode ledger.
    pub flush_delay: Duration,
    /// Origin marker attached to replication metadata.
    pub origin: String,
}

impl Default for GardenConfig {
    fn default() -> Self {
        Self { flush_delay: Duration::from_millis(100), origin: "garden".to_string() }
    }
}

/// The orchestrating multiplexer. Usually held as `Arc<Garden>`.
pub struct Garden {
    pub(crate) backend: Arc<dyn ByteBackend>,
    pub(crate) kv: Arc<dyn SortedKv>,
    pub(crate) counter: KvSection,
    pub(crate) keys: KeyIndex,
    pub(crate) meta: MetadataStore,
    pub(crate) ledger: InodeLedger,
    pub(crate) mux: StoreMultiplexer,
    pub(crate) mappers: MapperRegistry,
    pub(crate) cache: FeedCache,
    pub(crate) config: GardenConfig,
    fid_lock: tokio::sync::Mutex<()>,
}

impl Garden {
    pub fn new(backend: Arc<dyn ByteBackend>, kv: Arc<dyn SortedKv>) -> Self {
        Self::with_config(backend, kv, None, GardenConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn ByteBackend>,
        kv: Arc<dyn SortedKv>,
        secrets: Option<Arc<dyn SecretsChannel>>,
        config: GardenConfig,
    ) -> Self {
        let ledger =
            InodeLedger::new(KvSection::new(kv.clone(), SECTION_INODE), config.flush_delay);
        let mux = StoreMultiplexer::new(backend.clone(), ledger.clone(), secrets);
        Self {
            counter: KvSection::new(kv.clone(), SECTION_COUNTER),
            keys: KeyIndex::new(KvSection::new(kv.clone(), SECTION_KEYS)),
            meta: MetadataStore::new(KvSection::new(kv.clone(), SECTION_META)),
            ledger,
            mux,
            mappers: MapperRegistry::new(),
            cache: FeedCache::new(),
            config,
            fid_lock: tokio::sync::Mutex::new(()),
            backend,
            kv,
        }
    }

    /// Register a mapper for a core type tag.
    pub fn register(&self, type_tag: impl Into<String>, mapper: Arc<dyn Mapper>) {
        self.mappers.register(type_tag, mapper);
    }

    /// Allocate the next fid: read the last assigned value (0 if absent),
    /// increment, persist, return. The whole sequence holds `fid_lock`, so
    /// concurrent plant calls cannot race to the same fid.
    pub(crate) async fn next_fid(&self) -> Result<u64> {
        let _guard = self.fid_lock.lock().await;
        let last = match self.counter.get(FID_COUNTER_KEY).await? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| GardenError::StorageIo(anyhow::anyhow!("corrupt fid counter")))?,
            None => 0u64,
        };
        let next = last + 1;
        self.counter
            .put(FID_COUNTER_KEY, next.to_string().as_bytes())
            .await?;
        Ok(next)
    }

    fn store_for(&self, fid: u64, expected_key: Option<[u8; 32]>) -> NamespacedStore {
        self.mux.for_namespace(fid, expected_key)
    }

    /// Create a new core of a registered type and return its live instance.
    ///
    /// With a supplied `key` that is already indexed (and neither banned nor
    /// deleted) the existing instance is returned instead of re-creating.
    pub async fn plant(
        &self,
        type_tag: &str,
        key: Option<[u8; 32]>,
        args: serde_json::Value,
    ) -> Result<Arc<dyn Core>> {
        self.plant_with(type_tag, key, args, None).await
    }

    /// `plant` with an optional caller-supplied construction override.
    pub async fn plant_with(
        &self,
        type_tag: &str,
        key: Option<[u8; 32]>,
        args: serde_json::Value,
        override_fn: Option<PlantOverride>,
    ) -> Result<Arc<dyn Core>> {
        let mapper = self.mappers.get(type_tag)?;

        if let Some(k) = &key {
            if let Some(rec) = self.meta.try_get(k).await? {
                if rec.banned {
                    return Err(GardenError::BannedCore);
                }
                if rec.deleted {
                    return Err(GardenError::DeletedCore);
                }
                // Already held locally: hand back the existing instance.
                debug!(key = %hex::encode(k), "plant of existing key resolves to get");
                return self.get(k).await;
            }
        }

        let fid = self.next_fid().await?;
        let store = self.store_for(fid, key);

        let instance = match override_fn {
            Some(f) => f(store.clone(), mapper).await?,
            None => mapper.create(store.clone(), &args).await?,
        };
        instance.ready().await?;

        // The router observed the key material while the mapper readied.
        let observed = store.router().current_key();
        let planted_key = match (key, observed) {
            (Some(k), _) => k,
            (None, Some(k)) => k,
            (None, None) => {
                return Err(GardenError::contract("mapper produced no key material"))
            }
        };
        if instance.public_key() != planted_key {
            // Plant path: looser than the direct-load assertion; a nested
            // core may legitimately report a sub-key.
            warn!(
                fid,
                expected = %hex::encode(planted_key),
                reported = %hex::encode(instance.public_key()),
                "planted instance reports a different key than the namespace"
            );
        }

        // Re-check ban status now that the key is known; it may have become
        // banned between allocation and readiness.
        if let Some(rec) = self.meta.try_get(&planted_key).await? {
            if rec.banned {
                return Err(GardenError::BannedCore);
            }
        }

        self.keys.put(&planted_key, fid).await?;
        self.meta
            .insert(&planted_key, &CoreRecord::new(type_tag, fid, now_ms()))
            .await?;
        self.cache.insert(fid, instance.clone());
        info!(fid, key = %hex::encode(planted_key), r#type = type_tag, "planted core");
        Ok(instance)
    }

    /// Resolve a core by public key, lazily loading it on first access.
    /// Concurrent callers for the same key share a single load.
    pub async fn get(&self, key: &[u8; 32]) -> Result<Arc<dyn Core>> {
        self.get_with(key, serde_json::Value::Null).await
    }

    pub async fn get_with(&self, key: &[u8; 32], args: serde_json::Value) -> Result<Arc<dyn Core>> {
        let fid = self
            .keys
            .get(key)
            .await?
            .ok_or_else(|| GardenError::not_found(hex::encode(key)))?;
        let rec = self.meta.get(key).await?;
        if rec.banned {
            return Err(GardenError::BannedCore);
        }
        if rec.deleted {
            return Err(GardenError::DeletedCore);
        }
        let mapper = self.mappers.get(&rec.core_type)?;
        let key = *key;
        self.cache
            .get_or_load(fid, || async move {
                debug!(fid, key = %hex::encode(key), "loading core");
                let store = self.store_for(fid, Some(key));
                let instance = mapper.create(store.clone(), &args).await?;
                instance.ready().await?;
                // Direct load path: the reported identifier must match the
                // key routed through the interception layer.
                let routed = store.router().current_key().unwrap_or(key);
                if instance.public_key() != routed {
                    return Err(GardenError::contract(
                        "loaded instance reports a key that does not match routed key material",
                    ));
                }
                Ok(instance)
            })
            .await
    }

    /// Ban a core. Idempotent once banned; optionally purges its physical
    /// files. A banned key can never again be planted.
    pub async fn ban(&self, key: &[u8; 32], purge: bool) -> Result<()> {
        let rec = self.meta.get(key).await?;
        if rec.banned {
            return Ok(());
        }
        self.meta.mark_banned(key, now_ms()).await?;
        info!(key = %hex::encode(key), fid = rec.fid, purge, "banned core");
        if purge {
            self.destroy_files(key, rec.fid).await?;
        }
        self.ledger.sync().await
    }

    /// Purge a core's physical files and soft-delete its metadata. With
    /// `ban = true`, delegates to `ban(key, purge = true)`.
    pub async fn purge(&self, key: &[u8; 32], ban: bool) -> Result<()> {
        if ban {
            return self.ban(key, true).await;
        }
        let rec = self.meta.get(key).await?;
        self.destroy_files(key, rec.fid).await?;
        self.meta.mark_deleted(key, now_ms()).await?;
        info!(key = %hex::encode(key), fid = rec.fid, "purged core");
        self.ledger.sync().await
    }

    /// Close the cached instance (if any) and destroy every recorded
    /// sub-path for the fid. Best-effort: already-destroyed sub-paths and
    /// per-file failures are logged and skipped, never rolled back.
    async fn destroy_files(&self, key: &[u8; 32], fid: u64) -> Result<()> {
        if let Some(core) = self.cache.remove(fid) {
            if let Err(e) = core.close().await {
                warn!(fid, error = %e, "cached instance close failed during purge");
            }
        }
        let files = self.ledger.list_files(fid).await?;
        let store = self.store_for(fid, Some(*key));
        for rel in files {
            let handle = match store.open(&rel).await {
                Ok(h) => h,
                Err(e) => {
                    warn!(fid, path = %rel, error = %e, "open for destroy failed; skipping");
                    continue;
                }
            };
            if let Err(e) = handle.destroy().await {
                warn!(fid, path = %rel, error = %e, "destroy failed; skipping");
            }
        }
        Ok(())
    }

    /// Total recorded bytes across a core's sub-paths. Forces a ledger
    /// flush first.
    pub async fn size_of(&self, key: &[u8; 32]) -> Result<u64> {
        let fid = self
            .keys
            .get(key)
            .await?
            .ok_or_else(|| GardenError::not_found(hex::encode(key)))?;
        self.ledger.size_of(fid).await
    }

    /// Relative sub-paths recorded for a core. Forces a ledger flush first.
    pub async fn list_files(&self, key: &[u8; 32]) -> Result<Vec<String>> {
        let fid = self
            .keys
            .get(key)
            .await?
            .ok_or_else(|| GardenError::not_found(hex::encode(key)))?;
        self.ledger.list_files(fid).await
    }

    /// Ban status of a key. Unknown keys answer `false`, not an error.
    pub async fn is_banned(&self, key: &[u8; 32]) -> Result<bool> {
        match self.meta.get(key).await {
            Ok(rec) => Ok(rec.banned),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Await the inode ledger's pending flush, if any.
    pub async fn sync(&self) -> Result<()> { self.ledger.sync().await }

    /// Shut the garden down: concurrently close every cached instance,
    /// flush the ledger, then close the internal stores in fixed order
    /// (counter, key index, metadata, shared kv, root backend).
    ///
    /// Not idempotent; the controller is unusable afterwards.
    pub async fn close(&self) -> Result<()> {
        let cores = self.cache.drain();
        info!(instances = cores.len(), "closing garden");
        for res in join_all(cores.iter().map(|c| c.close())).await {
            if let Err(e) = res {
                warn!(error = %e, "instance close failed");
            }
        }
        self.ledger.sync().await?;
        self.counter.close().await?;
        self.keys.close().await?;
        self.meta.close().await?;
        self.kv.close().await?;
        self.backend.close().await
    }
}

#[cfg(test)]
#[path = "garden_tests.rs"]
mod garden_tests;
