//! Feed cache: fid -> live core instance.
//! Each fid owns a `OnceCell` slot, so concurrent loads of the same core
//! coalesce into a single flight and every caller receives the same `Arc`.
//! A failed load clears the slot so a later caller can retry; other fids
//! are never blocked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::mapper::Core;

type Slot = Arc<OnceCell<Arc<dyn Core>>>;

#[derive(Default)]
pub struct FeedCache {
    slots: Mutex<HashMap<u64, Slot>>,
}

impl FeedCache {
    pub fn new() -> Self { Self::default() }

    fn slot(&self, fid: u64) -> Slot {
        self.slots.lock().entry(fid).or_default().clone()
    }

    /// Return the cached instance or run `load` exactly once, even under
    /// concurrent callers for the same fid.
    pub async fn get_or_load<F, Fut>(&self, fid: u64, load: F) -> Result<Arc<dyn Core>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Core>>>,
    {
        let slot = self.slot(fid);
        match slot.get_or_try_init(load).await {
            Ok(core) => Ok(core.clone()),
            Err(e) => {
                // Drop the empty slot so the next caller retries; leave it
                // alone if another flight already populated or replaced it.
                let mut slots = self.slots.lock();
                if let Some(current) = slots.get(&fid) {
                    if Arc::ptr_eq(current, &slot) && current.get().is_none() {
                        slots.remove(&fid);
                    }
                }
                Err(e)
            }
        }
    }

    /// Register a freshly planted instance.
    pub fn insert(&self, fid: u64, core: Arc<dyn Core>) {
        let slot = self.slot(fid);
        // A concurrent load may have won; the existing instance stands.
        let _ = slot.set(core);
    }

    pub fn get(&self, fid: u64) -> Option<Arc<dyn Core>> {
        self.slots.lock().get(&fid).and_then(|s| s.get().cloned())
    }

    /// Evict the slot for `fid`, returning the live instance if one exists.
    ///
    /// A load still in flight for this fid is not awaited: it completes into
    /// the detached slot, its caller keeps the resulting instance, and the
    /// next `get_or_load` starts fresh. Callers racing an eviction (purge
    /// against a first `get`) re-check the metadata flags on their own path,
    /// so the detached instance is never handed out again.
    pub fn remove(&self, fid: u64) -> Option<Arc<dyn Core>> {
        self.slots.lock().remove(&fid).and_then(|s| s.get().cloned())
    }

    /// Live instances only; slots with an in-flight load are skipped.
    pub fn snapshot(&self) -> Vec<(u64, Arc<dyn Core>)> {
        self.slots
            .lock()
            .iter()
            .filter_map(|(fid, s)| s.get().cloned().map(|c| (*fid, c)))
            .collect()
    }

    /// Remove and return every live instance (shutdown path).
    pub fn drain(&self) -> Vec<Arc<dyn Core>> {
        self.slots
            .lock()
            .drain()
            .filter_map(|(_, s)| s.get().cloned())
            .collect()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
