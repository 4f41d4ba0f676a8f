//! Replication adapter.
//! The garden is consumed by an external replication stack solely through
//! these four methods. Absence is signalled as `None`, never as an error,
//! so the replication layer can treat unknown cores as foreign and move on;
//! banned/deleted rejections still propagate for callers to catch and skip.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::garden::Garden;
use crate::mapper::Core;
use crate::meta::CoreRecord;

/// Stored metadata tagged with its origin marker, as announced to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribedCore {
    pub origin: String,
    pub record: CoreRecord,
}

impl Garden {
    /// Live instances of every core whose metadata is neither banned nor
    /// deleted.
    pub async fn share(&self) -> Result<Vec<Arc<dyn Core>>> {
        let mut out = Vec::new();
        for (_, core) in self.cache.snapshot() {
            let key = core.public_key();
            match self.meta.try_get(&key).await? {
                Some(rec) if !rec.banned && !rec.deleted => out.push(core),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Stored metadata for a key, or `None` when unknown here.
    pub async fn describe(&self, key: &[u8; 32]) -> Result<Option<DescribedCore>> {
        Ok(self
            .meta
            .try_get(key)
            .await?
            .map(|record| DescribedCore { origin: self.config.origin.clone(), record }))
    }

    /// Accept a peer-announced core. Already-held keys are accepted without
    /// re-creating; foreign origins and unregistered types are ignored.
    pub async fn store_remote(&self, key: &[u8; 32], described: &DescribedCore) -> Result<()> {
        if self.keys.get(key).await?.is_some() {
            debug!(key = %hex::encode(key), "store_remote: already held");
            return Ok(());
        }
        if described.origin != self.config.origin {
            debug!(origin = %described.origin, "store_remote: foreign origin ignored");
            return Ok(());
        }
        if !self.mappers.contains(&described.record.core_type) {
            debug!(r#type = %described.record.core_type, "store_remote: unregistered type ignored");
            return Ok(());
        }
        let args = serde_json::json!({ "key": hex::encode(key) });
        self.plant(&described.record.core_type, Some(*key), args)
            .await
            .map(|_| ())
    }

    /// Resolve to the live instance, or `None` when the key is unknown.
    pub async fn resolve(&self, key: &[u8; 32]) -> Result<Option<Arc<dyn Core>>> {
        match self.get(key).await {
            Ok(core) => Ok(Some(core)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
