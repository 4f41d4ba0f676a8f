//! Core interface and mapper registry.
//! A mapper turns a registered type tag plus a namespaced store into a live
//! core instance. The registry replaces duck typing with an explicit
//! interface: a readiness signal, a fixed-length public identifier and an
//! optional close capability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{GardenError, Result};
use crate::intercept::NamespacedStore;

/// A pluggable append-only data-structure instance managed by the garden.
#[async_trait]
pub trait Core: Send + Sync {
    /// Resolves once the instance is fully constructed. During readiness
    /// the instance writes its key material through the namespaced store,
    /// which is when the interception layer observes the public key.
    async fn ready(&self) -> Result<()>;

    /// Fixed-length public identifier. Valid after `ready`.
    fn public_key(&self) -> [u8; 32];

    /// Optional close capability.
    async fn close(&self) -> Result<()> { Ok(()) }

    /// Downcast hook for consumers that know the concrete core type.
    fn as_any(&self) -> &dyn std::any::Any;
}

impl std::fmt::Debug for dyn Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core").finish_non_exhaustive()
    }
}

/// Factory translating a type tag into a concrete core instance.
#[async_trait]
pub trait Mapper: Send + Sync {
    async fn create(&self, store: NamespacedStore, args: &serde_json::Value)
        -> Result<Arc<dyn Core>>;
}

/// Type tag -> mapper factory. Cheap to clone; all clones share the map.
#[derive(Clone, Default)]
pub struct MapperRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Mapper>>>>,
}

impl MapperRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, type_tag: impl Into<String>, mapper: Arc<dyn Mapper>) {
        self.inner.write().insert(type_tag.into(), mapper);
    }

    pub fn contains(&self, type_tag: &str) -> bool { self.inner.read().contains_key(type_tag) }

    pub fn get(&self, type_tag: &str) -> Result<Arc<dyn Mapper>> {
        self.inner
            .read()
            .get(type_tag)
            .cloned()
            .ok_or_else(|| GardenError::UnknownType(type_tag.to_string()))
    }
}
