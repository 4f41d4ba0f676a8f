//! Secrets channel seam.
//! An externally supplied secure read/write interface for a core's private
//! key material. The interception layer hands redirected accesses here with
//! a composite `"<hexPublicKey>:<relativePath>"` id and the namespace
//! context; the channel owns the actual bindings.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{GardenError, Result};

/// Context passed alongside every redirected call.
#[derive(Debug, Clone)]
pub struct SecretContext {
    /// Detected public key of the owning core.
    pub key: [u8; 32],
    /// Relative path of the redirected file within the namespace.
    pub path: String,
    /// Namespace id (fid) of the owning core.
    pub namespace: u64,
}

/// Composite binding id: `"<hexPublicKey>:<relativePath>"`.
pub fn secret_id(key: &[u8; 32], path: &str) -> String {
    format!("{}:{}", hex::encode(key), path)
}

#[async_trait]
pub trait SecretsChannel: Send + Sync {
    async fn write(&self, id: &str, offset: u64, data: &[u8], ctx: &SecretContext) -> Result<()>;

    async fn read(&self, id: &str, offset: u64, length: u64, ctx: &SecretContext) -> Result<Vec<u8>>;
}

/// In-memory channel for tests. Stores whole payloads keyed by binding id.
#[derive(Default)]
pub struct MemorySecrets {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecrets {
    pub fn new() -> Self { Self::default() }

    pub fn contains(&self, id: &str) -> bool { self.map.read().contains_key(id) }

    pub fn binding_count(&self) -> usize { self.map.read().len() }
}

#[async_trait]
impl SecretsChannel for MemorySecrets {
    async fn write(&self, id: &str, offset: u64, data: &[u8], ctx: &SecretContext) -> Result<()> {
        tracing::debug!(id, namespace = ctx.namespace, len = data.len(), "secrets write");
        let mut map = self.map.write();
        let buf = map.entry(id.to_string()).or_default();
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn read(&self, id: &str, offset: u64, length: u64, ctx: &SecretContext) -> Result<Vec<u8>> {
        tracing::debug!(id, namespace = ctx.namespace, "secrets read");
        let map = self.map.read();
        let buf = map
            .get(id)
            .ok_or_else(|| GardenError::StorageIo(anyhow::anyhow!("no secret binding: {id}")))?;
        let start = (offset as usize).min(buf.len());
        let end = (start + length as usize).min(buf.len());
        Ok(buf[start..end].to_vec())
    }
}
