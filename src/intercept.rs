//!
//! Storage interception layer
//! --------------------------
//! `StoreMultiplexer` produces, per namespace id, a `NamespacedStore` whose
//! handles are `GuardedHandle` decorators over the raw backend handles.
//! The decorator is an explicit type branching on file name and offset with
//! ordinary conditionals; every call is identical in capability to the raw
//! handle, with three behaviors layered transparently on top:
//!
//! - size accounting: every write max-merges `offset + len` into the inode
//!   ledger before anything else, redirected writes included;
//! - key detection: the first offset-0 write to a file named exactly "key"
//!   is retained as the core's public identifier; a later disagreeing write
//!   marks a nested core sharing the namespace and passes through;
//! - secret redirection: offset-0 accesses to "secret_key" go to the
//!   externally supplied secrets channel once a public key is known, with
//!   a backend fallback on read failures (warning, never a hard error).
//!
//! Key and secret accesses at a non-zero offset violate the mapper contract
//! and abort the operation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{GardenError, Result};
use crate::inode::InodeLedger;
use crate::secrets::{secret_id, SecretContext, SecretsChannel};
use crate::store::{ByteBackend, RawHandle};

const KEY_FILE: &str = "key";
const SECRET_FILE: &str = "secret_key";

struct RouterState {
    key: Option<[u8; 32]>,
    nested_seen: bool,
}

/// Per-namespace key observer and secret redirection gate.
///
/// Created empty for the plant path (the key becomes known when the mapper
/// writes it) or seeded with the expected key for the direct load path.
pub struct SecretRouter {
    namespace: u64,
    state: Mutex<RouterState>,
}

impl SecretRouter {
    pub fn new(namespace: u64) -> Self {
        Self { namespace, state: Mutex::new(RouterState { key: None, nested_seen: false }) }
    }

    pub fn with_expected(namespace: u64, key: [u8; 32]) -> Self {
        Self { namespace, state: Mutex::new(RouterState { key: Some(key), nested_seen: false }) }
    }

    /// The public key currently governing this namespace, detected or
    /// expected.
    pub fn current_key(&self) -> Option<[u8; 32]> { self.state.lock().key }

    /// True once a disagreeing key write has been observed (a nested core
    /// sharing the namespace).
    pub fn nested_seen(&self) -> bool { self.state.lock().nested_seen }

    /// Interpret an offset-0 write to a "key" file. First observation is
    /// retained; later disagreement is recorded but never redirected.
    fn observe_key(&self, data: &[u8]) -> Result<()> {
        let key: [u8; 32] = data.try_into().map_err(|_| {
            GardenError::contract(format!(
                "public key write must be exactly 32 bytes, got {}",
                data.len()
            ))
        })?;
        let mut state = self.state.lock();
        match state.key {
            None => {
                debug!(namespace = self.namespace, key = %hex::encode(key), "public key detected");
                state.key = Some(key);
            }
            Some(existing) if existing != key => {
                // Public material: the write still passes through unmodified.
                warn!(
                    namespace = self.namespace,
                    expected = %hex::encode(existing),
                    observed = %hex::encode(key),
                    "nested core key observed in namespace"
                );
                state.nested_seen = true;
            }
            Some(_) => {}
        }
        Ok(())
    }
}

/// Produces per-namespace store factories over the shared root backend.
#[derive(Clone)]
pub struct StoreMultiplexer {
    backend: Arc<dyn ByteBackend>,
    ledger: InodeLedger,
    secrets: Option<Arc<dyn SecretsChannel>>,
}

impl StoreMultiplexer {
    pub fn new(
        backend: Arc<dyn ByteBackend>,
        ledger: InodeLedger,
        secrets: Option<Arc<dyn SecretsChannel>>,
    ) -> Self {
        Self { backend, ledger, secrets }
    }

    /// Store factory for one namespace. `expected_key` seeds the router on
    /// the direct load path where the key is already known.
    pub fn for_namespace(&self, fid: u64, expected_key: Option<[u8; 32]>) -> NamespacedStore {
        let router = Arc::new(match expected_key {
            Some(k) => SecretRouter::with_expected(fid, k),
            None => SecretRouter::new(fid),
        });
        NamespacedStore {
            fid,
            backend: self.backend.clone(),
            router,
            ledger: self.ledger.clone(),
            secrets: self.secrets.clone(),
        }
    }
}

/// Factory `(relative_path) -> handle` scoped to one namespace id. This is
/// the store a mapper receives; every handle it produces is guarded.
#[derive(Clone)]
pub struct NamespacedStore {
    fid: u64,
    backend: Arc<dyn ByteBackend>,
    router: Arc<SecretRouter>,
    ledger: InodeLedger,
    secrets: Option<Arc<dyn SecretsChannel>>,
}

impl NamespacedStore {
    pub fn fid(&self) -> u64 { self.fid }

    pub fn router(&self) -> &Arc<SecretRouter> { &self.router }

    pub async fn open(&self, rel_path: &str) -> Result<Arc<dyn RawHandle>> {
        let physical = format!("{}/{}", self.fid, rel_path);
        let inner = self.backend.open(&physical).await?;
        Ok(Arc::new(GuardedHandle {
            inner,
            rel_path: rel_path.to_string(),
            file_name: rel_path.rsplit('/').next().unwrap_or(rel_path).to_string(),
            fid: self.fid,
            router: self.router.clone(),
            ledger: self.ledger.clone(),
            secrets: self.secrets.clone(),
        }))
    }
}

/// Decorator implementing `RawHandle` over the backend handle for one
/// sub-path, with interception behavior per the module docs.
pub struct GuardedHandle {
    inner: Arc<dyn RawHandle>,
    rel_path: String,
    file_name: String,
    fid: u64,
    router: Arc<SecretRouter>,
    ledger: InodeLedger,
    secrets: Option<Arc<dyn SecretsChannel>>,
}

impl GuardedHandle {
    fn is_key(&self) -> bool { self.file_name == KEY_FILE }

    fn is_secret(&self) -> bool { self.file_name == SECRET_FILE }

    fn assert_offset_zero(&self, offset: u64, what: &str) -> Result<()> {
        if offset != 0 {
            return Err(GardenError::contract(format!(
                "{what} access to {} must use offset 0, got {offset}",
                self.rel_path
            )));
        }
        Ok(())
    }

    /// Active redirection requires both an installed channel and a known
    /// public key.
    fn redirection(&self) -> Option<(&Arc<dyn SecretsChannel>, [u8; 32])> {
        match (&self.secrets, self.router.current_key()) {
            (Some(chan), Some(key)) => Some((chan, key)),
            _ => None,
        }
    }

    fn secret_ctx(&self, key: [u8; 32]) -> SecretContext {
        SecretContext { key, path: self.rel_path.clone(), namespace: self.fid }
    }
}

#[async_trait]
impl RawHandle for GuardedHandle {
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        // Size accounting happens unconditionally, before any redirection
        // branching; secret paths are accounted like everything else.
        self.ledger
            .record_write(self.fid, &self.rel_path, offset + data.len() as u64)
            .await?;

        if self.is_key() {
            self.assert_offset_zero(offset, "public key")?;
            self.router.observe_key(data)?;
            return self.inner.write(offset, data).await;
        }

        if self.is_secret() {
            self.assert_offset_zero(offset, "secret key")?;
            if let Some((chan, key)) = self.redirection() {
                let id = secret_id(&key, &self.rel_path);
                debug!(namespace = self.fid, id = %id, "redirecting secret write");
                return chan.write(&id, offset, data, &self.secret_ctx(key)).await;
            }
            warn!(
                namespace = self.fid,
                path = %self.rel_path,
                "secret write without redirection (no channel or key); passing through"
            );
        }

        self.inner.write(offset, data).await
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if self.is_key() || self.is_secret() {
            self.assert_offset_zero(offset, "key material")?;
        }
        if self.is_secret() {
            if let Some((chan, key)) = self.redirection() {
                let id = secret_id(&key, &self.rel_path);
                match chan.read(&id, offset, length, &self.secret_ctx(key)).await {
                    Ok(data) if !data.is_empty() => return Ok(data),
                    Ok(_) => warn!(
                        namespace = self.fid,
                        id = %id,
                        "secrets channel returned empty payload; falling back to backend"
                    ),
                    Err(e) => warn!(
                        namespace = self.fid,
                        id = %id,
                        error = %e,
                        "secrets channel read failed; falling back to backend"
                    ),
                }
            }
        }
        self.inner.read(offset, length).await
    }

    async fn destroy(&self) -> Result<()> {
        self.ledger.record_destroy(self.fid, &self.rel_path).await?;
        if self.is_secret() && self.redirection().is_some() {
            // Nothing physical exists under redirection; complete
            // synthetically instead of touching the backend.
            debug!(namespace = self.fid, path = %self.rel_path, "synthetic secret destroy");
            return Ok(());
        }
        self.inner.destroy().await
    }

    async fn close(&self) -> Result<()> { self.inner.close().await }

    fn is_open(&self) -> bool { self.inner.is_open() }
}

#[cfg(test)]
#[path = "intercept_tests.rs"]
mod intercept_tests;
