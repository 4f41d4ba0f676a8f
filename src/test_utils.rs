//! Test fixtures: a minimal append-only core and its mapper.
//! `LogCore` behaves like a real planted core: during readiness it loads or
//! creates its key material through the namespaced store (which is when the
//! interception layer observes the public key) and appends payload bytes to
//! a `data` file. Used by unit and integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;

use crate::error::{GardenError, Result};
use crate::intercept::NamespacedStore;
use crate::mapper::{Core, Mapper};

/// Deterministic keypair helper for tests.
pub fn random_keypair() -> ([u8; 32], [u8; 64]) {
    let mut key = [0u8; 32];
    let mut secret = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut key);
    rand::thread_rng().fill_bytes(&mut secret);
    (key, secret)
}

/// Mapper args for a fresh core with a caller-chosen keypair:
/// `{"key": "<hex>", "secret_key": "<hex>"}`.
pub fn keypair_args(key: &[u8; 32], secret: &[u8; 64]) -> serde_json::Value {
    serde_json::json!({ "key": hex::encode(key), "secret_key": hex::encode(secret) })
}

fn hex_field<const N: usize>(args: &serde_json::Value, field: &str) -> Result<Option<[u8; N]>> {
    match args.get(field).and_then(|v| v.as_str()) {
        Some(s) => {
            let raw = hex::decode(s)
                .map_err(|e| GardenError::contract(format!("bad {field} arg: {e}")))?;
            let arr: [u8; N] = raw
                .try_into()
                .map_err(|_| GardenError::contract(format!("bad {field} length")))?;
            Ok(Some(arr))
        }
        None => Ok(None),
    }
}

/// Minimal append-only core over a namespaced store.
pub struct LogCore {
    store: NamespacedStore,
    seed_key: Option<[u8; 32]>,
    seed_secret: Option<[u8; 64]>,
    key: Mutex<Option<[u8; 32]>>,
    data_len: Mutex<u64>,
    closed: AtomicBool,
}

impl LogCore {
    pub fn store(&self) -> &NamespacedStore { &self.store }

    pub fn closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    /// Append bytes to the `data` file; returns the write offset.
    pub async fn append(&self, bytes: &[u8]) -> Result<u64> {
        let offset = {
            let mut len = self.data_len.lock();
            let off = *len;
            *len += bytes.len() as u64;
            off
        };
        let h = self.store.open("data").await?;
        h.write(offset, bytes).await?;
        Ok(offset)
    }
}

#[async_trait]
impl Core for LogCore {
    async fn ready(&self) -> Result<()> {
        if self.key.lock().is_some() {
            return Ok(());
        }
        let key_handle = self.store.open("key").await?;
        // Load an existing identity, else persist the seeded/random one.
        let existing: Option<[u8; 32]> = match key_handle.read(0, 32).await {
            Ok(raw) => raw.as_slice().try_into().ok(),
            Err(_) => None,
        };
        let key = match existing {
            Some(k) => k,
            None => {
                let key = self.seed_key.unwrap_or_else(|| random_keypair().0);
                let secret = self.seed_secret.unwrap_or_else(|| random_keypair().1);
                key_handle.write(0, &key).await?;
                let secret_handle = self.store.open("secret_key").await?;
                secret_handle.write(0, &secret).await?;
                key
            }
        };
        *self.key.lock() = Some(key);
        Ok(())
    }

    fn public_key(&self) -> [u8; 32] { self.key.lock().unwrap_or_default() }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}

/// Mapper producing `LogCore` instances under the type tag of the caller's
/// choosing.
pub struct LogMapper;

#[async_trait]
impl Mapper for LogMapper {
    async fn create(
        &self,
        store: NamespacedStore,
        args: &serde_json::Value,
    ) -> Result<Arc<dyn Core>> {
        Ok(Arc::new(LogCore {
            seed_key: hex_field::<32>(args, "key")?,
            seed_secret: hex_field::<64>(args, "secret_key")?,
            store,
            key: Mutex::new(None),
            data_len: Mutex::new(0),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Downcast helper for tests that need the concrete core.
pub fn as_log(core: &Arc<dyn Core>) -> &LogCore {
    core.as_any().downcast_ref::<LogCore>().expect("not a LogCore")
}
