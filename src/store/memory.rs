//! In-memory reference backends.
//! Used by the test suite and as the semantic reference for injected
//! production backends. Contents are shared behind `Arc`, so a `reopen`
//! against the same maps models a process restart over durable media.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{GardenError, Result};
use crate::store::{BatchOp, ByteBackend, RawHandle, SortedKv};

/// Sorted in-memory key-value store over a `BTreeMap`.
#[derive(Clone, Default)]
pub struct MemoryKv {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryKv {
    pub fn new() -> Self { Self::default() }

    /// A fresh handle over the same underlying map with the closed flag
    /// reset, modelling a process restart against durable media.
    pub fn reopen(&self) -> Self {
        Self { map: self.map.clone(), closed: Arc::new(AtomicBool::new(false)) }
    }

    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GardenError::StorageIo(anyhow!("kv store is closed")));
        }
        Ok(())
    }
}

#[async_trait]
impl SortedKv for MemoryKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.map.write().remove(key);
        Ok(())
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.check_open()?;
        let mut map = self.map.write();
        debug!(ops = ops.len(), "memory kv batch");
        for op in ops {
            match op {
                BatchOp::Put { key, value } => { map.insert(key, value); }
                BatchOp::Delete { key } => { map.remove(&key); }
            }
        }
        Ok(())
    }

    async fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type FileMap = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// In-memory byte backend. Each path maps to one growable buffer.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    files: FileMap,
    closed: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Fresh handle over the same files, closed flag reset. See
    /// [`MemoryKv::reopen`].
    pub fn reopen(&self) -> Self {
        Self { files: self.files.clone(), closed: Arc::new(AtomicBool::new(false)) }
    }

    /// Raw contents of a path, if present. Test hook.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    pub fn file_count(&self) -> usize { self.files.read().len() }
}

#[async_trait]
impl ByteBackend for MemoryBackend {
    async fn open(&self, path: &str) -> Result<Arc<dyn RawHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GardenError::StorageIo(anyhow!("byte backend is closed")));
        }
        debug!(path, "memory backend open");
        Ok(Arc::new(MemoryHandle {
            files: self.files.clone(),
            backend_closed: self.closed.clone(),
            path: path.to_string(),
            open: AtomicBool::new(true),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Handle over one path in a `MemoryBackend`.
pub struct MemoryHandle {
    files: FileMap,
    backend_closed: Arc<AtomicBool>,
    path: String,
    open: AtomicBool,
}

impl MemoryHandle {
    fn check_open(&self) -> Result<()> {
        if !self.is_open() || self.backend_closed.load(Ordering::SeqCst) {
            return Err(GardenError::StorageIo(anyhow!("handle closed: {}", self.path)));
        }
        Ok(())
    }
}

#[async_trait]
impl RawHandle for MemoryHandle {
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let mut files = self.files.write();
        let buf = files.entry(self.path.clone()).or_default();
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.check_open()?;
        let files = self.files.read();
        let buf = files
            .get(&self.path)
            .ok_or_else(|| GardenError::StorageIo(anyhow!("no such file: {}", self.path)))?;
        let start = offset as usize;
        if start > buf.len() {
            return Err(GardenError::StorageIo(anyhow!(
                "read past end of {} ({} > {})",
                self.path,
                start,
                buf.len()
            )));
        }
        let end = (start + length as usize).min(buf.len());
        Ok(buf[start..end].to_vec())
    }

    async fn destroy(&self) -> Result<()> {
        self.check_open()?;
        // Destroying an absent path is deliberately not an error.
        self.files.write().remove(&self.path);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool { self.open.load(Ordering::SeqCst) }
}
