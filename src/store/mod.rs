//!
//! garden backend seams
//! --------------------
//! This module defines the two storage seams every garden instance is built
//! over, plus the prefix views that carve one sorted store into independent
//! logical sections.
//!
//! - `ByteBackend` / `RawHandle`: a factory of byte-addressable file handles
//!   supporting offset read/write/destroy and an open/closed state. The
//!   interception layer decorates these handles; it never bypasses them.
//! - `SortedKv`: a sorted key-value store with get/put/batch and ordered
//!   range scans. The garden partitions it into four sections (global
//!   counter, key index, metadata, inode ledger) via `KvSection`.
//!
//! In-memory reference implementations live in `memory` and back the test
//! suite; production deployments inject their own backends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;

/// Section prefixes partitioning the shared sorted store.
pub const SECTION_COUNTER: &str = "counter/";
pub const SECTION_KEYS: &str = "keys/";
pub const SECTION_META: &str = "meta/";
pub const SECTION_INODE: &str = "inode/";

/// A byte-addressable file handle produced by a `ByteBackend`.
///
/// All operations are asynchronous; errors are backend pass-throughs. A
/// handle stays usable until `close` or `destroy`.
#[async_trait]
pub trait RawHandle: Send + Sync {
    /// Write `data` starting at `offset`, extending the file as needed.
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Read up to `length` bytes starting at `offset`. Short reads clamp to
    /// the written extent; reading a missing file is an error.
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Remove the underlying file. Destroying an absent file is a no-op.
    async fn destroy(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Factory of `RawHandle`s keyed by relative path.
#[async_trait]
pub trait ByteBackend: Send + Sync {
    async fn open(&self, path: &str) -> Result<Arc<dyn RawHandle>>;

    /// Close the backend as a whole. Handles opened from it become unusable.
    async fn close(&self) -> Result<()>;
}

/// One put-or-delete against the sorted store, applied atomically as part
/// of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Sorted byte-string key-value store with ordered range scans.
#[async_trait]
pub trait SortedKv: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply all operations as one atomic unit, in order.
    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Ordered scan over `[start, end)`.
    async fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    async fn close(&self) -> Result<()>;
}

/// A prefix-scoped view over a shared `SortedKv`.
///
/// Sections are cheap to clone and carry no state of their own; closing a
/// section is a logical no-op so the garden can close its stores in a fixed
/// order while the physical store is closed exactly once.
#[derive(Clone)]
pub struct KvSection {
    inner: Arc<dyn SortedKv>,
    prefix: Vec<u8>,
}

impl KvSection {
    pub fn new(inner: Arc<dyn SortedKv>, prefix: &str) -> Self {
        Self { inner, prefix: prefix.as_bytes().to_vec() }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut k = self.prefix.clone();
        k.extend_from_slice(key);
        k
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.full_key(key)).await
    }

    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(&self.full_key(key), value).await
    }

    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(&self.full_key(key)).await
    }

    /// Apply a batch with every key rewritten into this section.
    pub async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let ops = ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => BatchOp::Put { key: self.full_key(&key), value },
                BatchOp::Delete { key } => BatchOp::Delete { key: self.full_key(&key) },
            })
            .collect();
        self.inner.write_batch(ops).await
    }

    /// Ordered scan over `[start, end)` within the section. Returned keys
    /// have the section prefix stripped.
    pub async fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = self.inner.scan(&self.full_key(start), &self.full_key(end)).await?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_vec(), v))
            .collect())
    }

    /// Logical close; the shared physical store is closed by its owner.
    pub async fn close(&self) -> Result<()> { Ok(()) }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
