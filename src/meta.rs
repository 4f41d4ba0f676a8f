//! Key index and metadata store.
//! Both live as sections of the shared sorted store. The key index maps a
//! core's public key to its fid and is written once per key; metadata
//! records are JSON blobs with a documented, forward-compatible schema and
//! soft-delete-only semantics (`banned`/`deleted` are monotonic flags).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GardenError, Result};
use crate::store::KvSection;

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Durable per-core record, keyed by hex public key.
///
/// `type` and `fid` are immutable once written. `banned`/`deleted` only ever
/// transition false -> true; unknown fields from future versions are
/// ignored on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreRecord {
    #[serde(rename = "type")]
    pub core_type: String,
    pub fid: u64,
    pub created_at: u64,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub banned_at: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<u64>,
}

impl CoreRecord {
    pub fn new(core_type: impl Into<String>, fid: u64, created_at: u64) -> Self {
        Self {
            core_type: core_type.into(),
            fid,
            created_at,
            banned: false,
            banned_at: None,
            deleted: false,
            deleted_at: None,
        }
    }
}

fn parse_u64(raw: &[u8], what: &str) -> Result<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GardenError::StorageIo(anyhow::anyhow!("corrupt {what} entry")))
}

/// Bijective public-key -> fid mapping, written once at plant time.
#[derive(Clone)]
pub struct KeyIndex {
    section: KvSection,
}

impl KeyIndex {
    pub fn new(section: KvSection) -> Self { Self { section } }

    pub async fn get(&self, key: &[u8; 32]) -> Result<Option<u64>> {
        match self.section.get(hex::encode(key).as_bytes()).await? {
            Some(raw) => Ok(Some(parse_u64(&raw, "key index")?)),
            None => Ok(None),
        }
    }

    /// Write-once insert. Re-inserting the same mapping is a no-op; a
    /// conflicting fid for an existing key is a contract violation.
    pub async fn put(&self, key: &[u8; 32], fid: u64) -> Result<()> {
        if let Some(existing) = self.get(key).await? {
            if existing == fid {
                return Ok(());
            }
            return Err(GardenError::contract(format!(
                "key index entry is immutable (fid {existing} -> {fid})"
            )));
        }
        self.section
            .put(hex::encode(key).as_bytes(), fid.to_string().as_bytes())
            .await
    }

    pub async fn close(&self) -> Result<()> { self.section.close().await }
}

/// Durable per-core metadata. Records are created exactly once and never
/// physically removed; bans and deletions are flags.
#[derive(Clone)]
pub struct MetadataStore {
    section: KvSection,
}

impl MetadataStore {
    pub fn new(section: KvSection) -> Self { Self { section } }

    /// Record lookup where absence is acceptable.
    pub async fn try_get(&self, key: &[u8; 32]) -> Result<Option<CoreRecord>> {
        match self.section.get(hex::encode(key).as_bytes()).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Record lookup where the caller explicitly requested the record.
    pub async fn get(&self, key: &[u8; 32]) -> Result<CoreRecord> {
        self.try_get(key)
            .await?
            .ok_or_else(|| GardenError::not_found(hex::encode(key)))
    }

    /// Create the record for a freshly planted core.
    pub async fn insert(&self, key: &[u8; 32], record: &CoreRecord) -> Result<()> {
        debug!(key = %hex::encode(key), fid = record.fid, r#type = %record.core_type, "metadata insert");
        self.section
            .put(hex::encode(key).as_bytes(), &serde_json::to_vec(record)?)
            .await
    }

    /// Set the banned flag. Monotonic; a second ban keeps the first
    /// timestamp.
    pub async fn mark_banned(&self, key: &[u8; 32], at: u64) -> Result<()> {
        let mut rec = self.get(key).await?;
        if rec.banned {
            return Ok(());
        }
        rec.banned = true;
        rec.banned_at = Some(at);
        self.insert(key, &rec).await
    }

    /// Set the deleted flag. Monotonic, soft-delete only.
    pub async fn mark_deleted(&self, key: &[u8; 32], at: u64) -> Result<()> {
        let mut rec = self.get(key).await?;
        if rec.deleted {
            return Ok(());
        }
        rec.deleted = true;
        rec.deleted_at = Some(at);
        self.insert(key, &rec).await
    }

    pub async fn close(&self) -> Result<()> { self.section.close().await }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod meta_tests;
