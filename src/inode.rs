//!
//! Inode ledger
//! ------------
//! Best-effort, eventually-consistent ledger of the maximum byte extent
//! written to every sub-path, without a persisted write per I/O call.
//!
//! Mutations append to a single in-memory pending list. The first mutation
//! of a burst schedules a fixed-delay flush; later mutations never restart
//! the timer. On expiry the list is swapped for an empty one and persisted
//! as one atomic batch, and a flush epoch is bumped so `sync` waiters wake.
//! Mutations that arrive while a batch is persisting are drained by the
//! same background task after another full delay, so at most one flush is
//! ever in flight.
//!
//! Ledger keys encode the fid as fixed-width zero-padded decimal, which
//! makes the lexical namespace range of adjacent fids disjoint (fid 9 can
//! never leak into fid 10's range).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{GardenError, Result};
use crate::store::{BatchOp, KvSection};

/// Fixed-width fid encoding used in ledger keys.
fn enc_fid(fid: u64) -> String { format!("{fid:020}") }

/// Ledger key for one sub-path: `enc(fid) ++ "/" ++ path`.
pub fn inode_key(fid: u64, path: &str) -> Vec<u8> {
    format!("{}/{}", enc_fid(fid), path).into_bytes()
}

/// Lexical `[start, end)` bounds covering exactly one fid's namespace.
fn namespace_range(fid: u64) -> (Vec<u8>, Vec<u8>) {
    let start = format!("{}/", enc_fid(fid)).into_bytes();
    // '0' is the successor of '/' in ASCII, so this excludes everything
    // past the namespace separator.
    let end = format!("{}0", enc_fid(fid)).into_bytes();
    (start, end)
}

/// One pending mutation against the ledger.
#[derive(Debug, Clone)]
enum LedgerOp {
    Put { key: Vec<u8>, size: u64 },
    Delete { key: Vec<u8> },
}

struct LedgerState {
    pending: Vec<LedgerOp>,
    /// Session-local view of current sizes, so writes within one burst see
    /// the growing extent before it is persisted. Destroyed paths hold a
    /// zero tombstone until their delete lands.
    overlay: HashMap<Vec<u8>, u64>,
    scheduled: bool,
}

struct LedgerInner {
    section: KvSection,
    state: Mutex<LedgerState>,
    flush_tx: watch::Sender<u64>,
    delay: Duration,
}

/// Debounced batched size ledger. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct InodeLedger {
    inner: Arc<LedgerInner>,
}

impl InodeLedger {
    pub fn new(section: KvSection, delay: Duration) -> Self {
        let (flush_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(LedgerInner {
                section,
                state: Mutex::new(LedgerState {
                    pending: Vec::new(),
                    overlay: HashMap::new(),
                    scheduled: false,
                }),
                flush_tx,
                delay,
            }),
        }
    }

    async fn persisted_size(&self, key: &[u8]) -> Result<u64> {
        match self.inner.section.get(key).await? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| GardenError::StorageIo(anyhow::anyhow!("corrupt inode entry"))),
            None => Ok(0),
        }
    }

    /// Max-merge `end_offset` into the recorded size for `(fid, path)` and
    /// enqueue the result. Missing entries count as size 0.
    pub async fn record_write(&self, fid: u64, path: &str, end_offset: u64) -> Result<()> {
        let key = inode_key(fid, path);
        let current = {
            let state = self.inner.state.lock();
            state.overlay.get(&key).copied()
        };
        let current = match current {
            Some(v) => v,
            // First touch this session: consult the persisted entry.
            None => self.persisted_size(&key).await?,
        };
        let mut state = self.inner.state.lock();
        // A concurrent first touch may have populated the overlay while the
        // persisted lookup was suspended; merge against it so the recorded
        // size never shrinks.
        let size = state
            .overlay
            .get(&key)
            .copied()
            .unwrap_or(0)
            .max(current)
            .max(end_offset);
        state.overlay.insert(key.clone(), size);
        state.pending.push(LedgerOp::Put { key, size });
        self.schedule_locked(&mut state);
        Ok(())
    }

    /// Enqueue removal of the entry for `(fid, path)`.
    pub async fn record_destroy(&self, fid: u64, path: &str) -> Result<()> {
        let key = inode_key(fid, path);
        let mut state = self.inner.state.lock();
        // Zero tombstone rather than removal: a rewrite of the same path
        // within this burst must start from 0, not resurrect the persisted
        // size the pending delete has yet to remove.
        state.overlay.insert(key.clone(), 0);
        state.pending.push(LedgerOp::Delete { key });
        self.schedule_locked(&mut state);
        Ok(())
    }

    /// Start the debounce window if none is pending. The timer is not
    /// restarted by mutations arriving while it runs.
    fn schedule_locked(&self, state: &mut LedgerState) {
        if state.scheduled {
            return;
        }
        state.scheduled = true;
        let inner = self.inner.clone();
        tokio::spawn(async move { flush_cycle(inner).await });
    }

    /// Resolve once any scheduled or in-flight flush has persisted. Returns
    /// immediately when the ledger is idle. Must be awaited before any read
    /// that depends on current totals.
    pub async fn sync(&self) -> Result<()> {
        // Subscribe before checking the flag so a completion between the
        // check and the wait cannot be missed.
        let mut rx = self.inner.flush_tx.subscribe();
        let scheduled = self.inner.state.lock().scheduled;
        if !scheduled {
            return Ok(());
        }
        let _ = rx.changed().await;
        Ok(())
    }

    /// Total recorded bytes within one fid's namespace. Forces a sync.
    pub async fn size_of(&self, fid: u64) -> Result<u64> {
        self.sync().await?;
        let (start, end) = namespace_range(fid);
        let rows = self.inner.section.scan(&start, &end).await?;
        let mut total = 0u64;
        for (key, raw) in rows {
            let size: u64 = std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    GardenError::StorageIo(anyhow::anyhow!(
                        "corrupt inode entry at {}",
                        String::from_utf8_lossy(&key)
                    ))
                })?;
            total += size;
        }
        Ok(total)
    }

    /// Relative path suffixes recorded within one fid's namespace. Forces a
    /// sync.
    pub async fn list_files(&self, fid: u64) -> Result<Vec<String>> {
        self.sync().await?;
        let (start, end) = namespace_range(fid);
        let prefix_len = start.len();
        let rows = self.inner.section.scan(&start, &end).await?;
        Ok(rows
            .into_iter()
            .map(|(k, _)| String::from_utf8_lossy(&k[prefix_len..]).into_owned())
            .collect())
    }
}

/// Background flush: sleep out the debounce window, swap the pending list,
/// persist it as one batch, bump the epoch. Repeats while mutations arrived
/// during the persist, so only one flush is ever in flight.
async fn flush_cycle(inner: Arc<LedgerInner>) {
    loop {
        tokio::time::sleep(inner.delay).await;
        let batch = {
            let mut state = inner.state.lock();
            std::mem::take(&mut state.pending)
        };
        if !batch.is_empty() {
            debug!(ops = batch.len(), "inode ledger flush");
            let ops = batch
                .into_iter()
                .map(|op| match op {
                    LedgerOp::Put { key, size } => {
                        BatchOp::Put { key, value: size.to_string().into_bytes() }
                    }
                    LedgerOp::Delete { key } => BatchOp::Delete { key },
                })
                .collect();
            if let Err(e) = inner.section.write_batch(ops).await {
                // Best-effort ledger: the entries are dropped, totals catch
                // up on the next write to the same paths.
                warn!(error = %e, "inode ledger flush failed; batch dropped");
            }
        }
        inner.flush_tx.send_modify(|epoch| *epoch += 1);
        let mut state = inner.state.lock();
        if state.pending.is_empty() {
            state.scheduled = false;
            return;
        }
        // Mutations landed while persisting: run another full cycle.
    }
}

#[cfg(test)]
#[path = "inode_tests.rs"]
mod inode_tests;
