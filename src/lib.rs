//!
//! garden — storage virtualization layer
//! -------------------------------------
//! Many independent pluggable append-only data-structure instances
//! ("cores") share one byte-addressable storage backend and one sorted
//! key-value metadata store. The garden transparently namespaces each
//! core's files, tracks per-core storage footprint through a debounced
//! batch ledger, redirects private key material to an externally supplied
//! secrets channel, and manages a soft-delete/ban lifecycle that survives
//! process restarts.
//!
//! Responsibilities:
//! - Storage interception: per-namespace handle decoration with key
//!   detection, secret redirection and unconditional size accounting.
//! - Lifecycle orchestration: plant/get/ban/purge/close/sync with
//!   single-flight instance loading.
//! - Replication boundary: four thin adapter methods for an external
//!   replication stack.
//!
//! The append-only structures themselves, the physical backends and the
//! replication wire protocol live outside this crate behind narrow traits.

pub mod cache;
pub mod error;
pub mod garden;
pub mod inode;
pub mod intercept;
pub mod mapper;
pub mod meta;
pub mod replicate;
pub mod secrets;
pub mod store;
pub mod test_utils;

pub use crate::error::{GardenError, Result};
pub use crate::garden::{Garden, GardenConfig, PlantOverride};
pub use crate::inode::InodeLedger;
pub use crate::intercept::{GuardedHandle, NamespacedStore, SecretRouter, StoreMultiplexer};
pub use crate::mapper::{Core, Mapper, MapperRegistry};
pub use crate::meta::{CoreRecord, KeyIndex, MetadataStore};
pub use crate::replicate::DescribedCore;
pub use crate::secrets::{secret_id, MemorySecrets, SecretContext, SecretsChannel};
pub use crate::store::{BatchOp, ByteBackend, KvSection, RawHandle, SortedKv};
