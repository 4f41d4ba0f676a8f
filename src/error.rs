//! Unified garden error model.
//! Errors crossing the garden boundary are identified by a stable `kind()`
//! discriminant rather than by identity, because the replication adapter
//! must inspect them without sharing our types. Backend I/O failures travel
//! through unmodified as `StorageIo`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GardenError>;

#[derive(Debug, Error)]
pub enum GardenError {
    /// The requested core type has no registered mapper.
    #[error("unknown core type: {0}")]
    UnknownType(String),

    /// The key or record does not exist. Reinterpreted as "absent" at
    /// lookup-style call sites (`is_banned`, replication describe/resolve),
    /// never where the caller explicitly requested the record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The core is banned; it can never be planted or loaded again.
    #[error("core is banned")]
    BannedCore,

    /// The core was purged. The metadata record survives with deleted=true.
    #[error("core is deleted")]
    DeletedCore,

    /// A wrapped mapper behaved outside assumed parameters (non-zero key
    /// offset, misrouted key material). Fatal for the current operation.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Pass-through from the byte or key-value backend.
    #[error("storage i/o: {0}")]
    StorageIo(#[from] anyhow::Error),
}

impl GardenError {
    /// Stable discriminant for cross-boundary inspection.
    pub fn kind(&self) -> &'static str {
        match self {
            GardenError::UnknownType(_) => "unknown_type",
            GardenError::NotFound(_) => "not_found",
            GardenError::BannedCore => "banned",
            GardenError::DeletedCore => "deleted",
            GardenError::ContractViolation(_) => "contract_violation",
            GardenError::StorageIo(_) => "storage_io",
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, GardenError::NotFound(_)) }

    pub fn not_found<S: Into<String>>(what: S) -> Self { GardenError::NotFound(what.into()) }

    pub fn contract<S: Into<String>>(msg: S) -> Self { GardenError::ContractViolation(msg.into()) }
}

impl From<serde_json::Error> for GardenError {
    fn from(e: serde_json::Error) -> Self { GardenError::StorageIo(e.into()) }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
