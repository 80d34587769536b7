//! Metadata ledger: the record of every committed file.
//!
//! The storage service only talks to the ledger through [`Ledger`], so the
//! backing store can be swapped without touching upload or serving logic.

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::{SqliteLedger, run_migrations};

use crate::models::descriptor::FileDescriptor;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("descriptor for `{0}` already exists")]
    Duplicate(String),
    #[error("stored fields for `{key}` are unreadable: {source}")]
    Fields {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Append-only store of file descriptors keyed by storage key.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record a new descriptor. Fails with [`LedgerError::Duplicate`] when the
    /// key is already present.
    async fn append(&self, descriptor: &FileDescriptor) -> LedgerResult<()>;

    async fn get(&self, key: &str) -> LedgerResult<Option<FileDescriptor>>;

    /// All descriptors, ordered by key.
    async fn list(&self) -> LedgerResult<Vec<FileDescriptor>>;

    /// Drop the descriptor for `key`, returning it if one existed.
    async fn remove(&self, key: &str) -> LedgerResult<Option<FileDescriptor>>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> LedgerResult<()>;
}
