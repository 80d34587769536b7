//! In-process ledger. Nothing survives a restart.

use super::{Ledger, LedgerError, LedgerResult};
use crate::models::descriptor::FileDescriptor;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryLedger {
    entries: RwLock<BTreeMap<String, FileDescriptor>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, descriptor: &FileDescriptor) -> LedgerResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&descriptor.key) {
            return Err(LedgerError::Duplicate(descriptor.key.clone()));
        }
        entries.insert(descriptor.key.clone(), descriptor.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> LedgerResult<Option<FileDescriptor>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn list(&self) -> LedgerResult<Vec<FileDescriptor>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn remove(&self, key: &str) -> LedgerResult<Option<FileDescriptor>> {
        Ok(self.entries.write().await.remove(key))
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}
