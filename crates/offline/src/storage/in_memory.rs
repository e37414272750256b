use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{PayloadStorage, StorageError};

/// In-memory record storage.
///
/// Intended for tests and hosts without a writable cache directory. Records
/// do not survive the process.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl PayloadStorage for InMemoryStorage {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        // Map updates are single inserts, so a poisoned lock still guards consistent data.
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(key).is_some())
    }

    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).map(|bytes| bytes.len() as u64))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.keys().cloned().collect())
    }

    fn total_size(&self) -> Result<u64, StorageError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().map(|bytes| bytes.len() as u64).sum())
    }
}
