// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use super::traits::{RecordStore, StorageError};

/// In-memory record store with an optional hard byte capacity.
///
/// Capacity is measured in value bytes, the same unit the governor accounts.
/// `keys()` returns keys in lexical order, which is this store's store order.
pub struct InMemoryStore {
    data: DashMap<String, String>,
    capacity_bytes: Option<u64>,
    /// Serializes capacity checks with the writes they guard.
    write_lock: Mutex<()>,
}

impl InMemoryStore {
    /// Unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            capacity_bytes: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Store that rejects writes pushing total value bytes past `capacity_bytes`.
    #[must_use]
    pub fn with_capacity_bytes(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes: Some(capacity_bytes),
            ..Self::new()
        }
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total value bytes held.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.data.iter().map(|r| r.value().len() as u64).sum()
    }

    /// Clear all items
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        if let Some(capacity) = self.capacity_bytes {
            let existing = self.data.get(key).map_or(0, |r| r.value().len() as u64);
            let projected = self.used_bytes() - existing + value.len() as u64;
            if projected > capacity {
                return Err(StorageError::CapacityExceeded {
                    key: key.to_string(),
                    requested_bytes: value.len(),
                });
            }
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.data.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.data.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(key))
    }
}
