// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store rejected a write because it is full.
    #[error("Capacity exceeded writing '{key}' ({requested_bytes} bytes)")]
    CapacityExceeded {
        key: String,
        requested_bytes: usize,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Bounded string key-value store the governor protects.
///
/// Values are opaque serialized strings; their UTF-8 byte length is what the
/// governor accounts against the quota ceiling.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write `value` under `key`. Fails with [`StorageError::CapacityExceeded`]
    /// when the backend is out of room.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys currently present, in store order.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
