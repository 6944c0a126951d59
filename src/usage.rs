// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Usage accounting over the record store.
//!
//! Everything here is a pure read: sizes are recomputed from current store
//! contents on every call, nothing is cached.

use std::sync::Arc;

use tracing::debug;

use crate::metrics;
use crate::storage::traits::{RecordStore, StorageError};

/// A key and the byte size of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub size_bytes: u64,
}

/// Snapshot of store usage against the quota ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    pub total_usage_bytes: u64,
    /// 0-100, relative to the ceiling; an over-budget store reports 100
    pub usage_percentage: f64,
    pub is_approaching_quota: bool,
    /// Largest entries first, ties broken by key
    pub largest_entries: Vec<StorageEntry>,
}

/// Measures byte usage of keys and the store as a whole.
pub struct UsageAccounting {
    store: Arc<dyn RecordStore>,
    ceiling_bytes: u64,
    warn_threshold_pct: f64,
}

impl UsageAccounting {
    pub fn new(store: Arc<dyn RecordStore>, ceiling_bytes: u64, warn_threshold_pct: f64) -> Self {
        Self {
            store,
            ceiling_bytes,
            warn_threshold_pct,
        }
    }

    #[must_use]
    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Byte length of the value at `key`, 0 if absent.
    ///
    /// Never fails: a backend read error counts as an absent key.
    pub async fn size_of(&self, key: &str) -> u64 {
        match self.store.get(key).await {
            Ok(value) => value.map_or(0, |v| v.len() as u64),
            Err(e) => {
                debug!(key, error = %e, "Size read failed, counting as 0");
                0
            }
        }
    }

    /// Sizes of every present key, in store order.
    pub async fn entries(&self) -> Result<Vec<StorageEntry>, StorageError> {
        let keys = self.store.keys().await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let size_bytes = self.size_of(&key).await;
            entries.push(StorageEntry { key, size_bytes });
        }
        Ok(entries)
    }

    pub async fn total_usage(&self) -> Result<u64, StorageError> {
        Ok(self.entries().await?.iter().map(|e| e.size_bytes).sum())
    }

    /// Usage as a percentage of the ceiling. A zero ceiling reports 0%.
    #[must_use]
    pub fn percentage_of_ceiling(&self, bytes: u64) -> f64 {
        if self.ceiling_bytes == 0 {
            return 0.0;
        }
        bytes as f64 / self.ceiling_bytes as f64 * 100.0
    }

    /// Compute total usage, percentage and the `top_n` largest entries.
    pub async fn report(&self, top_n: usize) -> Result<UsageReport, StorageError> {
        let mut entries = self.entries().await?;
        let total_usage_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
        let usage_percentage = self.percentage_of_ceiling(total_usage_bytes).min(100.0);

        entries.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.key.cmp(&b.key)));
        entries.truncate(top_n);

        metrics::set_usage(total_usage_bytes, usage_percentage);

        Ok(UsageReport {
            total_usage_bytes,
            usage_percentage,
            is_approaching_quota: usage_percentage >= self.warn_threshold_pct,
            largest_entries: entries,
        })
    }
}
