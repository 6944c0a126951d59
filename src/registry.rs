// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Duplicate registry: record ids intentionally removed as duplicates.
//!
//! The registry lets the reconciler refuse to re-introduce records a user (or
//! an automated pass) already cleaned up. Entries expire after a retention
//! period so the table cannot grow without bound inside the quota it helps
//! protect.
//!
//! # Storage
//!
//! The whole table is one JSON blob under a single reserved store key:
//!
//! ```text
//! {"version":1,"entries":{"txn-1":{"record_id":"txn-1","cleaned_at":...,
//!   "reason":"user-merge","expires_at":...}}}
//! ```
//!
//! A blob that fails to parse is treated as an empty registry and logged.
//! Losing the table only risks resurrecting already-cleaned duplicates; a
//! parse error must never block a sync.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{duration_millis, Clock};
use crate::error::{GovernorError, Result};
use crate::metrics;
use crate::quota::QuotaMonitor;
use crate::storage::traits::{RecordStore, StorageError};

const BLOB_VERSION: u32 = 1;

/// Why a record was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateReason {
    UserMerge,
    AutoDetect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub record_id: String,
    /// Epoch millis
    pub cleaned_at: i64,
    pub reason: DuplicateReason,
    /// Epoch millis; the entry is live while `now <= expires_at`
    pub expires_at: i64,
}

impl DuplicateEntry {
    #[must_use]
    pub fn is_live_at(&self, now: i64) -> bool {
        now <= self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub count: usize,
    pub oldest_entry_age: Option<Duration>,
    pub newest_entry_age: Option<Duration>,
}

/// In-memory form of the registry. All operations take `now` explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateTable {
    version: u32,
    entries: BTreeMap<String, DuplicateEntry>,
}

impl DuplicateTable {
    pub fn new() -> Self {
        Self {
            version: BLOB_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Insert or overwrite; repeated calls just refresh the entry.
    pub fn mark_cleaned(&mut self, record_id: &str, reason: DuplicateReason, retention: Duration, now: i64) {
        self.entries.insert(
            record_id.to_string(),
            DuplicateEntry {
                record_id: record_id.to_string(),
                cleaned_at: now,
                reason,
                expires_at: now.saturating_add(duration_millis(retention)),
            },
        );
    }

    #[must_use]
    pub fn is_recently_cleaned(&self, record_id: &str, now: i64) -> bool {
        self.entries.get(record_id).is_some_and(|e| e.is_live_at(now))
    }

    /// Push a live entry's expiry to `now + retention`. Returns false if absent.
    pub fn refresh(&mut self, record_id: &str, retention: Duration, now: i64) -> bool {
        match self.entries.get_mut(record_id) {
            Some(entry) => {
                entry.expires_at = now.saturating_add(duration_millis(retention));
                true
            }
            None => false,
        }
    }

    /// Remove entries with `expires_at < now`.
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at >= now);
        before - self.entries.len()
    }

    pub fn get(&self, record_id: &str) -> Option<&DuplicateEntry> {
        self.entries.get(record_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self, now: i64) -> RegistryStats {
        let age = |cleaned_at: i64| Duration::from_millis(now.saturating_sub(cleaned_at).max(0) as u64);
        RegistryStats {
            count: self.entries.len(),
            oldest_entry_age: self.entries.values().map(|e| e.cleaned_at).min().map(age),
            newest_entry_age: self.entries.values().map(|e| e.cleaned_at).max().map(age),
        }
    }

    pub fn to_blob(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_blob(blob: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}

impl Default for DuplicateTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Store-backed duplicate registry.
///
/// Every operation loads the blob, applies the change and writes it back, so
/// an eviction tier that removes the reserved key is observed immediately.
/// Writes go through the quota monitor like any other record.
pub struct DuplicateRegistry {
    store: Arc<dyn RecordStore>,
    quota: Arc<QuotaMonitor>,
    clock: Arc<dyn Clock>,
    key: String,
}

impl DuplicateRegistry {
    pub fn new(
        store: Arc<dyn RecordStore>,
        quota: Arc<QuotaMonitor>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            quota,
            clock,
            key: key.into(),
        }
    }

    /// Reserved store key holding the blob.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Load the table. A corrupt blob yields an empty table.
    pub async fn load(&self) -> Result<DuplicateTable> {
        let Some(blob) = self.store.get(&self.key).await? else {
            return Ok(DuplicateTable::new());
        };
        match DuplicateTable::from_blob(&blob) {
            Ok(table) => Ok(table),
            Err(e) => {
                warn!(key = %self.key, error = %e, bytes = blob.len(), "Duplicate registry corrupt, resetting to empty");
                metrics::record_registry_corrupt();
                Ok(DuplicateTable::new())
            }
        }
    }

    /// Write the table back through [`QuotaMonitor::guarded_write`].
    pub async fn persist(&self, table: &DuplicateTable) -> Result<()> {
        let blob = table.to_blob().map_err(|e| {
            GovernorError::Storage(StorageError::Backend(format!("registry serialization failed: {}", e)))
        })?;
        self.quota.guarded_write(&self.key, &blob).await?;
        metrics::set_registry_size(table.len(), blob.len());
        Ok(())
    }

    pub async fn mark_cleaned(
        &self,
        record_id: &str,
        reason: DuplicateReason,
        retention: Duration,
    ) -> Result<()> {
        let mut table = self.load().await?;
        table.mark_cleaned(record_id, reason, retention, self.now());
        self.persist(&table).await?;
        debug!(record_id, ?reason, "Marked record as cleaned duplicate");
        Ok(())
    }

    /// Mark several ids with one load and one write.
    pub async fn mark_cleaned_many<I, S>(
        &self,
        record_ids: I,
        reason: DuplicateReason,
        retention: Duration,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = self.load().await?;
        let now = self.now();
        let mut marked = 0;
        for id in record_ids {
            table.mark_cleaned(id.as_ref(), reason, retention, now);
            marked += 1;
        }
        if marked > 0 {
            self.persist(&table).await?;
        }
        Ok(marked)
    }

    pub async fn is_recently_cleaned(&self, record_id: &str) -> Result<bool> {
        Ok(self.load().await?.is_recently_cleaned(record_id, self.now()))
    }

    pub async fn refresh(&self, record_id: &str, retention: Duration) -> Result<bool> {
        let mut table = self.load().await?;
        let refreshed = table.refresh(record_id, retention, self.now());
        if refreshed {
            self.persist(&table).await?;
        }
        Ok(refreshed)
    }

    /// Remove expired entries, writing back only if something changed.
    pub async fn purge_expired(&self, now: i64) -> Result<usize> {
        let mut table = self.load().await?;
        let removed = table.purge_expired(now);
        if removed > 0 {
            self.persist(&table).await?;
            metrics::record_registry_purge(removed);
            info!(removed, remaining = table.len(), "Purged expired duplicate entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        Ok(self.load().await?.stats(self.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GovernorConfig;
    use crate::eviction::EvictionEngine;
    use crate::storage::memory::InMemoryStore;
    use crate::usage::UsageAccounting;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const KEY: &str = "governor:duplicate-registry";

    fn registry_over(
        store: InMemoryStore,
        ceiling: u64,
        start: i64,
    ) -> (Arc<InMemoryStore>, Arc<ManualClock>, DuplicateRegistry) {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(start));
        let config = Arc::new(GovernorConfig {
            ceiling_bytes: ceiling,
            registry_key: KEY.to_string(),
            ..Default::default()
        });
        let usage = Arc::new(UsageAccounting::new(store.clone(), ceiling, config.warn_threshold_pct));
        let eviction = Arc::new(EvictionEngine::new(store.clone(), usage.clone(), config.clone(), clock.clone()));
        let quota = Arc::new(QuotaMonitor::new(store.clone(), usage, eviction, config));
        let registry = DuplicateRegistry::new(store.clone(), quota, clock.clone(), KEY);
        (store, clock, registry)
    }

    fn registry(start: i64) -> (Arc<InMemoryStore>, Arc<ManualClock>, DuplicateRegistry) {
        registry_over(InMemoryStore::new(), 1024 * 1024, start)
    }

    #[test]
    fn test_table_expiry_window_is_inclusive() {
        let mut table = DuplicateTable::new();
        table.mark_cleaned("txn-1", DuplicateReason::UserMerge, Duration::from_millis(100), 1_000);

        assert!(table.is_recently_cleaned("txn-1", 1_000));
        assert!(table.is_recently_cleaned("txn-1", 1_100));
        assert!(!table.is_recently_cleaned("txn-1", 1_101));
        assert!(!table.is_recently_cleaned("txn-2", 1_000));
    }

    #[test]
    fn test_table_purge_keeps_boundary_entries() {
        let mut table = DuplicateTable::new();
        table.mark_cleaned("a", DuplicateReason::AutoDetect, Duration::from_millis(10), 0);
        table.mark_cleaned("b", DuplicateReason::AutoDetect, Duration::from_millis(50), 0);

        assert_eq!(table.purge_expired(10), 0);
        assert_eq!(table.purge_expired(11), 1);
        assert!(table.get("a").is_none());
        assert!(table.get("b").is_some());
    }

    #[test]
    fn test_table_stats() {
        let mut table = DuplicateTable::new();
        assert_eq!(table.stats(0), RegistryStats::default());

        table.mark_cleaned("old", DuplicateReason::UserMerge, DAY, 1_000);
        table.mark_cleaned("new", DuplicateReason::UserMerge, DAY, 4_000);
        let stats = table.stats(5_000);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.oldest_entry_age, Some(Duration::from_millis(4_000)));
        assert_eq!(stats.newest_entry_age, Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&DuplicateReason::UserMerge).unwrap();
        assert_eq!(json, "\"user-merge\"");
        let reason: DuplicateReason = serde_json::from_str("\"auto-detect\"").unwrap();
        assert_eq!(reason, DuplicateReason::AutoDetect);
    }

    #[tokio::test]
    async fn test_mark_cleaned_persists_under_reserved_key() {
        let (store, _clock, registry) = registry(0);
        registry.mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY).await.unwrap();

        let blob = store.get(KEY).await.unwrap().unwrap();
        assert!(blob.contains("txn-1"));
        assert!(blob.contains("user-merge"));
        assert!(registry.is_recently_cleaned("txn-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_cleaned_again_refreshes_expiry() {
        let (_store, clock, registry) = registry(0);
        registry.mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY).await.unwrap();
        clock.advance(DAY / 2);
        registry.mark_cleaned("txn-1", DuplicateReason::AutoDetect, DAY).await.unwrap();

        let table = registry.load().await.unwrap();
        assert_eq!(table.len(), 1);
        let entry = table.get("txn-1").unwrap();
        assert_eq!(entry.reason, DuplicateReason::AutoDetect);
        assert_eq!(entry.expires_at, duration_millis(DAY / 2 + DAY));
    }

    #[tokio::test]
    async fn test_corrupt_blob_loads_as_empty() {
        let (store, _clock, registry) = registry(0);
        store.set(KEY, "{not json").await.unwrap();

        let table = registry.load().await.unwrap();
        assert!(table.is_empty());
        assert!(!registry.is_recently_cleaned("txn-1").await.unwrap());

        // Next write replaces the corrupt blob
        registry.mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY).await.unwrap();
        assert!(registry.is_recently_cleaned("txn-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_on_empty_registry_writes_nothing() {
        let (store, _clock, registry) = registry(0);
        assert_eq!(registry.purge_expired(1_000).await.unwrap(), 0);
        assert!(!store.exists(KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_purged_after_retention() {
        let (_store, clock, registry) = registry(0);
        registry.mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY).await.unwrap();

        clock.advance(DAY);
        assert!(registry.is_recently_cleaned("txn-1").await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(!registry.is_recently_cleaned("txn-1").await.unwrap());
        assert_eq!(registry.purge_expired(registry.now()).await.unwrap(), 1);
        assert_eq!(registry.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_mark_cleaned_many_and_refresh() {
        let (_store, clock, registry) = registry(0);
        let marked = registry
            .mark_cleaned_many(["a", "b", "c"], DuplicateReason::AutoDetect, DAY)
            .await
            .unwrap();
        assert_eq!(marked, 3);

        clock.advance(DAY);
        assert!(registry.refresh("b", DAY).await.unwrap());
        assert!(!registry.refresh("zzz", DAY).await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(!registry.is_recently_cleaned("a").await.unwrap());
        assert!(registry.is_recently_cleaned("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_cleaned_evicts_stale_cache_when_store_full() {
        let (store, _clock, registry) = registry_over(InMemoryStore::with_capacity_bytes(200), 200, 0);
        store.set("cache:thumb", &"x".repeat(150)).await.unwrap();

        registry.mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY).await.unwrap();

        assert!(!store.exists("cache:thumb").await.unwrap());
        assert!(registry.is_recently_cleaned("txn-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_cleaned_reports_quota_exceeded_when_nothing_evictable() {
        let (store, _clock, registry) = registry_over(InMemoryStore::with_capacity_bytes(200), 200, 0);
        store.set("settings:blob", &"x".repeat(150)).await.unwrap();

        let err = registry
            .mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY)
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(store.exists("settings:blob").await.unwrap());
    }

    #[tokio::test]
    async fn test_registry_removed_from_store_reads_as_empty() {
        let (store, _clock, registry) = registry(0);
        registry.mark_cleaned("txn-1", DuplicateReason::UserMerge, DAY).await.unwrap();
        store.delete(KEY).await.unwrap();
        assert!(!registry.is_recently_cleaned("txn-1").await.unwrap());
    }
}
