// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage governor facade.
//!
//! The [`StorageGovernor`] is constructed once per process with an injected
//! record store and owns every component:
//! - Usage accounting and the quota monitor
//! - The eviction engine (automatic and manual tiers)
//! - The duplicate registry
//! - The sync reconciler
//!
//! Diagnostics ([`report`](StorageGovernor::report),
//! [`registry_stats`](StorageGovernor::registry_stats)) and the manual
//! cleanup entry points are plain methods on this instance.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use storage_governor::{GovernorConfig, InMemoryStore, StorageGovernor, DuplicateReason};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = GovernorConfig { ceiling_bytes: 1000, ..Default::default() };
//! let store = Arc::new(InMemoryStore::with_capacity_bytes(1000));
//! let governor = StorageGovernor::with_system_clock(store, config).unwrap();
//!
//! governor.guarded_write("settings:theme", "dark").await.unwrap();
//! governor.remove_duplicate("txn-1", DuplicateReason::UserMerge).await.unwrap();
//! assert!(governor.is_recently_cleaned("txn-1").await.unwrap());
//!
//! let report = governor.report().await.unwrap();
//! assert!(report.total_usage_bytes > 0);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::GovernorConfig;
use crate::error::Result;
use crate::eviction::{EvictionEngine, EvictionOutcome, EvictionTier};
use crate::quota::{QuotaMonitor, QuotaState, WriteReport};
use crate::reconcile::{CancelHandle, CycleReport, SyncReconciler, SyncSource, SyncState};
use crate::registry::{DuplicateReason, DuplicateRegistry, RegistryStats};
use crate::storage::traits::RecordStore;
use crate::usage::{UsageAccounting, UsageReport};

pub struct StorageGovernor {
    config: Arc<GovernorConfig>,
    store: Arc<dyn RecordStore>,
    usage: Arc<UsageAccounting>,
    eviction: Arc<EvictionEngine>,
    quota: Arc<QuotaMonitor>,
    registry: Arc<DuplicateRegistry>,
    reconciler: SyncReconciler,
}

impl StorageGovernor {
    /// Validate `config` and wire the components around `store`.
    pub fn new(store: Arc<dyn RecordStore>, config: GovernorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let usage = Arc::new(UsageAccounting::new(
            store.clone(),
            config.ceiling_bytes,
            config.warn_threshold_pct,
        ));
        let eviction = Arc::new(EvictionEngine::new(
            store.clone(),
            usage.clone(),
            config.clone(),
            clock.clone(),
        ));
        let quota = Arc::new(QuotaMonitor::new(
            store.clone(),
            usage.clone(),
            eviction.clone(),
            config.clone(),
        ));
        let registry = Arc::new(DuplicateRegistry::new(
            store.clone(),
            quota.clone(),
            clock,
            config.registry_key.clone(),
        ));
        let reconciler = SyncReconciler::new(store.clone(), registry.clone(), quota.clone(), config.clone());

        info!(
            ceiling_bytes = config.ceiling_bytes,
            warn_pct = config.warn_threshold_pct,
            critical_pct = config.critical_threshold_pct,
            "Storage governor initialized"
        );

        Ok(Self {
            config,
            store,
            usage,
            eviction,
            quota,
            registry,
            reconciler,
        })
    }

    pub fn with_system_clock(store: Arc<dyn RecordStore>, config: GovernorConfig) -> Result<Self> {
        Self::new(store, config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Usage and quota
    // ------------------------------------------------------------------

    /// Usage report with the configured top-N.
    pub async fn report(&self) -> Result<UsageReport> {
        self.report_top(self.config.top_n).await
    }

    pub async fn report_top(&self, top_n: usize) -> Result<UsageReport> {
        Ok(self.usage.report(top_n).await?)
    }

    pub async fn size_of(&self, key: &str) -> u64 {
        self.usage.size_of(key).await
    }

    pub async fn evaluate(&self) -> Result<QuotaState> {
        self.quota.evaluate().await
    }

    /// Write through the quota monitor. See [`QuotaMonitor::guarded_write`].
    pub async fn guarded_write(&self, key: &str, value: &str) -> Result<WriteReport> {
        self.quota.guarded_write(key, value).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key).await?)
    }

    // ------------------------------------------------------------------
    // Manual cleanup
    // ------------------------------------------------------------------

    pub async fn standard_cleanup(&self) -> Result<EvictionOutcome> {
        self.eviction.standard(None).await
    }

    pub async fn emergency_cleanup(&self) -> Result<EvictionOutcome> {
        self.eviction.emergency(None).await
    }

    /// Fails with `DestructiveCleanupRefused` unless `confirmed`.
    pub async fn destructive_cleanup(&self, confirmed: bool) -> Result<EvictionOutcome> {
        self.eviction.destructive(confirmed).await
    }

    pub async fn run_tier(&self, tier: EvictionTier, confirmed: bool) -> Result<EvictionOutcome> {
        self.eviction.run(tier, confirmed, None).await
    }

    // ------------------------------------------------------------------
    // Duplicate registry
    // ------------------------------------------------------------------

    /// Mark with the configured default retention.
    pub async fn mark_cleaned(&self, record_id: &str, reason: DuplicateReason) -> Result<()> {
        self.mark_cleaned_for(record_id, reason, self.config.retention()).await
    }

    pub async fn mark_cleaned_for(
        &self,
        record_id: &str,
        reason: DuplicateReason,
        retention: Duration,
    ) -> Result<()> {
        self.registry.mark_cleaned(record_id, reason, retention).await
    }

    pub async fn mark_cleaned_many(&self, record_ids: &[&str], reason: DuplicateReason) -> Result<usize> {
        self.registry
            .mark_cleaned_many(record_ids.iter().copied(), reason, self.config.retention())
            .await
    }

    /// Remember a record as a cleaned duplicate, then delete it.
    ///
    /// A failed mark leaves the record in place. Returns whether the record
    /// was present.
    pub async fn remove_duplicate(&self, record_id: &str, reason: DuplicateReason) -> Result<bool> {
        let key = self.config.record_key(record_id);
        let existed = self.store.exists(&key).await?;
        self.mark_cleaned(record_id, reason).await?;
        self.store.delete(&key).await?;
        info!(record_id, existed, ?reason, "Removed duplicate record");
        Ok(existed)
    }

    pub async fn is_recently_cleaned(&self, record_id: &str) -> Result<bool> {
        self.registry.is_recently_cleaned(record_id).await
    }

    /// Purge registry entries expired as of now.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.registry.purge_expired(self.registry.now()).await
    }

    pub async fn registry_stats(&self) -> Result<RegistryStats> {
        self.registry.stats().await
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    pub async fn sync_cycle(&self, source: &dyn SyncSource) -> Result<CycleReport> {
        self.reconciler.run_cycle(source).await
    }

    pub fn sync_state(&self) -> SyncState {
        self.reconciler.state()
    }

    pub fn sync_state_receiver(&self) -> tokio::sync::watch::Receiver<SyncState> {
        self.reconciler.state_receiver()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reconciler.cancel_handle()
    }
}
