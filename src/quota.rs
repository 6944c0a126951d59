// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quota monitoring and escalation on write.
//!
//! # Example
//!
//! ```
//! use storage_governor::QuotaState;
//!
//! assert_eq!(QuotaState::from_percentage(50.0, 80.0, 90.0), QuotaState::Nominal);
//! assert_eq!(QuotaState::from_percentage(85.0, 80.0, 90.0), QuotaState::Approaching);
//! assert_eq!(QuotaState::from_percentage(97.0, 80.0, 90.0), QuotaState::Critical);
//! assert!(QuotaState::Critical.requires_eviction());
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};
use crate::eviction::{EvictionEngine, EvictionOutcome, EvictionTier};
use crate::metrics;
use crate::storage::traits::{RecordStore, StorageError};
use crate::usage::UsageAccounting;

/// Usage state relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuotaState {
    Nominal = 0,
    Approaching = 1,
    Critical = 2,
}

impl QuotaState {
    /// Classify a usage percentage. Thresholds are inclusive lower bounds.
    #[must_use]
    pub fn from_percentage(pct: f64, warn_pct: f64, critical_pct: f64) -> Self {
        match pct {
            p if p >= critical_pct => Self::Critical,
            p if p >= warn_pct => Self::Approaching,
            _ => Self::Nominal,
        }
    }

    /// Whether a write in this state triggers eviction before it is attempted.
    #[must_use]
    pub fn requires_eviction(&self) -> bool {
        matches!(self, Self::Critical)
    }

    /// Tier used when escalating from this state.
    #[must_use]
    pub fn escalation_tier(&self) -> EvictionTier {
        match self {
            Self::Critical => EvictionTier::Emergency,
            Self::Nominal | Self::Approaching => EvictionTier::Standard,
        }
    }
}

impl std::fmt::Display for QuotaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How a guarded write went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Eviction run on behalf of this write, if any
    pub eviction: Option<(EvictionTier, EvictionOutcome)>,
    /// Number of store `set` calls made (1 or 2)
    pub attempts: u8,
}

/// Evaluates usage against thresholds and escalates writes that hit the ceiling.
pub struct QuotaMonitor {
    store: Arc<dyn RecordStore>,
    usage: Arc<UsageAccounting>,
    eviction: Arc<EvictionEngine>,
    config: Arc<GovernorConfig>,
}

impl QuotaMonitor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        usage: Arc<UsageAccounting>,
        eviction: Arc<EvictionEngine>,
        config: Arc<GovernorConfig>,
    ) -> Self {
        Self {
            store,
            usage,
            eviction,
            config,
        }
    }

    pub async fn evaluate(&self) -> Result<QuotaState> {
        let total = self.usage.total_usage().await?;
        let pct = self.usage.percentage_of_ceiling(total);
        let state = QuotaState::from_percentage(
            pct,
            self.config.warn_threshold_pct,
            self.config.critical_threshold_pct,
        );
        metrics::set_quota_state(state as u8);
        debug!(total_bytes = total, pct = format!("{:.1}%", pct), state = %state, "Quota evaluated");
        Ok(state)
    }

    /// Write with quota escalation.
    ///
    /// A `Critical` pre-write state runs emergency cleanup before the write.
    /// Otherwise a `CapacityExceeded` rejection runs the tier matching the
    /// re-evaluated state and retries once. Never more than one eviction and
    /// one retry; destructive cleanup is never used here.
    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    pub async fn guarded_write(&self, key: &str, value: &str) -> Result<WriteReport> {
        let mut report = WriteReport::default();

        let state = self.evaluate().await?;
        if state.requires_eviction() {
            let tier = state.escalation_tier();
            info!(key, state = %state, tier = %tier, "Pre-write eviction");
            let outcome = self.eviction.run(tier, false, Some(key)).await?;
            report.eviction = Some((tier, outcome));
        }

        report.attempts += 1;
        match self.store.set(key, value).await {
            Ok(()) => {
                metrics::record_guarded_write(if report.eviction.is_some() { "retried_ok" } else { "ok" });
                return Ok(report);
            }
            Err(StorageError::CapacityExceeded { .. }) if report.eviction.is_none() => {}
            Err(StorageError::CapacityExceeded { .. }) => return Err(self.exhausted(key, value)),
            Err(e) => {
                metrics::record_guarded_write("error");
                return Err(e.into());
            }
        }

        let tier = self.evaluate().await?.escalation_tier();
        warn!(key, tier = %tier, "Write rejected for capacity, escalating");
        let outcome = self.eviction.run(tier, false, Some(key)).await?;
        report.eviction = Some((tier, outcome));

        report.attempts += 1;
        match self.store.set(key, value).await {
            Ok(()) => {
                metrics::record_guarded_write("retried_ok");
                Ok(report)
            }
            Err(StorageError::CapacityExceeded { .. }) => Err(self.exhausted(key, value)),
            Err(e) => {
                metrics::record_guarded_write("error");
                Err(e.into())
            }
        }
    }

    fn exhausted(&self, key: &str, value: &str) -> GovernorError {
        warn!(key, bytes = value.len(), "Quota exceeded after escalation");
        metrics::record_guarded_write("quota_exceeded");
        GovernorError::QuotaExceeded {
            key: key.to_string(),
            requested_bytes: value.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts `set` calls on top of an in-memory store.
    struct CountingStore {
        inner: InMemoryStore,
        sets: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for CountingStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
            self.inner.delete(key).await
        }
        async fn keys(&self) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.keys().await
        }
    }

    fn monitor(store: Arc<CountingStore>, ceiling: u64) -> QuotaMonitor {
        let config = Arc::new(GovernorConfig {
            ceiling_bytes: ceiling,
            ..Default::default()
        });
        let usage = Arc::new(UsageAccounting::new(store.clone(), ceiling, config.warn_threshold_pct));
        let clock = Arc::new(ManualClock::new(0));
        let eviction = Arc::new(EvictionEngine::new(store.clone(), usage.clone(), config.clone(), clock));
        QuotaMonitor::new(store, usage, eviction, config)
    }

    fn counting(capacity: u64) -> Arc<CountingStore> {
        Arc::new(CountingStore {
            inner: InMemoryStore::with_capacity_bytes(capacity),
            sets: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_state_thresholds() {
        assert_eq!(QuotaState::from_percentage(0.0, 80.0, 90.0), QuotaState::Nominal);
        assert_eq!(QuotaState::from_percentage(79.9, 80.0, 90.0), QuotaState::Nominal);
        assert_eq!(QuotaState::from_percentage(80.0, 80.0, 90.0), QuotaState::Approaching);
        assert_eq!(QuotaState::from_percentage(90.0, 80.0, 90.0), QuotaState::Critical);
        assert_eq!(QuotaState::from_percentage(140.0, 80.0, 90.0), QuotaState::Critical);
    }

    #[test]
    fn test_escalation_tiers_are_automatic() {
        for state in [QuotaState::Nominal, QuotaState::Approaching, QuotaState::Critical] {
            assert!(state.escalation_tier().is_automatic());
        }
    }

    #[tokio::test]
    async fn test_nominal_write_needs_no_eviction() {
        let store = counting(1000);
        let monitor = monitor(store.clone(), 1000);

        let report = monitor.guarded_write("record:a", "hello").await.unwrap();
        assert_eq!(report.attempts, 1);
        assert!(report.eviction.is_none());
        assert_eq!(monitor.evaluate().await.unwrap(), QuotaState::Nominal);
    }

    #[tokio::test]
    async fn test_critical_write_runs_emergency_first() {
        let store = counting(1000);
        store.inner.set("record:bulk", &"x".repeat(970)).await.unwrap();
        let monitor = monitor(store.clone(), 1000);

        let report = monitor.guarded_write("record:new", &"y".repeat(50)).await.unwrap();
        let (tier, outcome) = report.eviction.unwrap();
        assert_eq!(tier, EvictionTier::Emergency);
        assert_eq!(outcome.freed_bytes, 970);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_critical_write_fails_when_nothing_evictable() {
        let store = counting(1000);
        store.inner.set("auth:blob", &"x".repeat(970)).await.unwrap();
        let monitor = monitor(store.clone(), 1000);

        let err = monitor.guarded_write("record:new", &"y".repeat(50)).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_rejection_retries_exactly_once() {
        let store = counting(100);
        store.inner.set("settings:big", &"x".repeat(60)).await.unwrap();
        // 60% usage: nominal, so the first attempt goes straight to the store
        let monitor = monitor(store.clone(), 100);

        let err = monitor.guarded_write("record:new", &"y".repeat(50)).await.unwrap_err();
        assert!(matches!(err, GovernorError::QuotaExceeded { requested_bytes: 50, .. }));
        assert_eq!(store.sets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_rejection_recovers_via_standard_tier() {
        let store = counting(100);
        store.inner.set("cache:thumb", &"x".repeat(60)).await.unwrap();
        let monitor = monitor(store.clone(), 100);

        let report = monitor.guarded_write("record:new", &"y".repeat(50)).await.unwrap();
        let (tier, outcome) = report.eviction.unwrap();
        assert_eq!(tier, EvictionTier::Standard);
        assert_eq!(outcome.removed_keys, vec!["cache:thumb"]);
        assert_eq!(report.attempts, 2);
    }
}
