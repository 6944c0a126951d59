// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::envelope::CacheEnvelope;
use crate::clock::{duration_millis, Clock};
use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};
use crate::metrics;
use crate::storage::traits::RecordStore;
use crate::usage::UsageAccounting;

/// Cleanup tier, ordered from least to most destructive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvictionTier {
    /// Stale disposable caches only
    Standard = 0,
    /// Everything except essential keys
    Emergency = 1,
    /// Everything except the auth/session subset (manual, confirmed only)
    Destructive = 2,
}

impl EvictionTier {
    /// Whether the quota monitor may invoke this tier on its own.
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Self::Destructive)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Emergency => "emergency",
            Self::Destructive => "destructive",
        }
    }
}

impl std::fmt::Display for EvictionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result of one tier run.
///
/// `freed_bytes` is the sum of the removed values' sizes measured just
/// before each removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub removed_keys: Vec<String>,
    pub freed_bytes: u64,
}

impl EvictionOutcome {
    /// Check if anything was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_keys.is_empty()
    }
}

/// Executes the three cleanup tiers against the record store.
pub struct EvictionEngine {
    store: Arc<dyn RecordStore>,
    usage: Arc<UsageAccounting>,
    config: Arc<GovernorConfig>,
    clock: Arc<dyn Clock>,
}

impl EvictionEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        usage: Arc<UsageAccounting>,
        config: Arc<GovernorConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            usage,
            config,
            clock,
        }
    }

    /// Run `tier`. Destructive requires `confirmed`.
    ///
    /// `protect` names one key that must survive regardless of tier (the key
    /// a guarded write is trying to store).
    pub async fn run(
        &self,
        tier: EvictionTier,
        confirmed: bool,
        protect: Option<&str>,
    ) -> Result<EvictionOutcome> {
        match tier {
            EvictionTier::Standard => self.standard(protect).await,
            EvictionTier::Emergency => self.emergency(protect).await,
            EvictionTier::Destructive => self.destructive(confirmed).await,
        }
    }

    /// Remove stale disposable caches, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn standard(&self, protect: Option<&str>) -> Result<EvictionOutcome> {
        let now = self.clock.now_millis();
        let freshness = duration_millis(self.config.cache_freshness());

        let mut stale: Vec<(i64, String)> = Vec::new();
        for key in self.store.keys().await? {
            if !self.config.is_disposable(&key)
                || self.config.essential_keys.matches(&key)
                || key == self.config.registry_key
                || protect == Some(key.as_str())
            {
                continue;
            }
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            // Unstamped values sort before every stamped one
            let cached_at = CacheEnvelope::cached_at_of(&raw).unwrap_or(i64::MIN);
            if cached_at == i64::MIN || now.saturating_sub(cached_at) > freshness {
                stale.push((cached_at, key));
            }
        }
        stale.sort();

        let victims = stale.into_iter().map(|(_, key)| key).collect();
        self.remove(EvictionTier::Standard, victims).await
    }

    /// Remove every key outside the essential set, registry included.
    #[tracing::instrument(skip(self))]
    pub async fn emergency(&self, protect: Option<&str>) -> Result<EvictionOutcome> {
        warn!("Emergency cleanup: removing all non-essential keys");
        let victims = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|k| !self.config.essential_keys.matches(k) && protect != Some(k.as_str()))
            .collect();
        self.remove(EvictionTier::Emergency, victims).await
    }

    /// Remove every key outside the auth/session subset.
    #[tracing::instrument(skip(self))]
    pub async fn destructive(&self, confirmed: bool) -> Result<EvictionOutcome> {
        if !confirmed {
            warn!("Destructive cleanup requested without confirmation");
            return Err(GovernorError::DestructiveCleanupRefused);
        }
        warn!("Destructive cleanup: removing everything except auth keys");
        let victims = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|k| !self.config.auth_keys.matches(k))
            .collect();
        self.remove(EvictionTier::Destructive, victims).await
    }

    async fn remove(&self, tier: EvictionTier, victims: Vec<String>) -> Result<EvictionOutcome> {
        let mut outcome = EvictionOutcome::default();
        for key in victims {
            let size = self.usage.size_of(&key).await;
            self.store.delete(&key).await?;
            debug!(tier = %tier, key = %key, size, "Evicted key");
            outcome.freed_bytes += size;
            outcome.removed_keys.push(key);
        }

        metrics::record_eviction(tier.label(), outcome.removed_keys.len(), outcome.freed_bytes);
        info!(
            tier = %tier,
            removed = outcome.removed_keys.len(),
            freed_bytes = outcome.freed_bytes,
            "Eviction tier complete"
        );
        Ok(outcome)
    }
}
