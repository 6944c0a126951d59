// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync reconciliation: merging a remote batch while honoring the duplicate registry.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Fetching → Reconciling → Committing → Done
//!   └───────┴───────────┴─────────────┴──→ Aborted
//! ```
//!
//! Cancellation is honored at state boundaries and between individual
//! upserts, never inside one. Upserts committed before an abort stay applied;
//! there is no rollback.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{ExpiryPolicy, GovernorConfig};
use crate::error::{GovernorError, Result};
use crate::metrics;
use crate::quota::QuotaMonitor;
use crate::registry::DuplicateRegistry;
use crate::storage::traits::{RecordStore, StorageError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("{0}")]
    Unavailable(String),
}

/// Remote side of a sync: yields raw records, one batch per call.
#[async_trait]
pub trait SyncSource: Send + Sync {
    async fn next_batch(&self) -> std::result::Result<Vec<Value>, SourceError>;
}

/// A well-formed record: `id` and `version` are required, `payload` is opaque.
///
/// This is also the stored form under `record_key_prefix + id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: String,
    /// Last-writer-wins ordering; higher is newer
    pub version: u64,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Error, Debug)]
#[error("malformed record: {0}")]
pub struct MalformedRecord(String);

impl SyncRecord {
    pub fn new(id: impl Into<String>, version: u64, payload: Value) -> Self {
        Self {
            id: id.into(),
            version,
            payload,
        }
    }

    /// Validate a raw incoming value.
    pub fn from_value(value: Value) -> std::result::Result<Self, MalformedRecord> {
        let record: Self =
            serde_json::from_value(value).map_err(|e| MalformedRecord(e.to_string()))?;
        if record.id.trim().is_empty() {
            return Err(MalformedRecord("empty id".into()));
        }
        Ok(record)
    }
}

/// Per-cycle reconciler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Fetching,
    Reconciling,
    Committing,
    Done,
    Aborted,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Tally for one sync cycle.
///
/// For a cycle that passes reconciliation,
/// `applied + skipped_duplicates + quarantined == batch_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub final_state: SyncState,
    pub batch_size: usize,
    /// Records merged: written, or already superseded by an equal-or-newer local copy
    pub applied: usize,
    pub written: usize,
    pub superseded: usize,
    pub skipped_duplicates: usize,
    pub quarantined: usize,
    /// Registry entries removed by end-of-cycle housekeeping
    pub purged: usize,
}

impl Default for CycleReport {
    fn default() -> Self {
        Self {
            final_state: SyncState::Idle,
            batch_size: 0,
            applied: 0,
            written: 0,
            superseded: 0,
            skipped_duplicates: 0,
            quarantined: 0,
            purged: 0,
        }
    }
}

impl CycleReport {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.final_state == SyncState::Done
    }

    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.applied + self.skipped_duplicates + self.quarantined == self.batch_size
    }
}

/// Requests cancellation of the running (or next) sync cycle.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Filters incoming batches through the duplicate registry and commits survivors.
pub struct SyncReconciler {
    store: Arc<dyn RecordStore>,
    registry: Arc<DuplicateRegistry>,
    quota: Arc<QuotaMonitor>,
    config: Arc<GovernorConfig>,
    state: watch::Sender<SyncState>,
    cancel: Arc<watch::Sender<bool>>,
    /// Serializes cycles
    cycle: Mutex<()>,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<DuplicateRegistry>,
        quota: Arc<QuotaMonitor>,
        config: Arc<GovernorConfig>,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        let (cancel, _) = watch::channel(false);
        Self {
            store,
            registry,
            quota,
            config,
            state,
            cancel: Arc::new(cancel),
            cycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Run one sync cycle against `source`.
    ///
    /// Returns the report for cycles that end `Done` or are cancelled
    /// (`Aborted`). Source, storage and quota failures abort the cycle and
    /// are returned as errors; upserts committed before the failure remain.
    #[tracing::instrument(skip(self, source))]
    pub async fn run_cycle(&self, source: &dyn SyncSource) -> Result<CycleReport> {
        let _cycle = self.cycle.lock().await;
        self.transition(SyncState::Idle);

        let mut report = CycleReport::default();
        let result = self.drive(source, &mut report).await;
        // A cancel request applies to one cycle only
        self.cancel.send_replace(false);

        report.final_state = self.state();
        if result.is_err() || report.final_state != SyncState::Done {
            report.final_state = SyncState::Aborted;
            self.transition(SyncState::Aborted);
        }
        metrics::record_sync_cycle(&report.final_state.to_string(), report.batch_size);
        metrics::record_skipped_duplicates(report.skipped_duplicates);
        metrics::record_quarantined(report.quarantined);

        result.map(|()| {
            info!(
                state = %report.final_state,
                batch = report.batch_size,
                written = report.written,
                skipped = report.skipped_duplicates,
                quarantined = report.quarantined,
                "Sync cycle finished"
            );
            report
        })
    }

    /// Advance through the states. Returns early (state left at the boundary)
    /// when cancellation is observed.
    async fn drive(&self, source: &dyn SyncSource, report: &mut CycleReport) -> Result<()> {
        if self.cancel_requested() {
            return Ok(());
        }
        self.transition(SyncState::Fetching);
        let batch = source
            .next_batch()
            .await
            .map_err(|e| GovernorError::SourceUnavailable(e.to_string()))?;
        report.batch_size = batch.len();

        if self.cancel_requested() {
            return Ok(());
        }
        self.transition(SyncState::Reconciling);
        let pending = self.reconcile(batch, report).await?;

        if self.cancel_requested() {
            return Ok(());
        }
        self.transition(SyncState::Committing);
        for record in pending.into_values() {
            if self.cancel_requested() {
                return Ok(());
            }
            let key = self.config.record_key(&record.id);
            let value = serde_json::to_string(&record)
                .map_err(|e| StorageError::Backend(format!("unserializable record '{}': {}", record.id, e)))?;
            self.quota.guarded_write(&key, &value).await?;
            report.written += 1;
        }

        report.purged = self.registry.purge_expired(self.registry.now()).await?;
        self.transition(SyncState::Done);
        Ok(())
    }

    /// Classify every incoming record and return the upserts to commit, keyed by id.
    async fn reconcile(
        &self,
        batch: Vec<Value>,
        report: &mut CycleReport,
    ) -> Result<BTreeMap<String, SyncRecord>> {
        let mut table = self.registry.load().await?;
        let now = self.registry.now();
        let mut refreshed = false;
        let mut pending: BTreeMap<String, SyncRecord> = BTreeMap::new();

        for raw in batch {
            let record = match SyncRecord::from_value(raw) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Quarantined incoming record");
                    report.quarantined += 1;
                    continue;
                }
            };

            if table.is_recently_cleaned(&record.id, now) {
                debug!(id = %record.id, "Skipping recently cleaned duplicate");
                report.skipped_duplicates += 1;
                if self.config.expiry_policy == ExpiryPolicy::Sliding {
                    refreshed |= table.refresh(&record.id, self.config.retention(), now);
                }
                continue;
            }

            report.applied += 1;
            let current = match pending.get(&record.id) {
                Some(queued) => Some(queued.version),
                None => self.stored_version(&record.id).await?,
            };
            if current.map_or(true, |v| record.version > v) {
                pending.insert(record.id.clone(), record);
            }
        }

        if refreshed {
            self.registry.persist(&table).await?;
        }
        report.superseded = report.applied - pending.len();
        Ok(pending)
    }

    /// Version of the locally stored copy. Unparseable copies count as absent.
    async fn stored_version(&self, id: &str) -> Result<Option<u64>> {
        let key = self.config.record_key(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<SyncRecord>(&raw) {
            Ok(stored) => Ok(Some(stored.version)),
            Err(e) => {
                debug!(key = %key, error = %e, "Stored record unreadable, will overwrite");
                Ok(None)
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        let cancelled = *self.cancel.borrow();
        if cancelled {
            info!(state = %self.state(), "Sync cycle cancelled at boundary");
        }
        cancelled
    }

    fn transition(&self, next: SyncState) {
        let prev = self.state.send_replace(next);
        debug!(from = %prev, to = %next, "Sync state transition");
    }
}
