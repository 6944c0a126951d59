// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the storage governor.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `storage_governor_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `tier`: standard, emergency, destructive
//! - `status`: ok, retried_ok, quota_exceeded, error
//! - `state`: final sync cycle state (Done, Aborted)

use metrics::{counter, gauge, histogram};

/// Set current store usage
pub fn set_usage(bytes: u64, percentage: f64) {
    gauge!("storage_governor_usage_bytes").set(bytes as f64);
    gauge!("storage_governor_usage_percentage").set(percentage);
}

/// Set quota state (0 = Nominal, 1 = Approaching, 2 = Critical)
pub fn set_quota_state(state: u8) {
    gauge!("storage_governor_quota_state").set(state as f64);
}

/// Record an eviction tier run
pub fn record_eviction(tier: &str, keys: usize, bytes: u64) {
    counter!("storage_governor_evictions_total", "tier" => tier.to_string()).increment(1);
    counter!("storage_governor_evicted_keys_total", "tier" => tier.to_string())
        .increment(keys as u64);
    counter!("storage_governor_evicted_bytes_total", "tier" => tier.to_string())
        .increment(bytes);
}

/// Record the outcome of a guarded write
pub fn record_guarded_write(status: &str) {
    counter!(
        "storage_governor_guarded_writes_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a finished sync cycle
pub fn record_sync_cycle(state: &str, batch_size: usize) {
    counter!(
        "storage_governor_sync_cycles_total",
        "state" => state.to_string()
    )
    .increment(1);
    histogram!("storage_governor_sync_batch_size").record(batch_size as f64);
}

/// Record records suppressed by the duplicate registry
pub fn record_skipped_duplicates(count: usize) {
    counter!("storage_governor_skipped_duplicates_total").increment(count as u64);
}

/// Record malformed incoming records
pub fn record_quarantined(count: usize) {
    counter!("storage_governor_quarantined_records_total").increment(count as u64);
}

/// Set duplicate registry entry count and serialized size
pub fn set_registry_size(entries: usize, bytes: usize) {
    gauge!("storage_governor_registry_entries").set(entries as f64);
    gauge!("storage_governor_registry_bytes").set(bytes as f64);
}

/// Record a registry blob that failed to deserialize
pub fn record_registry_corrupt() {
    counter!("storage_governor_registry_corrupt_total").increment(1);
}

/// Record expired registry entries removed by compaction
pub fn record_registry_purge(removed: usize) {
    counter!("storage_governor_registry_purged_total").increment(removed as u64);
}
