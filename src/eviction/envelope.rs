// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamped wrapper for disposable cache values.
///
/// Standard cleanup reads `cached_at` (or a legacy `timestamp` field) to judge
/// freshness. Values that are not envelopes have no age and are treated as
/// the stalest possible entries.
///
/// ```
/// use storage_governor::eviction::CacheEnvelope;
/// use serde_json::json;
///
/// let raw = CacheEnvelope::wrap(1_000, json!({"avatar": "..."}));
/// assert_eq!(CacheEnvelope::cached_at_of(&raw), Some(1_000));
/// assert_eq!(CacheEnvelope::cached_at_of("plain text"), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    #[serde(default, alias = "timestamp")]
    pub cached_at: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

impl CacheEnvelope {
    /// Serialize `data` wrapped with a `cached_at` stamp.
    pub fn wrap(cached_at: i64, data: Value) -> String {
        let envelope = Self {
            cached_at: Some(cached_at),
            data,
        };
        // Serializing a Value-bearing struct cannot fail
        serde_json::to_string(&envelope).unwrap_or_default()
    }

    /// Extract the stamp from a stored value, if it is an envelope.
    pub fn cached_at_of(raw: &str) -> Option<i64> {
        serde_json::from_str::<Self>(raw).ok().and_then(|e| e.cached_at)
    }
}
