//! Configuration for the storage governor.
//!
//! # Example
//!
//! ```
//! use storage_governor::GovernorConfig;
//!
//! // Minimal config (uses defaults)
//! let config = GovernorConfig::default();
//! assert_eq!(config.ceiling_bytes, 5 * 1024 * 1024); // 5 MB
//! assert!(config.validate().is_ok());
//!
//! // Partial config from JSON, remaining fields fall back to defaults
//! let config = GovernorConfig::from_json(r#"{
//!     "ceiling_bytes": 1000,
//!     "critical_threshold_pct": 90.0,
//!     "disposable_prefixes": ["cache:", "thumb:"]
//! }"#).unwrap();
//! assert_eq!(config.ceiling_bytes, 1000);
//! assert!(config.is_disposable("thumb:42"));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{GovernorError, Result};

/// One key-name pattern.
///
/// Deserializes from `{"prefix": "auth"}` or `{"contains": "token"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMatcher {
    Prefix(String),
    Contains(String),
}

impl KeyMatcher {
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Prefix(p) => key.starts_with(p.as_str()),
            Self::Contains(c) => key.contains(c.as_str()),
        }
    }

    /// True if every key matched by `other` is also matched by `self`.
    #[must_use]
    pub fn implies(&self, other: &KeyMatcher) -> bool {
        match (self, other) {
            (Self::Prefix(q), Self::Prefix(p)) => p.starts_with(q.as_str()),
            (Self::Contains(c), Self::Prefix(p)) => p.contains(c.as_str()),
            (Self::Contains(c), Self::Contains(c1)) => c1.contains(c.as_str()),
            (Self::Prefix(_), Self::Contains(_)) => false,
        }
    }
}

/// A set of key patterns; a key belongs to the set if any pattern matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct KeySet(Vec<KeyMatcher>);

impl KeySet {
    pub fn new(matchers: Vec<KeyMatcher>) -> Self {
        Self(matchers)
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.0.iter().any(|m| m.matches(key))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matchers(&self) -> &[KeyMatcher] {
        &self.0
    }

    /// True if every pattern in `narrower` is implied by some pattern here.
    #[must_use]
    pub fn covers(&self, narrower: &KeySet) -> bool {
        narrower
            .0
            .iter()
            .all(|n| self.0.iter().any(|m| m.implies(n)))
    }
}

/// What the reconciler does to a registry entry when it skips a re-sighted duplicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Leave `expires_at` untouched.
    #[default]
    Fixed,
    /// Push `expires_at` to `now + retention`.
    Sliding,
}

/// Configuration for the storage governor.
///
/// All fields have defaults suitable for a browser-sized (5 MB) store.
#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    /// Quota ceiling in bytes (default: 5 MB)
    #[serde(default = "default_ceiling_bytes")]
    pub ceiling_bytes: u64,

    /// Usage percentage at which the store is reported as approaching quota
    #[serde(default = "default_warn_threshold_pct")]
    pub warn_threshold_pct: f64,
    /// Usage percentage at which writes trigger emergency cleanup
    #[serde(default = "default_critical_threshold_pct")]
    pub critical_threshold_pct: f64,

    /// Number of largest entries included in a usage report
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Keys that survive standard and emergency cleanup
    #[serde(default = "default_essential_keys")]
    pub essential_keys: KeySet,
    /// Minimal auth/session subset that survives destructive cleanup
    #[serde(default = "default_auth_keys")]
    pub auth_keys: KeySet,

    /// Prefixes of disposable cache keys
    #[serde(default = "default_disposable_prefixes")]
    pub disposable_prefixes: Vec<String>,
    /// Disposable entries older than this are stale (default: 1 hour)
    #[serde(default = "default_cache_freshness_ms")]
    pub cache_freshness_ms: u64,

    /// Default duplicate-registry retention (default: 30 days)
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    #[serde(default)]
    pub expiry_policy: ExpiryPolicy,

    /// Reserved key holding the serialized duplicate registry
    #[serde(default = "default_registry_key")]
    pub registry_key: String,
    /// Prefix under which reconciled records are stored
    #[serde(default = "default_record_key_prefix")]
    pub record_key_prefix: String,
}

fn default_ceiling_bytes() -> u64 { 5 * 1024 * 1024 } // 5 MB
fn default_warn_threshold_pct() -> f64 { 80.0 }
fn default_critical_threshold_pct() -> f64 { 90.0 }
fn default_top_n() -> usize { 10 }
fn default_essential_keys() -> KeySet {
    KeySet(vec![
        KeyMatcher::Prefix("auth".into()),
        KeyMatcher::Prefix("session".into()),
        KeyMatcher::Contains("token".into()),
        KeyMatcher::Prefix("user-profile".into()),
        KeyMatcher::Prefix("settings".into()),
    ])
}
fn default_auth_keys() -> KeySet {
    KeySet(vec![
        KeyMatcher::Prefix("auth".into()),
        KeyMatcher::Prefix("session".into()),
    ])
}
fn default_disposable_prefixes() -> Vec<String> { vec!["cache:".into(), "tmp:".into()] }
fn default_cache_freshness_ms() -> u64 { 60 * 60 * 1000 } // 1 hour
fn default_retention_ms() -> u64 { 30 * 24 * 60 * 60 * 1000 } // 30 days
fn default_registry_key() -> String { "governor:duplicate-registry".into() }
fn default_record_key_prefix() -> String { "record:".into() }

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: default_ceiling_bytes(),
            warn_threshold_pct: default_warn_threshold_pct(),
            critical_threshold_pct: default_critical_threshold_pct(),
            top_n: default_top_n(),
            essential_keys: default_essential_keys(),
            auth_keys: default_auth_keys(),
            disposable_prefixes: default_disposable_prefixes(),
            cache_freshness_ms: default_cache_freshness_ms(),
            retention_ms: default_retention_ms(),
            expiry_policy: ExpiryPolicy::default(),
            registry_key: default_registry_key(),
            record_key_prefix: default_record_key_prefix(),
        }
    }
}

impl GovernorConfig {
    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GovernorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ceiling_bytes == 0 {
            return Err(GovernorError::InvalidConfig(
                "ceiling_bytes must be greater than zero".into(),
            ));
        }
        let pct_ok = |p: f64| p > 0.0 && p <= 100.0;
        if !pct_ok(self.warn_threshold_pct) || !pct_ok(self.critical_threshold_pct) {
            return Err(GovernorError::InvalidConfig(
                "thresholds must be within (0, 100]".into(),
            ));
        }
        if self.warn_threshold_pct > self.critical_threshold_pct {
            return Err(GovernorError::InvalidConfig(format!(
                "warn threshold {} exceeds critical threshold {}",
                self.warn_threshold_pct, self.critical_threshold_pct
            )));
        }
        if self.essential_keys.is_empty() {
            return Err(GovernorError::InvalidConfig("essential key set is empty".into()));
        }
        if self.auth_keys.is_empty() {
            return Err(GovernorError::InvalidConfig("auth key set is empty".into()));
        }
        if !self.essential_keys.covers(&self.auth_keys)
            || self.auth_keys.covers(&self.essential_keys)
        {
            return Err(GovernorError::InvalidConfig(
                "auth key set must be narrower than the essential key set".into(),
            ));
        }
        if self.registry_key.is_empty() || self.is_disposable(&self.registry_key) {
            return Err(GovernorError::InvalidConfig(format!(
                "registry key '{}' must be non-empty and not disposable",
                self.registry_key
            )));
        }
        if self.record_key_prefix.is_empty() {
            return Err(GovernorError::InvalidConfig("record key prefix is empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_disposable(&self, key: &str) -> bool {
        self.disposable_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    #[must_use]
    pub fn cache_freshness(&self) -> Duration {
        Duration::from_millis(self.cache_freshness_ms)
    }

    /// Store key for a reconciled record id.
    #[must_use]
    pub fn record_key(&self, record_id: &str) -> String {
        format!("{}{}", self.record_key_prefix, record_id)
    }
}
