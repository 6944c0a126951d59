//! # Storage Governor
//!
//! Keeps a bounded local key-value store usable under a hard capacity limit,
//! and guarantees that records a user removed as duplicates are not silently
//! re-introduced by the next sync pull.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Sync Reconciler                        │
//! │  • Pulls a batch from a SyncSource                          │
//! │  • Skips ids in the duplicate registry                      │
//! │  • Last-writer-wins upserts via guarded writes              │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────┐
//! │        Quota Monitor          │ │    Duplicate Registry     │
//! │  • Nominal/Approaching/       │ │  • id → cleaned_at,       │
//! │    Critical from usage        │ │    reason, expires_at     │
//! │  • One eviction + one retry   │ │  • One reserved key       │
//! └───────────────────────────────┘ └───────────────────────────┘
//!                 │
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Eviction Engine                          │
//! │  • Standard → Emergency → Destructive (confirmed only)      │
//! │  • Freed bytes reported through usage accounting            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Record Store                           │
//! │  • get / set / delete / keys over string values             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storage_governor::{GovernorConfig, InMemoryStore, StorageGovernor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GovernorConfig {
//!         ceiling_bytes: 5 * 1024 * 1024,
//!         ..Default::default()
//!     };
//!     let store = Arc::new(InMemoryStore::with_capacity_bytes(config.ceiling_bytes));
//!     let governor = StorageGovernor::with_system_clock(store, config).expect("valid config");
//!
//!     match governor.guarded_write("record:txn-1", r#"{"id":"txn-1","version":1}"#).await {
//!         Ok(_) => {}
//!         Err(e) if e.is_quota_exceeded() => eprintln!("cannot save, storage full"),
//!         Err(e) => eprintln!("write failed: {}", e),
//!     }
//!
//!     let report = governor.report().await.unwrap();
//!     println!("{:.1}% used", report.usage_percentage);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`governor`]: The [`StorageGovernor`] instance wiring every component
//! - [`usage`]: Byte accounting and usage reports
//! - [`quota`]: Threshold evaluation and guarded writes
//! - [`eviction`]: The three cleanup tiers
//! - [`registry`]: Duplicate registry with retention
//! - [`reconcile`]: Sync cycle state machine
//! - [`storage`]: Record store contract and in-memory backend

pub mod clock;
pub mod config;
pub mod error;
pub mod storage;
pub mod usage;
pub mod quota;
pub mod eviction;
pub mod registry;
pub mod reconcile;
pub mod governor;
pub mod metrics;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExpiryPolicy, GovernorConfig, KeyMatcher, KeySet};
pub use error::{GovernorError, Result};
pub use governor::StorageGovernor;
pub use storage::memory::InMemoryStore;
pub use storage::traits::{RecordStore, StorageError};
pub use usage::{StorageEntry, UsageAccounting, UsageReport};
pub use quota::{QuotaMonitor, QuotaState, WriteReport};
pub use eviction::{CacheEnvelope, EvictionEngine, EvictionOutcome, EvictionTier};
pub use registry::{DuplicateEntry, DuplicateReason, DuplicateRegistry, DuplicateTable, RegistryStats};
pub use reconcile::{CancelHandle, CycleReport, SourceError, SyncReconciler, SyncRecord, SyncSource, SyncState};
