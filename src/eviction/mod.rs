//! Tiered eviction for the bounded record store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Tiers                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Standard     - stale disposable caches, oldest first        │
//! │  └─ keeps: everything else, duplicate registry included      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Emergency    - every key outside the essential set          │
//! │  └─ duplicate registry is eligible (accuracy loss only)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Destructive  - every key outside the auth/session subset    │
//! │  └─ requires explicit confirmation, never automatic          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tier is idempotent: a second run with no intervening writes removes
//! nothing.

pub mod envelope;
pub mod tiers;

pub use envelope::CacheEnvelope;
pub use tiers::{EvictionEngine, EvictionOutcome, EvictionTier};
