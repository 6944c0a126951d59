//! Property-based tests for governor invariants.
//!
//! Uses proptest to generate random store contents, batches and timings and
//! checks accounting, survival, idempotence, conservation and expiry.
//!
//! Run with: `cargo test --test proptest_invariants`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};

use storage_governor::{
    DuplicateReason, DuplicateTable, EvictionTier, GovernorConfig, InMemoryStore, ManualClock,
    RecordStore, SourceError, StorageGovernor, SyncSource,
};

// =============================================================================
// Strategies and helpers
// =============================================================================

/// Keys spread across essential, auth, disposable, registry and plain namespaces.
fn key_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![
            Just("auth:"),
            Just("session:"),
            Just("settings:"),
            Just("cache:"),
            Just("tmp:"),
            Just("record:"),
            Just("misc-token-"),
            Just("x:"),
        ],
        "[a-z0-9]{1,6}",
    )
        .prop_map(|(prefix, suffix)| format!("{}{}", prefix, suffix))
}

fn store_contents() -> impl Strategy<Value = Vec<(String, usize)>> {
    prop::collection::vec((key_strategy(), 0usize..300), 0..40)
}

fn tier_strategy() -> impl Strategy<Value = EvictionTier> {
    prop_oneof![
        Just(EvictionTier::Standard),
        Just(EvictionTier::Emergency),
        Just(EvictionTier::Destructive),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct StaticSource(Vec<Value>);

#[async_trait]
impl SyncSource for StaticSource {
    async fn next_batch(&self) -> Result<Vec<Value>, SourceError> {
        Ok(self.0.clone())
    }
}

fn setup() -> (Arc<InMemoryStore>, StorageGovernor) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(1_000_000_000));
    let governor = StorageGovernor::new(store.clone(), GovernorConfig::default(), clock).unwrap();
    (store, governor)
}

// =============================================================================
// Eviction
// =============================================================================

proptest! {
    /// freed_bytes equals the pre-removal size of the removed keys, and the
    /// protected set of each tier survives.
    #[test]
    fn eviction_accounting_and_survival(contents in store_contents(), tier in tier_strategy()) {
        runtime().block_on(async {
            let (store, governor) = setup();
            for (key, size) in &contents {
                store.set(key, &"v".repeat(*size)).await.unwrap();
            }
            let mut sizes = std::collections::HashMap::new();
            for key in store.keys().await.unwrap() {
                let size = store.get(&key).await.unwrap().map_or(0, |v| v.len() as u64);
                sizes.insert(key, size);
            }

            let outcome = governor.run_tier(tier, true).await.unwrap();

            let expected: u64 = outcome.removed_keys.iter().map(|k| sizes[k]).sum();
            prop_assert_eq!(outcome.freed_bytes, expected);

            let config = governor.config();
            for key in store.keys().await.unwrap() {
                prop_assert!(!outcome.removed_keys.contains(&key));
            }
            for key in &outcome.removed_keys {
                match tier {
                    EvictionTier::Standard | EvictionTier::Emergency => {
                        prop_assert!(!config.essential_keys.matches(key), "essential key {} removed", key);
                    }
                    EvictionTier::Destructive => {
                        prop_assert!(!config.auth_keys.matches(key), "auth key {} removed", key);
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Running the same tier twice without writes removes nothing the second time.
    #[test]
    fn eviction_is_idempotent(contents in store_contents(), tier in tier_strategy()) {
        runtime().block_on(async {
            let (store, governor) = setup();
            for (key, size) in &contents {
                store.set(key, &"v".repeat(*size)).await.unwrap();
            }

            governor.run_tier(tier, true).await.unwrap();
            let second = governor.run_tier(tier, true).await.unwrap();
            prop_assert!(second.removed_keys.is_empty());
            prop_assert_eq!(second.freed_bytes, 0);
            Ok(())
        })?;
    }
}

// =============================================================================
// Duplicate registry
// =============================================================================

proptest! {
    /// An id marked at t with retention d is live over [t, t+d] and gone after
    /// t+d once purged.
    #[test]
    fn registry_expiry_window(
        t in 0i64..1_000_000_000,
        d in 0u64..10_000_000,
        probe in 0u64..10_000_000,
    ) {
        let mut table = DuplicateTable::new();
        table.mark_cleaned("txn", DuplicateReason::UserMerge, Duration::from_millis(d), t);

        let inside = t + (probe % (d + 1)) as i64;
        prop_assert!(table.is_recently_cleaned("txn", inside));

        let after = t + d as i64 + 1 + probe as i64;
        prop_assert!(!table.is_recently_cleaned("txn", after));
        prop_assert_eq!(table.purge_expired(after), 1);
        prop_assert!(table.get("txn").is_none());
    }
}

// =============================================================================
// Reconciler
// =============================================================================

fn batch_strategy() -> impl Strategy<Value = Vec<Value>> {
    let well_formed = ("[a-e]", 0u64..5).prop_map(|(id, version)| {
        json!({"id": format!("txn-{}", id), "version": version, "payload": {"v": version}})
    });
    let malformed = prop_oneof![
        Just(json!(null)),
        Just(json!({"id": "txn-a"})),
        Just(json!({"version": 3})),
        Just(json!({"id": "", "version": 1})),
    ];
    prop::collection::vec(
        prop_oneof![8 => well_formed, 1 => malformed],
        0..30,
    )
}

proptest! {
    /// applied + skipped + quarantined == batch_size for every cycle that reaches Done.
    #[test]
    fn reconciler_conservation(
        batch in batch_strategy(),
        cleaned in prop::collection::vec("[a-e]", 0..4),
    ) {
        runtime().block_on(async {
            let (_store, governor) = setup();
            let ids: Vec<String> = cleaned.iter().map(|c| format!("txn-{}", c)).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            governor.mark_cleaned_many(&refs, DuplicateReason::AutoDetect).await.unwrap();

            let report = governor.sync_cycle(&StaticSource(batch.clone())).await.unwrap();

            prop_assert!(report.is_done());
            prop_assert_eq!(report.batch_size, batch.len());
            prop_assert!(report.is_conserved());
            prop_assert_eq!(report.applied, report.written + report.superseded);
            for id in &ids {
                let key = format!("record:{}", id);
                prop_assert!(governor.get(&key).await.unwrap().is_none());
            }
            Ok(())
        })?;
    }
}
