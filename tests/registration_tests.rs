//! Integration tests for the registration protocol: atomicity, duplicate
//! rejection, lock handling and revert behaviour under injected faults.

mod common;

use std::sync::atomic::Ordering;

use common::{Fault, SalesDb};
use rollup_tables::agg::{ChildSchemaBuilder, PlanValidator};
use rollup_tables::catalog::MetadataStore;
use rollup_tables::lock::{LockProvider, TableLock};
use rollup_tables::{
    AggregateTableDescriptor, LockKind, MetadataRegistrar, RegistrationState, RollupConfig,
    RollupError,
};

fn descriptor(db: &SalesDb, name: &str) -> AggregateTableDescriptor {
    let config = RollupConfig::default();
    let validated = PlanValidator::new(&config)
        .validate(&db.region_sum_plan(), &db.catalog)
        .unwrap();
    ChildSchemaBuilder::new(&config).build(name, &validated).unwrap()
}

// ── Happy path ─────────────────────────────────────────────────────────────

#[test]
fn test_register_persists_and_refreshes() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);

    let report = registrar.register(&db.sales, descriptor(&db, "by_region")).unwrap();

    assert_eq!(report.final_state(), RegistrationState::LocksReleased);
    assert_eq!(db.child_names(), vec!["by_region"]);
    assert_eq!(db.catalog.cache_epoch(&db.sales), 1);
    assert_eq!(db.locks.held_count(), 0);

    let stored = db.catalog.get_metadata(&db.sales).unwrap();
    assert_eq!(stored.children[0], descriptor_from(&stored.children[0]));
}

/// The stored descriptor survives the JSON round-trip unchanged.
fn descriptor_from(d: &AggregateTableDescriptor) -> AggregateTableDescriptor {
    serde_json::from_str(&serde_json::to_string(d).unwrap()).unwrap()
}

#[test]
fn test_registration_order_preserved() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    for name in ["c", "a", "b"] {
        registrar.register(&db.sales, descriptor(&db, name)).unwrap();
    }
    assert_eq!(db.child_names(), vec!["c", "a", "b"]);
}

// ── Duplicates ─────────────────────────────────────────────────────────────

#[test]
fn test_duplicate_rejected_without_write() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    registrar.register(&db.sales, descriptor(&db, "agg")).unwrap();
    let puts_before = db.store.puts.load(Ordering::SeqCst);

    let err = registrar
        .register(&db.sales, descriptor(&db, "Agg"))
        .unwrap_err();

    assert!(matches!(err, RollupError::DuplicateDescriptor(_)));
    assert!(err.is_pre_mutation());
    assert_eq!(db.store.puts.load(Ordering::SeqCst), puts_before);
    assert_eq!(db.child_names(), vec!["agg"]);
    assert_eq!(db.locks.held_count(), 0);
}

#[test]
fn test_plain_rollup_on_rollup_table_rejected_under_lock() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    let parent = descriptor(&db, "by_region");
    registrar.register(&db.sales, parent.clone()).unwrap();
    let child_table = db.catalog.materialize_child(&parent).unwrap();
    let puts_before = db.store.puts.load(Ordering::SeqCst);

    let err = registrar
        .register(&child_table, descriptor(&db, "nested"))
        .unwrap_err();

    assert!(matches!(err, RollupError::MalformedSpecification(_)));
    assert!(err.to_string().contains("pre-aggregation on pre-aggregated table"));
    assert_eq!(db.store.puts.load(Ordering::SeqCst), puts_before);
    assert!(db.catalog.get_metadata(&child_table).unwrap().children.is_empty());
    assert_eq!(db.locks.held_count(), 0);
}

// ── Fault injection ────────────────────────────────────────────────────────

#[test]
fn test_failed_write_leaves_metadata_unchanged() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    registrar.register(&db.sales, descriptor(&db, "first")).unwrap();

    db.store.arm(Fault::Put);
    let err = registrar
        .register(&db.sales, descriptor(&db, "second"))
        .unwrap_err();

    assert!(matches!(err, RollupError::MetadataWrite(_)));
    assert!(err.is_retryable());
    assert_eq!(db.child_names(), vec!["first"]);
    assert_eq!(db.locks.held_count(), 0);
}

#[test]
fn test_failed_cache_refresh_reverts_append() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    registrar.register(&db.sales, descriptor(&db, "first")).unwrap();

    db.store.arm(Fault::Refresh);
    let err = registrar
        .register(&db.sales, descriptor(&db, "second"))
        .unwrap_err();

    assert_eq!(err.to_string(), "metadata write failed: injected cache refresh failure");
    assert_eq!(db.child_names(), vec!["first"]);
    assert_eq!(db.locks.held_count(), 0);
}

#[test]
fn test_failed_revert_read_still_returns_original_error() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);

    // The write lands, the cache refresh fails, and the revert cannot re-read.
    db.store.arm(Fault::RefreshThenReads);
    let err = registrar
        .register(&db.sales, descriptor(&db, "agg"))
        .unwrap_err();

    assert_eq!(err.to_string(), "metadata write failed: injected cache refresh failure");
    assert_eq!(db.locks.held_count(), 0);

    // Nothing could be reverted, so the appended child is still stored.
    db.store.arm(Fault::None);
    assert_eq!(db.child_names(), vec!["agg"]);
}

#[test]
fn test_read_failure_releases_locks() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    db.store.arm(Fault::GetAfter(0));

    let err = registrar
        .register(&db.sales, descriptor(&db, "agg"))
        .unwrap_err();

    assert_eq!(err.to_string(), "metadata write failed: injected read failure");
    assert_eq!(db.locks.held_count(), 0);
    db.store.arm(Fault::None);
    assert!(db.child_names().is_empty());
}

#[test]
fn test_unregister_reverts_on_refresh_failure() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    registrar.register(&db.sales, descriptor(&db, "a")).unwrap();
    registrar.register(&db.sales, descriptor(&db, "b")).unwrap();

    db.store.arm(Fault::Refresh);
    assert!(registrar.unregister(&db.sales, "a").is_err());
    assert_eq!(db.child_names(), vec!["a", "b"]);

    registrar.unregister(&db.sales, "a").unwrap();
    assert_eq!(db.child_names(), vec!["b"]);
}

// ── Locks ──────────────────────────────────────────────────────────────────

#[test]
fn test_concurrent_mutation_blocked_by_metadata_lock() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    let mut held = db.locks.acquire(&db.sales, LockKind::Metadata).unwrap();

    let err = registrar
        .register(&db.sales, descriptor(&db, "agg"))
        .unwrap_err();
    assert!(matches!(err, RollupError::LockAcquisition(_)));
    assert!(db.child_names().is_empty());

    assert!(held.release());
    registrar.register(&db.sales, descriptor(&db, "agg")).unwrap();
}

#[test]
fn test_drop_table_lock_held_unwinds_metadata_lock() {
    let db = SalesDb::new();
    let registrar = MetadataRegistrar::new(&db.store, &db.locks);
    let _held = db.locks.acquire(&db.sales, LockKind::DropTable).unwrap();

    assert!(registrar.register(&db.sales, descriptor(&db, "agg")).is_err());
    assert!(!db.locks.is_locked(&db.sales, LockKind::Metadata));
}
