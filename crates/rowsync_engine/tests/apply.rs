//! Change application, conflict resolution and write ordering.

mod common;

use common::{write_batch, write_batch_split};
use proptest::prelude::*;
use rowsync_codec::Value;
use rowsync_engine::{
    ApplyConflictArgs, ApplyRequest, CancellationToken, ChangeApplier, SyncError, SyncOptions,
};
use rowsync_protocol::{
    classify, ApplyCounts, ChangeRecord, ConflictCategory, ConflictPolicy, ConflictResolution,
    RowState, ScopeId, SyncSide, Timestamp,
};
use rowsync_storage::{MemoryStore, StoreError};
use rowsync_testkit::prelude::*;
use std::sync::Arc;

fn sender() -> ScopeId {
    ScopeId::from_u128(0xc1)
}

fn name_of(store: &MemoryStore, id: i64) -> Option<Value> {
    store
        .live_rows(&customers())
        .unwrap()
        .into_iter()
        .find(|row| row[0] == Value::Integer(id))
        .map(|row| row[1].clone())
}

/// A request whose watermark predates every local write, so every row
/// that exists locally conflicts.
fn stale(side: SyncSide) -> ApplyRequest {
    ApplyRequest::new(side, Timestamp::new(0)).with_sender_scope(sender())
}

#[test]
fn rows_apply_without_conflicts_when_watermark_is_current() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = scenarios::seeded_store(1, 0);
    let watermark = rowsync_storage::SyncStore::current_timestamp(&store).unwrap();

    let (directory, batch) = write_batch(
        root.path(),
        &schema,
        &[
            customer_change(1, "Ada"),
            customer_change(2, "Grace"),
            order_change(2000, 2, 12.5),
        ],
    );
    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Server, watermark).with_sender_scope(sender()),
        )
        .unwrap();

    assert_eq!(stats.total_applied(), 3);
    assert_eq!(stats.total_resolved_conflicts(), 0);
    assert_eq!(stats.total_failed(), 0);
    assert_eq!(name_of(&store, 1), Some(Value::from("Ada")));
    let tracking = store.tracking(&orders(), &[Value::Integer(2000)]).unwrap().unwrap();
    assert_eq!(tracking.update_scope, Some(sender()));
}

#[test]
fn deletes_run_children_first_and_upserts_parents_first() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let seeded = scenarios::seeded_store(2, 1);
    let watermark = rowsync_storage::SyncStore::current_timestamp(&seeded).unwrap();
    let mut store = RecordingStore::new(seeded);

    // customer 2 can only go once its order is gone; order 3000 can only
    // arrive once customer 3 exists
    let (directory, batch) = write_batch(
        root.path(),
        &schema,
        &[
            customer_tombstone(2),
            customer_change(3, "Barbara"),
            order_tombstone(2000),
            order_change(3000, 3, 99.0),
        ],
    );
    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Server, watermark),
        )
        .unwrap();
    assert_eq!(stats.total_applied(), 4);
    assert_eq!(stats.total_failed(), 0);

    let order_delete = store.last_index(&orders(), StoreOp::Delete).unwrap();
    let customer_delete = store.first_index(&customers(), StoreOp::Delete).unwrap();
    let customer_upsert = store.last_index(&customers(), StoreOp::Upsert).unwrap();
    let order_upsert = store.first_index(&orders(), StoreOp::Upsert).unwrap();
    assert!(order_delete < customer_delete);
    assert!(customer_delete < customer_upsert);
    assert!(customer_upsert < order_upsert);
}

#[test]
fn new_database_skips_the_delete_phase() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::empty_store());

    let (directory, batch) = write_batch(
        root.path(),
        &schema,
        &[customer_change(1, "Ada"), customer_tombstone(2)],
    );
    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Client, Timestamp::new(0)).with_new_database(true),
        )
        .unwrap();

    assert!(store.tables_for(StoreOp::Delete).is_empty());
    assert_eq!(stats.get(&customers(), RowState::Tombstone), None);
    assert_eq!(stats.total_applied(), 1);
}

#[test]
fn client_wins_forces_the_remote_row() {
    let schema = shop_schema();
    let options = SyncOptions::default().with_conflict_policy(ConflictPolicy::ClientWins);
    let root = TempBatchRoot::new();
    let mut store = scenarios::seeded_store(1, 0);

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Remote")]);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap();

    assert_eq!(
        stats.get(&customers(), RowState::Upsert),
        Some(ApplyCounts {
            applied: 1,
            resolved_conflicts: 1,
            failed: 0
        })
    );
    assert_eq!(name_of(&store, 1), Some(Value::from("Remote")));
}

#[test]
fn server_wins_keeps_the_local_row() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = scenarios::seeded_store(1, 0);
    let before = store.tracking(&customers(), &[Value::Integer(1)]).unwrap();

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Remote")]);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap();

    assert_eq!(
        stats.get(&customers(), RowState::Upsert),
        Some(ApplyCounts {
            applied: 0,
            resolved_conflicts: 1,
            failed: 0
        })
    );
    assert_eq!(name_of(&store, 1), Some(Value::from("Customer1")));
    assert_eq!(store.tracking(&customers(), &[Value::Integer(1)]).unwrap(), before);
}

/// Local: customers 1 and 2 live, 3 and 4 deleted. Remote: every state
/// combination against them.
fn every_category() -> (MemoryStore, Vec<ChangeRecord>) {
    let mut store = scenarios::seeded_store(4, 0);
    store.delete_local(&customers(), &[Value::Integer(3)]).unwrap();
    store.delete_local(&customers(), &[Value::Integer(4)]).unwrap();
    let rows = vec![
        customer_change(1, "Remote1"),
        customer_change(3, "Remote3"),
        customer_change(5, "Remote5"),
        customer_tombstone(2),
        customer_tombstone(4),
        customer_tombstone(9),
    ];
    (store, rows)
}

#[test]
fn server_wins_never_writes_on_the_server() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let (mut store, rows) = every_category();
    let before = store.live_rows(&customers()).unwrap();

    let (directory, batch) = write_batch(root.path(), &schema, &rows);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap();

    // customer 5 is new, so it is written without a conflict
    let upserts = stats.get(&customers(), RowState::Upsert).unwrap();
    assert_eq!(upserts, ApplyCounts::from_outcome(3, 1, 2, 0));
    let deletes = stats.get(&customers(), RowState::Tombstone).unwrap();
    assert_eq!(deletes, ApplyCounts::from_outcome(3, 0, 3, 0));

    let mut after = store.live_rows(&customers()).unwrap();
    after.retain(|row| row[0] != Value::Integer(5));
    assert_eq!(after, before);
}

#[test]
fn server_wins_on_the_client_forces_every_category() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let (store, rows) = every_category();
    let mut store = RecordingStore::new(store);

    let (directory, batch) = write_batch(root.path(), &schema, &rows);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Client))
        .unwrap();

    // 1 and 3 are force-upserted, 5 is a plain insert
    let upserts = stats.get(&customers(), RowState::Upsert).unwrap();
    assert_eq!(upserts, ApplyCounts::from_outcome(3, 1, 2, 2));
    // 2 is force-deleted, 4 gets its metadata reassigned, 9 is a no-op
    let deletes = stats.get(&customers(), RowState::Tombstone).unwrap();
    assert_eq!(deletes, ApplyCounts::from_outcome(3, 0, 3, 1));

    let local = store.inner();
    assert_eq!(name_of(local, 1), Some(Value::from("Remote1")));
    assert_eq!(name_of(local, 3), Some(Value::from("Remote3")));
    assert_eq!(name_of(local, 2), None);
    let four = local.tracking(&customers(), &[Value::Integer(4)]).unwrap().unwrap();
    assert!(four.tombstone);
    assert_eq!(four.update_scope, Some(sender()));
    assert_eq!(local.tracking(&customers(), &[Value::Integer(9)]).unwrap(), None);

    let metadata: Vec<_> = store
        .calls()
        .into_iter()
        .filter(|c| c.op == StoreOp::Metadata)
        .collect();
    assert_eq!(metadata.len(), 1);
    assert!(metadata[0].forced);
}

#[test]
fn merge_row_is_written_as_a_local_change() {
    for policy in [ConflictPolicy::ServerWins, ConflictPolicy::ClientWins] {
        let schema = shop_schema();
        let options = SyncOptions::default().with_conflict_policy(policy);
        let root = TempBatchRoot::new();
        let mut store = scenarios::seeded_store(1, 0);

        let (directory, batch) =
            write_batch(root.path(), &schema, &[customer_change(1, "Remote")]);
        let stats = ChangeApplier::new(&schema, &options)
            .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
                assert_eq!(args.conflict.category, ConflictCategory::RemoteExistsLocalExists);
                args.resolution = ConflictResolution::MergeRow;
                args.final_row = Some(customer_change(1, "Merged"));
            }))
            .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
            .unwrap();

        assert_eq!(stats.total_applied(), 1);
        assert_eq!(stats.total_resolved_conflicts(), 1);
        assert_eq!(name_of(&store, 1), Some(Value::from("Merged")));
        let tracking = store.tracking(&customers(), &[Value::Integer(1)]).unwrap().unwrap();
        assert_eq!(tracking.update_scope, None);
    }
}

#[test]
fn rollback_stops_before_later_tables() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::seeded_store(1, 0));

    let (directory, batch) = write_batch(
        root.path(),
        &schema,
        &[customer_change(1, "Remote"), order_change(1000, 1, 5.0)],
    );
    let err = ChangeApplier::new(&schema, &options)
        .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
            args.resolution = ConflictResolution::Rollback;
        }))
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap_err();

    assert!(err.is_rollback());
    let signal = err.rollback_signal().unwrap();
    assert_eq!(signal.table, customers());
    assert!(store.tables_for(StoreOp::Upsert).iter().all(|t| *t == customers()));
    assert_eq!(store.inner().row_count(&orders()).unwrap(), 0);
}

#[test]
fn forced_write_that_affects_nothing_is_fatal() {
    let schema = shop_schema();
    let options = SyncOptions::default().with_conflict_policy(ConflictPolicy::ClientWins);
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::seeded_store(1, 0)).with_faults(Faults {
        forced_writes_affect_nothing: true,
        ..Faults::default()
    });

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Remote")]);
    let err = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, SyncError::FatalForceWrite { operation: "upsert", .. }));
}

#[test]
fn forced_delete_falls_back_to_metadata() {
    let schema = shop_schema();
    let options = SyncOptions::default().with_conflict_policy(ConflictPolicy::ClientWins);
    let root = TempBatchRoot::new();
    let faults = Faults {
        forced_writes_affect_nothing: true,
        ..Faults::default()
    };

    let mut store = RecordingStore::new(scenarios::seeded_store(1, 0)).with_faults(faults);
    let (directory, batch) = write_batch(root.path(), &schema, &[customer_tombstone(1)]);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap();
    assert_eq!(
        stats.get(&customers(), RowState::Tombstone),
        Some(ApplyCounts::from_outcome(1, 0, 1, 0))
    );

    let mut store = RecordingStore::new(scenarios::seeded_store(1, 0)).with_faults(Faults {
        metadata_updates_fail: true,
        ..faults
    });
    let err = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap_err();
    assert!(matches!(err, SyncError::FatalForceWrite { operation: "delete", .. }));
}

#[test]
fn unreadable_conflicts_are_counted_as_failed() {
    let schema = shop_schema();
    let options = SyncOptions::default().with_conflict_policy(ConflictPolicy::ClientWins);
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::seeded_store(1, 0)).with_faults(Faults {
        lookups_fail: true,
        ..Faults::default()
    });

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Remote")]);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap();

    assert_eq!(stats.total_failed(), 1);
    assert_eq!(stats.total_applied(), 0);
    assert_eq!(name_of(store.inner(), 1), Some(Value::from("Customer1")));
}

#[test]
fn unique_key_conflicts_are_resolved_by_policy() {
    let schema = shop_schema();
    let root = TempBatchRoot::new();
    // customer 2 arrives with customer 1's email
    let mut clash = customer_change(2, "Other");
    clash.values[2] = Value::from("customer1@example.com");
    let (directory, batch) = write_batch(root.path(), &schema, &[clash]);

    let options = SyncOptions::default();
    let mut store = scenarios::seeded_store(1, 0);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let stats = ChangeApplier::new(&schema, &options)
        .with_conflict_handler(Arc::new(move |args: &mut ApplyConflictArgs<'_>| {
            recorded.lock().push(args.conflict.category);
        }))
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap();
    assert_eq!(*seen.lock(), vec![ConflictCategory::UniqueKeyConstraint]);
    assert_eq!(stats.total_resolved_conflicts(), 1);
    assert_eq!(store.row_count(&customers()).unwrap(), 1);

    // forcing still breaks the index, which is a store failure
    let options = SyncOptions::default().with_conflict_policy(ConflictPolicy::ClientWins);
    let mut store = scenarios::seeded_store(1, 0);
    let err = ChangeApplier::new(&schema, &options)
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Store(StoreError::UniqueConstraint { .. })
    ));
}

#[test]
fn stats_merge_across_parts() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = scenarios::seeded_store(1, 0);
    let watermark = rowsync_storage::SyncStore::current_timestamp(&store).unwrap();

    let rows: Vec<_> = (0..7).map(|n| order_change(1000 + n, 1, n as f64)).collect();
    let (directory, batch) = write_batch_split(root.path(), &schema, &rows, 3);
    assert_eq!(batch.parts_for(&orders()).count(), 3);

    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Server, watermark),
        )
        .unwrap();
    assert_eq!(stats.tables.len(), 1);
    assert_eq!(stats.for_table(&orders()).applied, 7);
}

#[test]
fn bulk_and_single_writes_agree() {
    let schema = shop_schema();
    let root = TempBatchRoot::new();
    let (_, rows) = every_category();
    let (directory, batch) = write_batch(root.path(), &schema, &rows);

    let mut results = Vec::new();
    for bulk in [false, true] {
        let options = SyncOptions::default().with_bulk_operations(bulk);
        let (store, _) = every_category();
        let mut store = store.with_bulk_operations(true);
        let stats = ChangeApplier::new(&schema, &options)
            .apply(&mut store, &batch, &directory, stale(SyncSide::Client))
            .unwrap();
        results.push((stats, store.live_rows(&customers()).unwrap()));
    }
    assert_eq!(results[0], results[1]);
}

#[test]
fn constraints_are_suspended_and_restored() {
    let schema = shop_schema();
    let options = SyncOptions::default().with_disable_constraints_on_apply(true);
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::empty_store());

    // the order arrives for a customer that is not part of the batch
    let (directory, batch) = write_batch(root.path(), &schema, &[order_change(7000, 7, 1.0)]);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Client, Timestamp::new(0)),
        )
        .unwrap();
    assert_eq!(stats.total_applied(), 1);

    assert_eq!(
        store.tables_for(StoreOp::DisableConstraints),
        vec![orders(), customers()]
    );
    assert_eq!(
        store.tables_for(StoreOp::EnableConstraints),
        vec![customers(), orders()]
    );
}

#[test]
fn constraints_are_restored_after_a_failure() {
    let schema = shop_schema();
    let options = SyncOptions::default().with_disable_constraints_on_apply(true);
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::seeded_store(1, 0));

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Remote")]);
    let err = ChangeApplier::new(&schema, &options)
        .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
            args.resolution = ConflictResolution::Rollback;
        }))
        .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
        .unwrap_err();

    assert!(err.is_rollback());
    assert_eq!(store.tables_for(StoreOp::EnableConstraints).len(), 2);
}

#[test]
fn cancelled_apply_writes_nothing() {
    let schema = shop_schema();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = RecordingStore::new(scenarios::empty_store());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Ada")]);
    let err = ChangeApplier::new(&schema, &options)
        .with_cancellation(cancel)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Client, Timestamp::new(0)),
        )
        .unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert!(store.calls().is_empty());
}

#[test]
fn upload_only_tables_are_not_applied_on_the_client() {
    use rowsync_protocol::{SyncDirection, SyncSchema};

    let schema = SyncSchema::new(vec![
        customers_table().with_direction(SyncDirection::UploadOnly),
        orders_table(),
    ])
    .unwrap();
    let options = SyncOptions::default();
    let root = TempBatchRoot::new();
    let mut store = MemoryStore::new(schema.clone());

    let (directory, batch) = write_batch(root.path(), &schema, &[customer_change(1, "Ada")]);
    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Client, Timestamp::new(0)),
        )
        .unwrap();
    assert!(stats.tables.is_empty());
    assert_eq!(store.row_count(&customers()).unwrap(), 0);

    let stats = ChangeApplier::new(&schema, &options)
        .apply(
            &mut store,
            &batch,
            &directory,
            ApplyRequest::new(SyncSide::Server, Timestamp::new(0)),
        )
        .unwrap();
    assert_eq!(stats.total_applied(), 1);
}

proptest! {
    #[test]
    fn classification_is_total((remote, local) in conflict_input_strategy()) {
        let category = classify(&remote, local.as_ref());
        prop_assert_ne!(category, ConflictCategory::ErrorsOccurred);
        prop_assert_ne!(category, ConflictCategory::UniqueKeyConstraint);
        prop_assert_eq!(
            category.is_remote_deleted(),
            remote.state == RowState::Tombstone
        );
    }

    #[test]
    fn every_row_is_accounted_for(rows in mixed_order_rows_strategy(24)) {
        let schema = shop_schema();
        let options = SyncOptions::default();
        let root = TempBatchRoot::new();
        let mut store = scenarios::seeded_store(1, 0);
        let (directory, batch) = write_batch_split(root.path(), &schema, &rows, 5);

        let stats = ChangeApplier::new(&schema, &options)
            .apply(&mut store, &batch, &directory, stale(SyncSide::Server))
            .unwrap();

        let totals = stats.totals();
        prop_assert_eq!(
            totals.applied + totals.failed,
            rows.len() as u64 - totals.resolved_conflicts
        );
    }
}
