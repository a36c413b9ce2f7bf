//! Full upload/download sessions between two stores.

use rowsync_codec::Value;
use rowsync_engine::{
    ApplyConflictArgs, CancellationToken, SessionResult, SyncError, SyncOptions, SyncResult,
    SyncSession,
};
use rowsync_protocol::{
    ApplyCounts, ConflictPolicy, ConflictResolution, RowState, ScopeId, ScopeInfo, SyncType,
};
use rowsync_storage::MemoryStore;
use rowsync_testkit::prelude::*;
use std::fs;
use std::sync::Arc;

struct Peers {
    client: MemoryStore,
    server: MemoryStore,
    client_scope: ScopeInfo,
    server_scope: ScopeInfo,
}

impl Peers {
    fn sync(&mut self, options: &SyncOptions) -> SyncResult<SessionResult> {
        let schema = shop_schema();
        SyncSession::new(&schema, options).synchronize(
            &mut self.client,
            &mut self.client_scope,
            &mut self.server,
            &self.server_scope,
            SyncType::Normal,
        )
    }
}

fn name_of(store: &MemoryStore, id: i64) -> Option<Value> {
    store
        .live_rows(&customers())
        .unwrap()
        .into_iter()
        .find(|row| row[0] == Value::Integer(id))
        .map(|row| row[1].clone())
}

/// A client that completed its first sync against a seeded server, after
/// which both sides edited customer 1 and the client deleted order 1000.
fn diverged(root: &TempBatchRoot) -> Peers {
    let options = SyncOptions::default().with_batch_root(root.path());
    let mut peers = Peers {
        client: scenarios::empty_store(),
        server: scenarios::seeded_store(2, 1),
        client_scope: ScopeInfo::new(ScopeId::from_u128(0xc), "client"),
        server_scope: ScopeInfo::new(ScopeId::from_u128(0x5), "server"),
    };

    let first = peers.sync(&options).unwrap();
    assert_eq!(first.uploaded.total(), 0);
    assert_eq!(first.downloaded.total(), 4);
    assert_eq!(first.client_applied.total_applied(), 4);
    assert!(!peers.client_scope.is_new());

    peers
        .client
        .update_local(&customers(), customer(1, "ClientEdit"))
        .unwrap();
    peers
        .client
        .delete_local(&orders(), &[Value::Integer(1000)])
        .unwrap();
    peers
        .server
        .update_local(&customers(), customer(1, "ServerEdit"))
        .unwrap();
    peers
}

#[test]
fn server_wins_converges_on_the_server_row() {
    let root = TempBatchRoot::new();
    let options = SyncOptions::default().with_batch_root(root.path());
    let mut peers = diverged(&root);

    let result = peers.sync(&options).unwrap();
    assert_eq!((result.uploaded.total_upserts(), result.uploaded.total_deletes()), (1, 1));
    assert_eq!(
        result.server_applied.get(&customers(), RowState::Upsert),
        Some(ApplyCounts::from_outcome(1, 0, 1, 0))
    );
    assert_eq!(
        result.server_applied.get(&orders(), RowState::Tombstone),
        Some(ApplyCounts::from_outcome(1, 1, 0, 0))
    );
    assert_eq!(result.downloaded.total(), 1);
    assert_eq!(result.client_applied.total_applied(), 1);

    for store in [&peers.client, &peers.server] {
        assert_eq!(name_of(store, 1), Some(Value::from("ServerEdit")));
        assert_eq!(store.live_rows(&orders()).unwrap().len(), 1);
    }
}

#[test]
fn client_wins_converges_on_the_client_row() {
    let root = TempBatchRoot::new();
    let options = SyncOptions::default()
        .with_batch_root(root.path())
        .with_conflict_policy(ConflictPolicy::ClientWins);
    let mut peers = diverged(&root);

    let result = peers.sync(&options).unwrap();
    assert_eq!(result.server_applied.total_resolved_conflicts(), 1);
    assert_eq!(result.server_applied.total_applied(), 2);
    // the forced row carries the client scope, so it is not echoed back
    assert_eq!(result.downloaded.total(), 0);

    for store in [&peers.client, &peers.server] {
        assert_eq!(name_of(store, 1), Some(Value::from("ClientEdit")));
    }
}

#[test]
fn converged_peers_exchange_nothing() {
    let root = TempBatchRoot::new();
    let options = SyncOptions::default().with_batch_root(root.path());
    let mut peers = diverged(&root);
    peers.sync(&options).unwrap();

    let again = peers.sync(&options).unwrap();
    assert_eq!(again.uploaded.total(), 0);
    assert_eq!(again.downloaded.total(), 0);
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn failed_session_keeps_the_scope() {
    let root = TempBatchRoot::new();
    let options = SyncOptions::default().with_batch_root(root.path());
    let mut peers = diverged(&root);
    let before = peers.client_scope.clone();

    let schema = shop_schema();
    let err = SyncSession::new(&schema, &options)
        .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
            args.resolution = ConflictResolution::Rollback;
        }))
        .synchronize(
            &mut peers.client,
            &mut peers.client_scope,
            &mut peers.server,
            &peers.server_scope,
            SyncType::Normal,
        )
        .unwrap_err();
    assert!(err.is_rollback());
    assert_eq!(peers.client_scope, before);
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);

    // the same changes are offered again
    let retry = peers.sync(&options).unwrap();
    assert_eq!(retry.uploaded.total(), 2);
}

#[test]
fn cancelled_session_leaves_no_batch_behind() {
    let root = TempBatchRoot::new();
    let options = SyncOptions::default().with_batch_root(root.path());
    let mut peers = diverged(&root);
    let before = peers.client_scope.clone();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let schema = shop_schema();
    let err = SyncSession::new(&schema, &options)
        .with_cancellation(cancel)
        .synchronize(
            &mut peers.client,
            &mut peers.client_scope,
            &mut peers.server,
            &peers.server_scope,
            SyncType::Normal,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(peers.client_scope, before);
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}
