//! Conflict-aware change application.
//!
//! The applier replays a batch against a local store in two phases:
//! deletes with children before parents, then upserts with parents before
//! children. Every write is conditional on the watermark. Rows the store
//! rejects become conflicts, which are classified and resolved right after
//! the writes of the part they came from.

use crate::batch::{BatchDirectory, CborRowCodec, RowCodec};
use crate::cancel::CancellationToken;
use crate::config::SyncOptions;
use crate::error::{RollbackSignal, SyncError, SyncResult};
use crate::resolver::{ConflictHandler, ConflictResolver, Resolution};
use rowsync_protocol::{
    ApplyCounts, BatchInfo, BatchPartInfo, ChangeRecord, ConflictAction, ConflictCategory,
    ConflictRecord, DatabaseChangesApplied, RowState, ScopeId, SyncSchema, SyncSide,
    TableDescriptor, Timestamp, WriteFailure,
};
use rowsync_storage::{StoreError, StoreResult, SyncStore};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Parameters of one apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyRequest {
    /// Side running the apply.
    pub side: SyncSide,
    /// No local write newer than this was visible to the sender.
    pub watermark: Timestamp,
    /// Scope that produced the batch; stamped on written rows.
    pub sender_scope: Option<ScopeId>,
    /// The target holds no data yet, so the delete phase is skipped.
    pub is_new_database: bool,
}

impl ApplyRequest {
    /// Creates a request for `side` at `watermark`.
    #[must_use]
    pub fn new(side: SyncSide, watermark: Timestamp) -> Self {
        Self {
            side,
            watermark,
            sender_scope: None,
            is_new_database: false,
        }
    }

    /// Sets the sending scope.
    #[must_use]
    pub fn with_sender_scope(mut self, scope: ScopeId) -> Self {
        self.sender_scope = Some(scope);
        self
    }

    /// Marks the target as a new, empty database.
    #[must_use]
    pub fn with_new_database(mut self, is_new: bool) -> Self {
        self.is_new_database = is_new;
        self
    }
}

/// Applies batches to a local store.
pub struct ChangeApplier<'a> {
    schema: &'a SyncSchema,
    options: &'a SyncOptions,
    codec: Arc<dyn RowCodec>,
    handler: Option<Arc<dyn ConflictHandler>>,
    cancel: CancellationToken,
}

impl fmt::Debug for ChangeApplier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeApplier")
            .field("tables", &self.schema.len())
            .field("options", self.options)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// How one conflict ended.
#[derive(Debug, Clone, Copy, Default)]
struct Outcome {
    resolved: bool,
    applied: bool,
}

impl Outcome {
    const UNRESOLVED: Self = Self {
        resolved: false,
        applied: false,
    };
    const KEPT: Self = Self {
        resolved: true,
        applied: false,
    };
    const WRITTEN: Self = Self {
        resolved: true,
        applied: true,
    };
}

/// Everything a part apply needs besides the store.
struct PartContext<'c> {
    part: &'c BatchPartInfo,
    layout: &'c TableDescriptor,
    directory: &'c BatchDirectory,
    request: &'c ApplyRequest,
    resolver: &'c ConflictResolver,
}

impl<'a> ChangeApplier<'a> {
    /// Creates an applier for the local `schema`.
    #[must_use]
    pub fn new(schema: &'a SyncSchema, options: &'a SyncOptions) -> Self {
        Self {
            schema,
            options,
            codec: Arc::new(CborRowCodec::new()),
            handler: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the part codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn RowCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Installs a handler consulted for every conflict.
    #[must_use]
    pub fn with_conflict_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Observes `cancel` before every table and part.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Applies `batch`, whose part files live in `directory`.
    ///
    /// Constraints disabled for the apply are re-enabled whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Rollback`] if a conflict handler chose rollback
    /// - [`SyncError::FatalForceWrite`] if a forced write affected no rows
    /// - [`SyncError::MergeFailed`] if a merged row could not be written
    /// - [`SyncError::SchemaMismatch`] if the batch does not fit the local schema
    /// - store, codec and I/O errors as they happen
    pub fn apply<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        batch: &BatchInfo,
        directory: &BatchDirectory,
        request: ApplyRequest,
    ) -> SyncResult<DatabaseChangesApplied> {
        self.check_schema(batch)?;

        let mut resolver = ConflictResolver::new(self.options.conflict_policy, request.side);
        if let Some(handler) = &self.handler {
            resolver = resolver.with_handler(Arc::clone(handler));
        }

        let disable = self.options.disable_constraints_on_apply;
        if disable {
            for table in self.schema.children_first() {
                store.disable_constraints(table)?;
            }
        }

        let result = self.apply_phases(store, batch, directory, &request, &resolver);

        if disable {
            let enabled = self
                .schema
                .parents_first()
                .try_for_each(|table| store.enable_constraints(table));
            if let Err(e) = enabled {
                warn!(error = %e, "failed to re-enable constraints");
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }

        let stats = result?;
        info!(
            batch = %batch.batch_id,
            applied = stats.total_applied(),
            resolved = stats.total_resolved_conflicts(),
            failed = stats.total_failed(),
            "applied changes"
        );
        Ok(stats)
    }

    /// Rejects batches whose tables or columns are unknown locally.
    fn check_schema(&self, batch: &BatchInfo) -> SyncResult<()> {
        for part in batch.parts() {
            let local = self
                .schema
                .table(&part.table)
                .ok_or_else(|| SyncError::schema_mismatch(&part.table, "table is not provisioned"))?;
            let remote = batch.schema.table(&part.table).ok_or_else(|| {
                SyncError::schema_mismatch(&part.table, "table is missing from the batch schema")
            })?;
            if let Some(column) = remote
                .columns
                .iter()
                .find(|c| local.column_index(&c.name).is_none())
            {
                return Err(SyncError::schema_mismatch(
                    &part.table,
                    format!("unknown column `{}`", column.name),
                ));
            }
            if remote.primary_key != local.primary_key {
                return Err(SyncError::schema_mismatch(
                    &part.table,
                    "primary key differs from the local table",
                ));
            }
        }
        Ok(())
    }

    fn apply_phases<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        batch: &BatchInfo,
        directory: &BatchDirectory,
        request: &ApplyRequest,
        resolver: &ConflictResolver,
    ) -> SyncResult<DatabaseChangesApplied> {
        let mut stats = DatabaseChangesApplied::default();

        if request.is_new_database {
            debug!("new database: skipping delete phase");
        } else {
            for table in self.schema.children_first() {
                self.apply_table(
                    store,
                    table,
                    RowState::Tombstone,
                    batch,
                    directory,
                    request,
                    resolver,
                    &mut stats,
                )?;
            }
        }

        for table in self.schema.parents_first() {
            self.apply_table(
                store,
                table,
                RowState::Upsert,
                batch,
                directory,
                request,
                resolver,
                &mut stats,
            )?;
        }

        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_table<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        table: &TableDescriptor,
        state: RowState,
        batch: &BatchInfo,
        directory: &BatchDirectory,
        request: &ApplyRequest,
        resolver: &ConflictResolver,
        stats: &mut DatabaseChangesApplied,
    ) -> SyncResult<()> {
        self.cancel.check()?;
        if !table.direction.is_applied_by(request.side) {
            trace!(table = %table.name, "table not applied on this side");
            return Ok(());
        }
        let Some(layout) = batch.schema.table(&table.name) else {
            return Ok(());
        };

        for part in batch.parts_for(&table.name) {
            self.cancel.check()?;
            let ctx = PartContext {
                part,
                layout,
                directory,
                request,
                resolver,
            };
            if let Some(counts) = self.apply_part(store, &ctx, state)? {
                stats.record(&table.name, state, counts);
            }
        }
        Ok(())
    }

    /// Writes the rows of one part in `state`, then resolves the conflicts
    /// they raised. Returns `None` if the part holds no such rows.
    fn apply_part<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &PartContext<'_>,
        state: RowState,
    ) -> SyncResult<Option<ApplyCounts>> {
        let path = ctx.directory.part_path(ctx.part);
        let rows = self
            .codec
            .open_reader(&path, ctx.layout)?
            .filter(|row| !matches!(row, Ok(row) if row.state != state));

        let (considered, failures) =
            if self.options.use_bulk_operations && store.supports_bulk_operations() {
                let rows = rows.collect::<SyncResult<Vec<_>>>()?;
                let failures = self.write_bulk(store, ctx, state, &rows)?;
                (rows.len() as u64, failures)
            } else {
                self.write_each(store, ctx, state, rows)?
            };

        if considered == 0 {
            trace!(table = %ctx.part.table, index = ctx.part.index, ?state, "no rows in part");
            return Ok(None);
        }

        let applied_by_write = considered - failures.len() as u64;
        let mut resolved = 0;
        let mut applied_by_resolution = 0;
        for (remote, failure) in failures {
            let conflict = self.conflict_for(store, ctx, remote, failure);
            let outcome = self.resolve(store, ctx, &conflict)?;
            resolved += u64::from(outcome.resolved);
            applied_by_resolution += u64::from(outcome.applied);
        }

        let counts =
            ApplyCounts::from_outcome(considered, applied_by_write, resolved, applied_by_resolution);
        debug!(
            table = %ctx.part.table,
            index = ctx.part.index,
            ?state,
            considered,
            applied = counts.applied,
            resolved = counts.resolved_conflicts,
            failed = counts.failed,
            "applied part"
        );
        Ok(Some(counts))
    }

    fn write_each<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &PartContext<'_>,
        state: RowState,
        rows: impl Iterator<Item = SyncResult<ChangeRecord>>,
    ) -> SyncResult<(u64, Vec<(ChangeRecord, WriteFailure)>)> {
        let mut considered = 0;
        let mut failures = Vec::new();
        for row in rows {
            let row = row?;
            considered += 1;
            let written = match state {
                RowState::Upsert => store.write_upsert(
                    ctx.layout,
                    &row,
                    ctx.request.watermark,
                    ctx.request.sender_scope,
                    false,
                ),
                RowState::Tombstone => store.write_delete(
                    ctx.layout,
                    &row,
                    ctx.request.watermark,
                    ctx.request.sender_scope,
                    false,
                ),
            };
            if let Some(failure) = write_failure(written)? {
                failures.push((row, failure));
            }
        }
        Ok((considered, failures))
    }

    fn write_bulk<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &PartContext<'_>,
        state: RowState,
        rows: &[ChangeRecord],
    ) -> SyncResult<Vec<(ChangeRecord, WriteFailure)>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let failed = match state {
            RowState::Upsert => store.bulk_upsert(
                ctx.layout,
                rows,
                ctx.request.watermark,
                ctx.request.sender_scope,
            )?,
            RowState::Tombstone => store.bulk_delete(
                ctx.layout,
                rows,
                ctx.request.watermark,
                ctx.request.sender_scope,
            )?,
        };
        failed
            .into_iter()
            .map(|f| {
                rows.get(f.index)
                    .map(|row| (row.clone(), f.reason))
                    .ok_or_else(|| {
                        SyncError::Store(StoreError::Unavailable(format!(
                            "bulk write reported row {} of {}",
                            f.index,
                            rows.len()
                        )))
                    })
            })
            .collect()
    }

    /// Reads the stored row back and classifies the conflict.
    fn conflict_for<S: SyncStore + ?Sized>(
        &self,
        store: &S,
        ctx: &PartContext<'_>,
        remote: ChangeRecord,
        failure: WriteFailure,
    ) -> ConflictRecord {
        match store.get_row(ctx.layout, &remote.key(ctx.layout)) {
            Ok(local) => ConflictRecord::new(failure, remote, local),
            Err(e) => {
                warn!(table = %ctx.part.table, error = %e, "cannot read conflicting row");
                ConflictRecord::new(WriteFailure::LookupFailed, remote, None)
            }
        }
    }

    fn resolve<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &PartContext<'_>,
        conflict: &ConflictRecord,
    ) -> SyncResult<Outcome> {
        let Resolution { action, final_row } = ctx.resolver.resolve(conflict);
        debug!(
            table = %ctx.part.table,
            category = %conflict.category,
            ?action,
            merged = final_row.is_some(),
            "conflict"
        );

        let outcome = match (action, final_row) {
            (ConflictAction::Rollback, _) => {
                return Err(SyncError::Rollback(RollbackSignal {
                    table: ctx.part.table.clone(),
                    category: conflict.category,
                }));
            }
            (ConflictAction::MergeRow | ConflictAction::Continue, Some(row)) => {
                self.write_merged(store, ctx, &row)?;
                Outcome::WRITTEN
            }
            (ConflictAction::MergeRow, None) => {
                return Err(SyncError::merge_failed(
                    &ctx.part.table,
                    "merge chosen without a final row",
                ));
            }
            (_, None) if conflict.category == ConflictCategory::ErrorsOccurred => {
                Outcome::UNRESOLVED
            }
            (ConflictAction::Continue, None) => Outcome::KEPT,
            (ConflictAction::RetryWithForceWrite, _) => self.force_write(store, ctx, conflict)?,
        };

        if !outcome.resolved {
            warn!(
                table = %ctx.part.table,
                category = %conflict.category,
                "conflict left unresolved"
            );
        }
        Ok(outcome)
    }

    /// Writes the incoming row over the stored one, bypassing the
    /// concurrency check.
    fn force_write<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &PartContext<'_>,
        conflict: &ConflictRecord,
    ) -> SyncResult<Outcome> {
        let ApplyRequest {
            watermark,
            sender_scope,
            ..
        } = *ctx.request;
        let table = &ctx.part.table;
        let remote = &conflict.remote;

        match conflict.category {
            ConflictCategory::RemoteExistsLocalExists
            | ConflictCategory::RemoteExistsLocalNotExists
            | ConflictCategory::RemoteExistsLocalIsDeleted
            | ConflictCategory::UniqueKeyConstraint => {
                if store.write_upsert(ctx.layout, remote, watermark, sender_scope, true)? == 0 {
                    return Err(SyncError::FatalForceWrite {
                        table: table.clone(),
                        operation: "upsert",
                    });
                }
                Ok(Outcome::WRITTEN)
            }
            ConflictCategory::RemoteIsDeletedLocalExists => {
                if store.write_delete(ctx.layout, remote, watermark, sender_scope, true)? > 0 {
                    return Ok(Outcome::WRITTEN);
                }
                if !store.write_metadata_only(ctx.layout, remote, sender_scope, true)? {
                    return Err(SyncError::FatalForceWrite {
                        table: table.clone(),
                        operation: "delete",
                    });
                }
                Ok(Outcome::KEPT)
            }
            ConflictCategory::RemoteIsDeletedLocalIsDeleted => {
                if !store.write_metadata_only(ctx.layout, remote, sender_scope, true)? {
                    return Err(SyncError::FatalForceWrite {
                        table: table.clone(),
                        operation: "metadata",
                    });
                }
                Ok(Outcome::KEPT)
            }
            ConflictCategory::RemoteIsDeletedLocalNotExists => Ok(Outcome::KEPT),
            ConflictCategory::ErrorsOccurred => Ok(Outcome::UNRESOLVED),
        }
    }

    /// Writes a caller-supplied row as a local change: forced, with no
    /// originating scope, so it is offered back to the peer next time.
    fn write_merged<S: SyncStore + ?Sized>(
        &self,
        store: &mut S,
        ctx: &PartContext<'_>,
        row: &ChangeRecord,
    ) -> SyncResult<()> {
        let table = &ctx.part.table;
        if &row.table != table {
            return Err(SyncError::merge_failed(
                table,
                format!("final row belongs to {}", row.table),
            ));
        }
        let watermark = ctx.request.watermark;
        let written = match row.state {
            RowState::Upsert => store.write_upsert(ctx.layout, row, watermark, None, true),
            RowState::Tombstone => store.write_delete(ctx.layout, row, watermark, None, true),
        };
        match written {
            Ok(0) => Err(SyncError::merge_failed(table, "write affected no rows")),
            Ok(_) => Ok(()),
            Err(e) => Err(SyncError::merge_failed(table, e.to_string())),
        }
    }
}

/// Maps a non-forced write result onto a conflict, or propagates a hard
/// failure.
fn write_failure(written: StoreResult<u64>) -> SyncResult<Option<WriteFailure>> {
    match written {
        Ok(0) => Ok(Some(WriteFailure::Concurrency)),
        Ok(_) => Ok(None),
        Err(e) if e.is_unique_constraint() => Ok(Some(WriteFailure::UniqueKey)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ApplyConflictArgs;
    use rowsync_codec::Value;
    use rowsync_protocol::{
        ColumnDescriptor, ColumnType, ConflictPolicy, ConflictResolution, TableName,
    };
    use rowsync_storage::MemoryStore;
    use tempfile::{tempdir, TempDir};

    fn schema() -> SyncSchema {
        SyncSchema::new(vec![TableDescriptor::new("Items")
            .with_column(ColumnDescriptor::new("id", ColumnType::Integer))
            .with_column(ColumnDescriptor::new("label", ColumnType::Text))
            .with_primary_key(&["id"])])
        .unwrap()
    }

    fn items() -> TableName {
        TableName::new("Items")
    }

    fn row(id: i64, label: &str) -> ChangeRecord {
        ChangeRecord::upsert("Items", vec![Value::Integer(id), Value::from(label)])
    }

    /// Writes `rows` as a one-part batch.
    fn batch(rows: &[ChangeRecord]) -> (TempDir, BatchDirectory, BatchInfo) {
        let schema = schema();
        let root = tempdir().unwrap();
        let directory = BatchDirectory::create(root.path(), "b").unwrap();
        let mut batch = BatchInfo::new("b", &schema, Timestamp::new(1));
        let layout = schema.table(&items()).unwrap();
        let mut writer = CborRowCodec::new()
            .create_writer(&directory.part_path_for(0, &items()), layout)
            .unwrap();
        for row in rows {
            writer.write_row(row).unwrap();
        }
        let count = writer.finish().unwrap();
        batch
            .push_part(BatchPartInfo::new(0, items(), count, true))
            .unwrap();
        (root, directory, batch)
    }

    fn local_store() -> MemoryStore {
        let mut store = MemoryStore::new(schema());
        store
            .insert_local(&items(), vec![Value::Integer(1), Value::from("local")])
            .unwrap();
        store
    }

    fn label(store: &MemoryStore) -> Value {
        store.live_rows(&items()).unwrap()[0][1].clone()
    }

    #[test]
    fn server_wins_keeps_local_row() {
        let schema = schema();
        let options = SyncOptions::default();
        let mut store = local_store();
        let (_root, directory, batch) = batch(&[row(1, "remote")]);

        let stats = ChangeApplier::new(&schema, &options)
            .apply(
                &mut store,
                &batch,
                &directory,
                ApplyRequest::new(SyncSide::Server, Timestamp::new(0)),
            )
            .unwrap();

        let counts = stats.get(&items(), RowState::Upsert).unwrap();
        assert_eq!(counts, ApplyCounts::from_outcome(1, 0, 1, 0));
        assert_eq!(label(&store), Value::from("local"));
    }

    #[test]
    fn client_wins_forces_remote_row() {
        let schema = schema();
        let options = SyncOptions::default().with_conflict_policy(ConflictPolicy::ClientWins);
        let mut store = local_store();
        let (_root, directory, batch) = batch(&[row(1, "remote")]);

        let stats = ChangeApplier::new(&schema, &options)
            .apply(
                &mut store,
                &batch,
                &directory,
                ApplyRequest::new(SyncSide::Server, Timestamp::new(0)),
            )
            .unwrap();

        assert_eq!(stats.total_applied(), 1);
        assert_eq!(stats.total_resolved_conflicts(), 1);
        assert_eq!(stats.total_failed(), 0);
        assert_eq!(label(&store), Value::from("remote"));
    }

    #[test]
    fn merge_on_continue_writes_final_row_without_scope() {
        let schema = schema();
        let options = SyncOptions::default();
        let mut store = local_store();
        let (_root, directory, batch) = batch(&[row(1, "remote")]);
        let sender = ScopeId::new();

        let stats = ChangeApplier::new(&schema, &options)
            .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
                args.final_row = Some(row(1, "merged"));
            }))
            .apply(
                &mut store,
                &batch,
                &directory,
                ApplyRequest::new(SyncSide::Server, Timestamp::new(0)).with_sender_scope(sender),
            )
            .unwrap();

        assert_eq!(stats.total_applied(), 1);
        assert_eq!(label(&store), Value::from("merged"));
        let tracking = store.tracking(&items(), &[Value::Integer(1)]).unwrap().unwrap();
        assert_eq!(tracking.update_scope, None);
    }

    #[test]
    fn merge_without_row_fails() {
        let schema = schema();
        let options = SyncOptions::default();
        let mut store = local_store();
        let (_root, directory, batch) = batch(&[row(1, "remote")]);

        let err = ChangeApplier::new(&schema, &options)
            .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
                args.resolution = ConflictResolution::MergeRow;
            }))
            .apply(
                &mut store,
                &batch,
                &directory,
                ApplyRequest::new(SyncSide::Server, Timestamp::new(0)),
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::MergeFailed { .. }));
    }

    #[test]
    fn rollback_stops_the_apply() {
        let schema = schema();
        let options = SyncOptions::default();
        let mut store = local_store();
        let (_root, directory, batch) = batch(&[row(1, "remote"), row(2, "new")]);

        let err = ChangeApplier::new(&schema, &options)
            .with_conflict_handler(Arc::new(|args: &mut ApplyConflictArgs<'_>| {
                args.resolution = ConflictResolution::Rollback;
            }))
            .apply(
                &mut store,
                &batch,
                &directory,
                ApplyRequest::new(SyncSide::Server, Timestamp::new(0)),
            )
            .unwrap_err();

        let signal = err.rollback_signal().unwrap();
        assert_eq!(signal.table, items());
        assert_eq!(signal.category, ConflictCategory::RemoteExistsLocalExists);
    }

    #[test]
    fn unknown_column_is_a_schema_mismatch() {
        let narrow = SyncSchema::new(vec![TableDescriptor::new("Items")
            .with_column(ColumnDescriptor::new("id", ColumnType::Integer))
            .with_primary_key(&["id"])])
        .unwrap();
        let options = SyncOptions::default();
        let mut store = MemoryStore::new(narrow.clone());
        let (_root, directory, batch) = batch(&[row(1, "remote")]);

        let err = ChangeApplier::new(&narrow, &options)
            .apply(
                &mut store,
                &batch,
                &directory,
                ApplyRequest::new(SyncSide::Server, Timestamp::new(0)),
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    }

    #[test]
    fn write_failure_mapping() {
        assert_eq!(write_failure(Ok(1)).unwrap(), None);
        assert_eq!(
            write_failure(Ok(0)).unwrap(),
            Some(WriteFailure::Concurrency)
        );
        let unique = StoreError::UniqueConstraint {
            table: items(),
            columns: vec!["label".into()],
        };
        assert_eq!(
            write_failure(Err(unique)).unwrap(),
            Some(WriteFailure::UniqueKey)
        );
        assert!(write_failure(Err(StoreError::Unavailable("down".into()))).is_err());
    }
}
