//! Change selection into size-bounded part files.
//!
//! For every table the selector may send, it streams the rows changed after
//! the watermark out of the store and writes them into one or more part
//! files. A part is closed as soon as its encoded size exceeds the configured
//! batch size and more rows follow, so a part never exceeds the bound by more
//! than the row that crossed it. Tables that produce no rows leave no part.

use crate::batch::{BatchDirectory, CborRowCodec, PartWriter, RowCodec};
use crate::cancel::CancellationToken;
use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use rowsync_codec::Value;
use rowsync_protocol::{
    BatchInfo, BatchPartInfo, ChangeRecord, DatabaseChangesSelected, RowState, ScopeId, SyncSchema,
    SyncSide, SyncType, TableChangesSelected, TableDescriptor, Timestamp,
};
use rowsync_storage::SyncStore;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Parameters of one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Side running the selection.
    pub side: SyncSide,
    /// Sync type of the session.
    pub sync_type: SyncType,
    /// Rows changed after this timestamp are selected; `None` selects
    /// everything.
    pub watermark: Option<Timestamp>,
    /// Rows last written by this scope are skipped.
    pub excluded_scope: Option<ScopeId>,
}

impl SelectionRequest {
    /// A normal, full selection on `side`.
    #[must_use]
    pub fn new(side: SyncSide) -> Self {
        Self {
            side,
            sync_type: SyncType::Normal,
            watermark: None,
            excluded_scope: None,
        }
    }

    /// Sets the sync type.
    #[must_use]
    pub fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }

    /// Sets the watermark.
    #[must_use]
    pub fn with_watermark(mut self, watermark: Timestamp) -> Self {
        self.watermark = Some(watermark);
        self
    }

    /// Sets the scope whose writes are not sent back.
    #[must_use]
    pub fn with_excluded_scope(mut self, scope: ScopeId) -> Self {
        self.excluded_scope = Some(scope);
        self
    }

    /// Returns true if the client is reinitializing and has nothing to send.
    #[must_use]
    pub fn is_empty_by_definition(&self) -> bool {
        self.side == SyncSide::Client && self.sync_type == SyncType::Reinitialize
    }

    /// Returns true if every live row is selected and tombstones are skipped.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.watermark.is_none() || self.is_server_reinitialize()
    }

    fn is_server_reinitialize(&self) -> bool {
        self.side == SyncSide::Server && self.sync_type.is_reinitialize()
    }

    fn since(&self) -> Option<Timestamp> {
        if self.is_full() {
            None
        } else {
            self.watermark
        }
    }

    fn excluded(&self) -> Option<ScopeId> {
        if self.is_server_reinitialize() {
            None
        } else {
            self.excluded_scope
        }
    }
}

/// Output of a selection.
#[derive(Debug)]
pub struct SelectedChanges {
    /// The manifest, already written to the directory's summary.
    pub batch: BatchInfo,
    /// Directory holding the part files.
    pub directory: BatchDirectory,
    /// Per-table row counts.
    pub changes: DatabaseChangesSelected,
}

/// Selects changed rows into a batch directory.
pub struct ChangeSelector<'a> {
    schema: &'a SyncSchema,
    options: &'a SyncOptions,
    codec: Arc<dyn RowCodec>,
    cancel: CancellationToken,
}

impl<'a> ChangeSelector<'a> {
    /// Creates a selector over `schema` using the default part codec.
    #[must_use]
    pub fn new(schema: &'a SyncSchema, options: &'a SyncOptions) -> Self {
        Self {
            schema,
            options,
            codec: Arc::new(CborRowCodec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the part codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn RowCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Observes `cancel` before every table and part.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Selects every changed row into `directory` and writes its summary.
    ///
    /// # Errors
    ///
    /// Propagates store, codec and I/O failures, and returns
    /// [`SyncError::Cancelled`] if the token fires. Part files written before
    /// the failure are left in the directory.
    pub fn select<S: SyncStore + ?Sized>(
        &self,
        store: &S,
        request: SelectionRequest,
        directory: BatchDirectory,
    ) -> SyncResult<SelectedChanges> {
        let timestamp = store.current_timestamp()?;
        let mut batch = BatchInfo::new(directory.batch_id(), self.schema, timestamp);
        let mut changes = DatabaseChangesSelected::default();

        if request.is_empty_by_definition() {
            debug!("client reinitialize: nothing to select");
        } else {
            for table in self.schema.parents_first() {
                self.cancel.check()?;
                if !table.direction.is_selected_by(request.side) {
                    trace!(table = %table.name, "table not selected on this side");
                    continue;
                }
                let selected =
                    self.select_table(store, table, &request, &directory, &mut batch)?;
                changes.push(selected);
            }
        }

        directory.write_summary(&batch)?;
        info!(
            batch = %batch.batch_id,
            parts = batch.parts().len(),
            rows = batch.total_rows(),
            "selected changes"
        );
        Ok(SelectedChanges {
            batch,
            directory,
            changes,
        })
    }

    fn select_table<S: SyncStore + ?Sized>(
        &self,
        store: &S,
        table: &TableDescriptor,
        request: &SelectionRequest,
        directory: &BatchDirectory,
        batch: &mut BatchInfo,
    ) -> SyncResult<TableChangesSelected> {
        let layout = table.sanitized();
        let projection = Projection::new(table, &layout);
        let skip_tombstones = request.is_full();
        let mut selected = TableChangesSelected::new(table.name.clone());

        let mut rows = store
            .select_changed_since(table, request.since(), request.excluded())?
            .filter(|row| {
                !(skip_tombstones && matches!(row, Ok(row) if row.state == RowState::Tombstone))
            })
            .peekable();

        let mut index = batch.next_index();
        let mut writer = self
            .codec
            .create_writer(&directory.part_path_for(index, &table.name), &layout)?;

        while let Some(row) = rows.next() {
            let row = projection.apply(row?)?;
            writer.write_row(&row)?;
            selected.count(row.state);

            if self.options.is_batched()
                && writer.size() > self.options.batch_size
                && rows.peek().is_some()
            {
                let count = writer.finish()?;
                self.record_part(batch, index, table, count, false)?;
                self.cancel.check()?;
                index = batch.next_index();
                writer = self
                    .codec
                    .create_writer(&directory.part_path_for(index, &table.name), &layout)?;
            }
        }

        if writer.rows() == 0 {
            writer.discard()?;
        } else {
            let count = writer.finish()?;
            self.record_part(batch, index, table, count, true)?;
        }

        debug!(
            table = %table.name,
            upserts = selected.upserts,
            deletes = selected.deletes,
            "selected table"
        );
        Ok(selected)
    }

    fn record_part(
        &self,
        batch: &mut BatchInfo,
        index: u32,
        table: &TableDescriptor,
        rows: u64,
        is_last: bool,
    ) -> SyncResult<()> {
        let part = BatchPartInfo::new(index, table.name.clone(), rows, is_last);
        trace!(table = %table.name, index, rows, is_last, "closed part");
        batch.push_part(part)?;
        Ok(())
    }
}

/// Maps rows from the store layout onto the sanitized layout by name.
struct Projection {
    source_len: usize,
    indexes: Vec<usize>,
}

impl Projection {
    fn new(source: &TableDescriptor, target: &TableDescriptor) -> Self {
        let indexes = target
            .columns
            .iter()
            .filter_map(|column| source.column_index(&column.name))
            .collect();
        Self {
            source_len: source.columns.len(),
            indexes,
        }
    }

    fn apply(&self, mut row: ChangeRecord) -> SyncResult<ChangeRecord> {
        if row.values.len() != self.source_len {
            return Err(SyncError::schema_mismatch(
                &row.table,
                format!(
                    "store row has {} values, table has {} columns",
                    row.values.len(),
                    self.source_len
                ),
            ));
        }
        if self.indexes.len() != self.source_len {
            let mut values = std::mem::take(&mut row.values);
            row.values = self
                .indexes
                .iter()
                .map(|&i| std::mem::replace(&mut values[i], Value::Null))
                .collect();
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{ColumnDescriptor, ColumnType, SyncDirection, TableName};
    use rowsync_storage::MemoryStore;
    use tempfile::tempdir;

    fn schema() -> SyncSchema {
        SyncSchema::new(vec![
            TableDescriptor::new("Notes")
                .with_column(ColumnDescriptor::new("id", ColumnType::Integer))
                .with_column(ColumnDescriptor::new("body", ColumnType::Text))
                .with_column(ColumnDescriptor::new("length", ColumnType::Integer).computed())
                .with_primary_key(&["id"]),
            TableDescriptor::new("Audit")
                .with_column(ColumnDescriptor::new("id", ColumnType::Integer))
                .with_primary_key(&["id"])
                .with_direction(SyncDirection::DownloadOnly),
        ])
        .unwrap()
    }

    fn store_with_notes(count: i64) -> MemoryStore {
        let mut store = MemoryStore::new(schema());
        let notes = TableName::new("Notes");
        for id in 0..count {
            store
                .insert_local(
                    &notes,
                    vec![Value::Integer(id), Value::from("x".repeat(64)), Value::Integer(64)],
                )
                .unwrap();
        }
        store
            .insert_local(&TableName::new("Audit"), vec![Value::Integer(1)])
            .unwrap();
        store
    }

    #[test]
    fn computed_columns_are_not_sent() {
        let schema = schema();
        let options = SyncOptions::default();
        let store = store_with_notes(1);
        let root = tempdir().unwrap();
        let directory = BatchDirectory::create(root.path(), "b").unwrap();

        let selected = ChangeSelector::new(&schema, &options)
            .select(&store, SelectionRequest::new(SyncSide::Client), directory)
            .unwrap();

        let part = &selected.batch.parts()[0];
        let layout = selected.batch.schema.table(&part.table).unwrap().clone();
        assert_eq!(layout.columns.len(), 2);
        let rows: Vec<_> = CborRowCodec::new()
            .open_reader(&selected.directory.part_path(part), &layout)
            .unwrap()
            .collect::<SyncResult<_>>()
            .unwrap();
        assert_eq!(rows[0].values, vec![Value::Integer(0), Value::from("x".repeat(64))]);
    }

    #[test]
    fn direction_filters_tables() {
        let schema = schema();
        let options = SyncOptions::default();
        let store = store_with_notes(2);
        let root = tempdir().unwrap();

        let client = ChangeSelector::new(&schema, &options)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Client),
                BatchDirectory::create(root.path(), "client").unwrap(),
            )
            .unwrap();
        assert_eq!(client.batch.row_count_for(&TableName::new("Audit")), 0);
        assert_eq!(client.batch.row_count_for(&TableName::new("Notes")), 2);

        let server = ChangeSelector::new(&schema, &options)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Server),
                BatchDirectory::create(root.path(), "server").unwrap(),
            )
            .unwrap();
        assert_eq!(server.batch.row_count_for(&TableName::new("Audit")), 1);
    }

    #[test]
    fn small_batch_size_splits_parts() {
        let schema = schema();
        let options = SyncOptions::default().with_batch_size(200);
        let store = store_with_notes(10);
        let root = tempdir().unwrap();

        let selected = ChangeSelector::new(&schema, &options)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Client),
                BatchDirectory::create(root.path(), "b").unwrap(),
            )
            .unwrap();

        let notes_table = TableName::new("Notes");
        let notes: Vec<_> = selected
            .batch
            .parts_for(&notes_table)
            .collect();
        assert!(notes.len() > 1);
        assert_eq!(notes.iter().filter(|p| p.is_last_part).count(), 1);
        assert!(notes.last().unwrap().is_last_part);
        assert_eq!(notes.iter().map(|p| p.row_count).sum::<u64>(), 10);
    }

    #[test]
    fn client_reinitialize_selects_nothing() {
        let schema = schema();
        let options = SyncOptions::default();
        let store = store_with_notes(3);
        let root = tempdir().unwrap();

        let selected = ChangeSelector::new(&schema, &options)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Client).with_sync_type(SyncType::Reinitialize),
                BatchDirectory::create(root.path(), "b").unwrap(),
            )
            .unwrap();
        assert!(selected.batch.is_empty());
        assert_eq!(selected.changes.total(), 0);
        assert!(selected.directory.summary_path().exists());
    }

    #[test]
    fn first_sync_skips_tombstones() {
        let schema = schema();
        let options = SyncOptions::default();
        let mut store = store_with_notes(3);
        store
            .delete_local(&TableName::new("Notes"), &[Value::Integer(1)])
            .unwrap();
        let root = tempdir().unwrap();

        let full = ChangeSelector::new(&schema, &options)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Client),
                BatchDirectory::create(root.path(), "full").unwrap(),
            )
            .unwrap();
        let notes = full.changes.table(&TableName::new("Notes")).unwrap();
        assert_eq!((notes.upserts, notes.deletes), (2, 0));

        let incremental = ChangeSelector::new(&schema, &options)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Client).with_watermark(Timestamp::new(0)),
                BatchDirectory::create(root.path(), "incremental").unwrap(),
            )
            .unwrap();
        let notes = incremental.changes.table(&TableName::new("Notes")).unwrap();
        assert_eq!((notes.upserts, notes.deletes), (2, 1));
    }

    #[test]
    fn cancelled_before_first_table() {
        let schema = schema();
        let options = SyncOptions::default();
        let store = store_with_notes(1);
        let root = tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ChangeSelector::new(&schema, &options)
            .with_cancellation(cancel)
            .select(
                &store,
                SelectionRequest::new(SyncSide::Client),
                BatchDirectory::create(root.path(), "b").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
