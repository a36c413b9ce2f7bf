//! A store wrapper that records write calls and injects faults.
//!
//! Used to observe the order in which the applier touches tables and to
//! drive error paths a healthy store never takes.

use parking_lot::Mutex;
use rowsync_codec::Value;
use rowsync_protocol::{ChangeRecord, ScopeId, TableDescriptor, TableName, Timestamp};
use rowsync_storage::{RowStream, StoreError, StoreResult, SyncStore};
use std::sync::Arc;

/// Kind of recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `write_upsert`.
    Upsert,
    /// `write_delete`.
    Delete,
    /// `write_metadata_only`.
    Metadata,
    /// `disable_constraints`.
    DisableConstraints,
    /// `enable_constraints`.
    EnableConstraints,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    /// Table the call targeted.
    pub table: TableName,
    /// What was called.
    pub op: StoreOp,
    /// Whether the write was forced.
    pub forced: bool,
}

/// Faults to inject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Forced upserts and deletes report 0 affected rows.
    pub forced_writes_affect_nothing: bool,
    /// Forced metadata updates report failure.
    pub metadata_updates_fail: bool,
    /// `get_row` returns an error.
    pub lookups_fail: bool,
    /// Every change stream yields this many rows, then an error.
    pub reads_fail_after: Option<usize>,
}

/// Wraps a store and records every write call in order.
#[derive(Debug)]
pub struct RecordingStore<S> {
    inner: S,
    calls: Arc<Mutex<Vec<StoreCall>>>,
    faults: Faults,
}

impl<S: SyncStore> RecordingStore<S> {
    /// Wraps `inner` with no faults.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
            faults: Faults::default(),
        }
    }

    /// Sets the faults to inject.
    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The wrapped store, mutably. Calls made through it are not recorded.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwraps the store.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Snapshot of the recorded calls.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls of one kind, as table names in call order.
    pub fn tables_for(&self, op: StoreOp) -> Vec<TableName> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.table.clone())
            .collect()
    }

    /// Position of the first call of `op` on `table`.
    pub fn first_index(&self, table: &TableName, op: StoreOp) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .position(|c| &c.table == table && c.op == op)
    }

    /// Position of the last call of `op` on `table`.
    pub fn last_index(&self, table: &TableName, op: StoreOp) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .rposition(|c| &c.table == table && c.op == op)
    }

    /// Forgets every recorded call.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, table: &TableDescriptor, op: StoreOp, forced: bool) {
        self.calls.lock().push(StoreCall {
            table: table.name.clone(),
            op,
            forced,
        });
    }
}

impl<S: SyncStore> SyncStore for RecordingStore<S> {
    fn current_timestamp(&self) -> StoreResult<Timestamp> {
        self.inner.current_timestamp()
    }

    fn select_changed_since(
        &self,
        table: &TableDescriptor,
        since: Option<Timestamp>,
        excluded: Option<ScopeId>,
    ) -> StoreResult<RowStream<'_>> {
        let rows = self.inner.select_changed_since(table, since, excluded)?;
        match self.faults.reads_fail_after {
            None => Ok(rows),
            Some(limit) => Ok(Box::new(rows.take(limit).chain(std::iter::once(Err(
                StoreError::Unavailable("injected read failure".into()),
            ))))),
        }
    }

    fn get_row(
        &self,
        table: &TableDescriptor,
        key: &[Value],
    ) -> StoreResult<Option<ChangeRecord>> {
        if self.faults.lookups_fail {
            return Err(StoreError::Unavailable("injected lookup failure".into()));
        }
        self.inner.get_row(table, key)
    }

    fn write_upsert(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        watermark: Timestamp,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<u64> {
        self.record(table, StoreOp::Upsert, force);
        if force && self.faults.forced_writes_affect_nothing {
            return Ok(0);
        }
        self.inner.write_upsert(table, row, watermark, scope, force)
    }

    fn write_delete(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        watermark: Timestamp,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<u64> {
        self.record(table, StoreOp::Delete, force);
        if force && self.faults.forced_writes_affect_nothing {
            return Ok(0);
        }
        self.inner.write_delete(table, row, watermark, scope, force)
    }

    fn write_metadata_only(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<bool> {
        self.record(table, StoreOp::Metadata, force);
        if force && self.faults.metadata_updates_fail {
            return Ok(false);
        }
        self.inner.write_metadata_only(table, row, scope, force)
    }

    fn disable_constraints(&mut self, table: &TableDescriptor) -> StoreResult<()> {
        self.record(table, StoreOp::DisableConstraints, false);
        self.inner.disable_constraints(table)
    }

    fn enable_constraints(&mut self, table: &TableDescriptor) -> StoreResult<()> {
        self.record(table, StoreOp::EnableConstraints, false);
        self.inner.enable_constraints(table)
    }

    fn supports_bulk_operations(&self) -> bool {
        self.inner.supports_bulk_operations()
    }
}
