//! Storage provider trait.

use crate::error::{StoreError, StoreResult};
use rowsync_codec::Value;
use rowsync_protocol::{ChangeRecord, ScopeId, TableDescriptor, Timestamp, WriteFailure};

/// Lazy, finite stream of changed rows.
pub type RowStream<'a> = Box<dyn Iterator<Item = StoreResult<ChangeRecord>> + 'a>;

/// A row a bulk write could not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkFailure {
    /// Position of the row in the input slice.
    pub index: usize,
    /// Why the write was rejected.
    pub reason: WriteFailure,
}

/// A table-level database provider used by the sync engine.
///
/// Rows passed to writes are laid out in the column order of the
/// `table` descriptor given with them, which may be a sanitized copy of the
/// store's own descriptor. Implementations map columns by name.
///
/// # Concurrency predicate
///
/// A non-forced write to a tracked row succeeds only when the row's stored
/// timestamp is `<= watermark`, or the row was last written by `scope`.
/// Untracked rows are always writable. A forced write skips the check.
///
/// # Invariants
///
/// - `select_changed_since` never yields a row last written by `excluded`
/// - a forced `write_upsert` affects exactly one row
/// - the stream returned by `select_changed_since` is restartable by calling
///   it again
pub trait SyncStore: Send {
    /// Current value of the store's change clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the clock cannot be read.
    fn current_timestamp(&self) -> StoreResult<Timestamp>;

    /// Streams rows of `table` changed after `since` (all rows when `None`),
    /// skipping rows last written by `excluded`. Rows use the store's full
    /// column layout for the table; tombstones carry key values only.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the read fails; the
    /// stream itself may also yield errors.
    fn select_changed_since(
        &self,
        table: &TableDescriptor,
        since: Option<Timestamp>,
        excluded: Option<ScopeId>,
    ) -> StoreResult<RowStream<'_>>;

    /// Reads the stored row (live or tombstone) with the given key values.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the read fails.
    fn get_row(&self, table: &TableDescriptor, key: &[Value])
        -> StoreResult<Option<ChangeRecord>>;

    /// Inserts or updates a row, stamping it with `scope` as the writer.
    /// Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// [`StoreError::UniqueConstraint`] on a uniqueness violation, other
    /// variants on hard failures.
    fn write_upsert(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        watermark: Timestamp,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<u64>;

    /// Deletes a row, leaving a tombstone. Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns an error on hard failures.
    fn write_delete(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        watermark: Timestamp,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<u64>;

    /// Reassigns a row's tracking metadata to `scope` without touching data.
    ///
    /// # Errors
    ///
    /// Returns an error on hard failures.
    fn write_metadata_only(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<bool>;

    /// Suspends foreign-key enforcement for a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses.
    fn disable_constraints(&mut self, _table: &TableDescriptor) -> StoreResult<()> {
        Ok(())
    }

    /// Restores foreign-key enforcement for a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses.
    fn enable_constraints(&mut self, _table: &TableDescriptor) -> StoreResult<()> {
        Ok(())
    }

    /// Returns true if the bulk writes are worth calling.
    fn supports_bulk_operations(&self) -> bool {
        false
    }

    /// Upserts many rows without forcing. Returns the rows that failed.
    ///
    /// # Errors
    ///
    /// Returns an error on hard failures.
    fn bulk_upsert(
        &mut self,
        table: &TableDescriptor,
        rows: &[ChangeRecord],
        watermark: Timestamp,
        scope: Option<ScopeId>,
    ) -> StoreResult<Vec<BulkFailure>> {
        let mut failures = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            match self.write_upsert(table, row, watermark, scope, false) {
                Ok(0) => failures.push(BulkFailure {
                    index,
                    reason: WriteFailure::Concurrency,
                }),
                Ok(_) => {}
                Err(StoreError::UniqueConstraint { .. }) => failures.push(BulkFailure {
                    index,
                    reason: WriteFailure::UniqueKey,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(failures)
    }

    /// Deletes many rows without forcing. Returns the rows that failed.
    ///
    /// # Errors
    ///
    /// Returns an error on hard failures.
    fn bulk_delete(
        &mut self,
        table: &TableDescriptor,
        rows: &[ChangeRecord],
        watermark: Timestamp,
        scope: Option<ScopeId>,
    ) -> StoreResult<Vec<BulkFailure>> {
        let mut failures = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            if self.write_delete(table, row, watermark, scope, false)? == 0 {
                failures.push(BulkFailure {
                    index,
                    reason: WriteFailure::Concurrency,
                });
            }
        }
        Ok(failures)
    }
}
