//! In-memory tracked store.

use crate::command_cache::{CommandCache, CommandKey, CommandKind};
use crate::error::{StoreError, StoreResult};
use crate::store::{RowStream, SyncStore};
use rowsync_codec::{encode_key, Value};
use rowsync_protocol::{
    ChangeRecord, RowState, ScopeId, SyncSchema, TableDescriptor, TableName, Timestamp,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Tracking metadata kept for every row a store has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowTracking {
    /// Store clock at the last write.
    pub timestamp: Timestamp,
    /// True once the row is deleted.
    pub tombstone: bool,
    /// Scope that made the last write; `None` for local writes.
    pub update_scope: Option<ScopeId>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    values: Vec<Value>,
    tracking: RowTracking,
}

#[derive(Debug)]
struct MemoryTable {
    descriptor: TableDescriptor,
    rows: BTreeMap<Vec<u8>, StoredRow>,
    constraints_enabled: bool,
}

/// Column mapping from an incoming row layout to the stored layout.
#[derive(Debug)]
struct WritePlan {
    source: Vec<String>,
    /// For each stored column, its position in the incoming row.
    mapping: Vec<Option<usize>>,
    /// Positions of the stored primary-key columns in the incoming row.
    key: Vec<usize>,
}

impl WritePlan {
    fn key_bytes(&self, row: &ChangeRecord) -> StoreResult<Vec<u8>> {
        let key: Vec<Value> = self
            .key
            .iter()
            .map(|&i| row.values.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        Ok(encode_key(&key)?)
    }

    fn project(&self, row: &ChangeRecord, existing: Option<&[Value]>) -> Vec<Value> {
        self.mapping
            .iter()
            .enumerate()
            .map(|(target, source)| match source {
                Some(i) => row.values.get(*i).cloned().unwrap_or(Value::Null),
                None => existing
                    .and_then(|values| values.get(target).cloned())
                    .unwrap_or(Value::Null),
            })
            .collect()
    }
}

/// A tracked store held entirely in memory.
///
/// Every table keeps its rows keyed by encoded primary key, with tracking
/// metadata alongside: a store-wide change timestamp, a tombstone flag and
/// the scope of the last writer. Deleted rows stay as tombstones so they
/// can be selected as changes.
///
/// Unique constraints and foreign keys from the schema are enforced;
/// foreign keys can be suspended per table through
/// [`SyncStore::disable_constraints`].
#[derive(Debug)]
pub struct MemoryStore {
    schema: SyncSchema,
    tables: HashMap<TableName, MemoryTable>,
    clock: Timestamp,
    plans: CommandCache<Arc<WritePlan>>,
    bulk: bool,
}

impl MemoryStore {
    /// Creates an empty store provisioned for every table of `schema`.
    #[must_use]
    pub fn new(schema: SyncSchema) -> Self {
        let tables = schema
            .tables()
            .iter()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    MemoryTable {
                        descriptor: descriptor.clone(),
                        rows: BTreeMap::new(),
                        constraints_enabled: true,
                    },
                )
            })
            .collect();
        Self {
            schema,
            tables,
            clock: Timestamp::default(),
            plans: CommandCache::new(),
            bulk: false,
        }
    }

    /// Sets whether the store reports bulk capability.
    #[must_use]
    pub fn with_bulk_operations(mut self, enabled: bool) -> Self {
        self.bulk = enabled;
        self
    }

    /// The provisioned schema.
    #[must_use]
    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// Moves the clock forward to at least `timestamp`.
    pub fn advance_clock_to(&mut self, timestamp: Timestamp) {
        self.clock = self.clock.max(timestamp);
    }

    /// Inserts or replaces a row as a local application write.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables, malformed rows and constraint violations.
    pub fn insert_local(&mut self, table: &TableName, values: Vec<Value>) -> StoreResult<Timestamp> {
        let key = self.local_key(table, &values)?;
        self.put(table, key, values, None)
    }

    /// Updates an existing live row as a local application write.
    ///
    /// # Errors
    ///
    /// Fails if the row does not exist, and as [`MemoryStore::insert_local`].
    pub fn update_local(&mut self, table: &TableName, values: Vec<Value>) -> StoreResult<Timestamp> {
        let key = self.local_key(table, &values)?;
        let exists = self
            .table(table)?
            .rows
            .get(&key)
            .is_some_and(|row| !row.tracking.tombstone);
        if !exists {
            return Err(StoreError::invalid_row(table, "no live row to update"));
        }
        self.put(table, key, values, None)
    }

    /// Deletes a row as a local application write. Returns false if there
    /// was no live row.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables and foreign-key violations.
    pub fn delete_local(&mut self, table: &TableName, key: &[Value]) -> StoreResult<bool> {
        let key = encode_key(key)?;
        self.remove(table, &key, None)
    }

    /// Tracking metadata of a row.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables.
    pub fn tracking(&self, table: &TableName, key: &[Value]) -> StoreResult<Option<RowTracking>> {
        let key = encode_key(key)?;
        Ok(self.table(table)?.rows.get(&key).map(|row| row.tracking))
    }

    /// Live rows of a table in key order.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables.
    pub fn live_rows(&self, table: &TableName) -> StoreResult<Vec<Vec<Value>>> {
        Ok(self
            .table(table)?
            .rows
            .values()
            .filter(|row| !row.tracking.tombstone)
            .map(|row| row.values.clone())
            .collect())
    }

    /// Number of live rows in a table.
    ///
    /// # Errors
    ///
    /// Fails on unknown tables.
    pub fn row_count(&self, table: &TableName) -> StoreResult<usize> {
        Ok(self
            .table(table)?
            .rows
            .values()
            .filter(|row| !row.tracking.tombstone)
            .count())
    }

    /// Number of cached write plans.
    #[must_use]
    pub fn cached_commands(&self) -> usize {
        self.plans.len()
    }

    /// Drops cached write plans for a table, or all of them.
    pub fn evict_commands(&self, table: Option<&TableName>) {
        match table {
            Some(table) => self.plans.evict_table(table),
            None => self.plans.clear(),
        }
    }

    fn table(&self, name: &TableName) -> StoreResult<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.clone()))
    }

    fn table_mut(&mut self, name: &TableName) -> StoreResult<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.clone()))
    }

    fn tick(&mut self) -> Timestamp {
        self.clock = self.clock.next();
        self.clock
    }

    fn local_key(&self, table: &TableName, values: &[Value]) -> StoreResult<Vec<u8>> {
        let descriptor = &self.table(table)?.descriptor;
        if values.len() != descriptor.columns.len() {
            return Err(StoreError::invalid_row(
                table,
                format!(
                    "expected {} values, got {}",
                    descriptor.columns.len(),
                    values.len()
                ),
            ));
        }
        Ok(encode_key(&descriptor.key_values(values))?)
    }

    fn plan(&self, kind: CommandKind, source: &TableDescriptor) -> StoreResult<Arc<WritePlan>> {
        let key = CommandKey::new(source.name.clone(), kind);
        let names: Vec<&str> = source.columns.iter().map(|c| c.name.as_str()).collect();
        if let Some(plan) = self.plans.get(&key) {
            if plan.source.iter().map(String::as_str).eq(names.iter().copied()) {
                return Ok(plan);
            }
        }

        let target = &self.table(&source.name)?.descriptor;
        if let Some(unknown) = names.iter().find(|name| target.column_index(name).is_none()) {
            return Err(StoreError::UnknownColumn {
                table: target.name.clone(),
                column: (*unknown).to_string(),
            });
        }
        let position = |name: &str| names.iter().position(|n| *n == name);
        let key_positions = target
            .primary_key
            .iter()
            .map(|name| {
                position(name).ok_or_else(|| {
                    StoreError::invalid_row(&target.name, format!("key column `{name}` missing"))
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let plan = Arc::new(WritePlan {
            source: names.iter().map(|n| (*n).to_string()).collect(),
            mapping: target.columns.iter().map(|c| position(&c.name)).collect(),
            key: key_positions,
        });
        self.plans.insert(key, Arc::clone(&plan));
        Ok(plan)
    }

    fn is_writable(existing: Option<&StoredRow>, watermark: Timestamp, scope: Option<ScopeId>) -> bool {
        match existing {
            None => true,
            Some(row) => {
                row.tracking.timestamp <= watermark
                    || (scope.is_some() && row.tracking.update_scope == scope)
            }
        }
    }

    fn validate(&self, table: &TableDescriptor, values: &[Value]) -> StoreResult<()> {
        for (column, value) in table.columns.iter().zip(values) {
            if !column.column_type.accepts(value) {
                return Err(StoreError::invalid_row(
                    &table.name,
                    format!(
                        "column `{}` does not accept {}",
                        column.name,
                        value.type_name()
                    ),
                ));
            }
            if value.is_null() && !column.nullable && column.is_synced() {
                return Err(StoreError::invalid_row(
                    &table.name,
                    format!("column `{}` is not nullable", column.name),
                ));
            }
        }
        Ok(())
    }

    fn check_unique(&self, table: &MemoryTable, key: &[u8], values: &[Value]) -> StoreResult<()> {
        for unique in &table.descriptor.unique_keys {
            let indexes: Vec<usize> = unique
                .iter()
                .filter_map(|c| table.descriptor.column_index(c))
                .collect();
            let wanted: Vec<&Value> = indexes.iter().filter_map(|&i| values.get(i)).collect();
            if wanted.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = table.rows.iter().any(|(other_key, row)| {
                other_key.as_slice() != key
                    && !row.tracking.tombstone
                    && indexes
                        .iter()
                        .map(|&i| row.values.get(i))
                        .eq(wanted.iter().map(|v| Some(*v)))
            });
            if clash {
                return Err(StoreError::UniqueConstraint {
                    table: table.descriptor.name.clone(),
                    columns: unique.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_parents(&self, table: &MemoryTable, values: &[Value]) -> StoreResult<()> {
        if !table.constraints_enabled {
            return Ok(());
        }
        for relation in &table.descriptor.relations {
            let child: Vec<&Value> = relation
                .columns
                .iter()
                .filter_map(|c| table.descriptor.column_index(c))
                .filter_map(|i| values.get(i))
                .collect();
            if child.iter().any(|v| v.is_null()) {
                continue;
            }
            let parent = self.table(&relation.parent)?;
            let parent_indexes: Vec<usize> = relation
                .parent_columns
                .iter()
                .filter_map(|c| parent.descriptor.column_index(c))
                .collect();
            let references = |candidate: &[Value]| {
                parent_indexes
                    .iter()
                    .map(|&i| candidate.get(i))
                    .eq(child.iter().map(|v| Some(*v)))
            };
            let self_match = relation.parent == table.descriptor.name && references(values);
            let found = self_match
                || parent
                    .rows
                    .values()
                    .any(|row| !row.tracking.tombstone && references(&row.values));
            if !found {
                return Err(StoreError::ForeignKey {
                    table: table.descriptor.name.clone(),
                    relation: relation.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_children(&self, parent: &MemoryTable, key: &[u8], values: &[Value]) -> StoreResult<()> {
        for child in self.tables.values().filter(|t| t.constraints_enabled) {
            for relation in child
                .descriptor
                .relations
                .iter()
                .filter(|r| r.parent == parent.descriptor.name)
            {
                let referenced: Vec<&Value> = relation
                    .parent_columns
                    .iter()
                    .filter_map(|c| parent.descriptor.column_index(c))
                    .filter_map(|i| values.get(i))
                    .collect();
                if referenced.iter().any(|v| v.is_null()) {
                    continue;
                }
                let child_indexes: Vec<usize> = relation
                    .columns
                    .iter()
                    .filter_map(|c| child.descriptor.column_index(c))
                    .collect();
                let same_table = child.descriptor.name == parent.descriptor.name;
                let referenced_by_child = child.rows.iter().any(|(child_key, row)| {
                    !row.tracking.tombstone
                        && !(same_table && child_key.as_slice() == key)
                        && child_indexes
                            .iter()
                            .map(|&i| row.values.get(i))
                            .eq(referenced.iter().map(|v| Some(*v)))
                });
                if referenced_by_child {
                    return Err(StoreError::ForeignKey {
                        table: child.descriptor.name.clone(),
                        relation: relation.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn put(
        &mut self,
        table: &TableName,
        key: Vec<u8>,
        values: Vec<Value>,
        scope: Option<ScopeId>,
    ) -> StoreResult<Timestamp> {
        let current = self.table(table)?;
        self.validate(&current.descriptor, &values)?;
        self.check_unique(current, &key, &values)?;
        self.check_parents(current, &values)?;

        let timestamp = self.tick();
        self.table_mut(table)?.rows.insert(
            key,
            StoredRow {
                values,
                tracking: RowTracking {
                    timestamp,
                    tombstone: false,
                    update_scope: scope,
                },
            },
        );
        Ok(timestamp)
    }

    fn remove(&mut self, table: &TableName, key: &[u8], scope: Option<ScopeId>) -> StoreResult<bool> {
        let current = self.table(table)?;
        let values = match current.rows.get(key) {
            Some(row) if !row.tracking.tombstone => row.values.clone(),
            _ => return Ok(false),
        };
        self.check_children(current, key, &values)?;
        let tombstone = ChangeRecord::tombstone(&current.descriptor, &values).values;

        let timestamp = self.tick();
        self.table_mut(table)?.rows.insert(
            key.to_vec(),
            StoredRow {
                values: tombstone,
                tracking: RowTracking {
                    timestamp,
                    tombstone: true,
                    update_scope: scope,
                },
            },
        );
        Ok(true)
    }
}

impl SyncStore for MemoryStore {
    fn current_timestamp(&self) -> StoreResult<Timestamp> {
        Ok(self.clock)
    }

    fn select_changed_since(
        &self,
        table: &TableDescriptor,
        since: Option<Timestamp>,
        excluded: Option<ScopeId>,
    ) -> StoreResult<RowStream<'_>> {
        let stored = self.table(&table.name)?;
        let name = stored.descriptor.name.clone();
        let rows = stored
            .rows
            .values()
            .filter(move |row| since.map_or(true, |since| row.tracking.timestamp > since))
            .filter(move |row| {
                excluded.map_or(true, |excluded| row.tracking.update_scope != Some(excluded))
            })
            .map(move |row| {
                Ok(ChangeRecord {
                    table: name.clone(),
                    state: if row.tracking.tombstone {
                        RowState::Tombstone
                    } else {
                        RowState::Upsert
                    },
                    values: row.values.clone(),
                })
            });
        Ok(Box::new(rows))
    }

    fn get_row(
        &self,
        table: &TableDescriptor,
        key: &[Value],
    ) -> StoreResult<Option<ChangeRecord>> {
        let stored = self.table(&table.name)?;
        let key = encode_key(key)?;
        Ok(stored.rows.get(&key).map(|row| ChangeRecord {
            table: stored.descriptor.name.clone(),
            state: if row.tracking.tombstone {
                RowState::Tombstone
            } else {
                RowState::Upsert
            },
            values: row.values.clone(),
        }))
    }

    fn write_upsert(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        watermark: Timestamp,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<u64> {
        let plan = self.plan(CommandKind::Upsert, table)?;
        let key = plan.key_bytes(row)?;
        let existing = self.table(&table.name)?.rows.get(&key);
        if !force && !Self::is_writable(existing, watermark, scope) {
            return Ok(0);
        }
        let previous = existing
            .filter(|stored| !stored.tracking.tombstone)
            .map(|stored| stored.values.as_slice());
        let values = plan.project(row, previous);
        self.put(&table.name, key, values, scope)?;
        Ok(1)
    }

    fn write_delete(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        watermark: Timestamp,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<u64> {
        let plan = self.plan(CommandKind::Delete, table)?;
        let key = plan.key_bytes(row)?;
        let existing = self.table(&table.name)?.rows.get(&key);
        if !force && !Self::is_writable(existing, watermark, scope) {
            return Ok(0);
        }
        Ok(u64::from(self.remove(&table.name, &key, scope)?))
    }

    fn write_metadata_only(
        &mut self,
        table: &TableDescriptor,
        row: &ChangeRecord,
        scope: Option<ScopeId>,
        force: bool,
    ) -> StoreResult<bool> {
        let plan = self.plan(CommandKind::UpdateMetadata, table)?;
        let key = plan.key_bytes(row)?;
        let stored = self.table(&table.name)?;
        let existing = stored.rows.get(&key).cloned();
        let mut replacement = match existing {
            Some(mut current) => {
                current.tracking.update_scope = scope;
                current
            }
            None if force => {
                let values = plan.project(row, None);
                StoredRow {
                    values: ChangeRecord::tombstone(&stored.descriptor, &values).values,
                    tracking: RowTracking {
                        timestamp: Timestamp::default(),
                        tombstone: true,
                        update_scope: scope,
                    },
                }
            }
            None => return Ok(false),
        };

        replacement.tracking.timestamp = self.tick();
        self.table_mut(&table.name)?.rows.insert(key, replacement);
        Ok(true)
    }

    fn disable_constraints(&mut self, table: &TableDescriptor) -> StoreResult<()> {
        self.table_mut(&table.name)?.constraints_enabled = false;
        Ok(())
    }

    fn enable_constraints(&mut self, table: &TableDescriptor) -> StoreResult<()> {
        self.table_mut(&table.name)?.constraints_enabled = true;
        Ok(())
    }

    fn supports_bulk_operations(&self) -> bool {
        self.bulk
    }
}
