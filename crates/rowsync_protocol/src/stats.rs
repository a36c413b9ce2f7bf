//! Selection and apply statistics.
//!
//! A table's changes may span several part files, so apply statistics are
//! merged additively per `(table, state)` instead of being overwritten.

use crate::row::RowState;
use crate::types::TableName;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Rows selected for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// Table.
    pub table: TableName,
    /// Live rows selected.
    pub upserts: u64,
    /// Tombstones selected.
    pub deletes: u64,
}

impl TableChangesSelected {
    /// Creates empty counters for a table.
    #[must_use]
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            upserts: 0,
            deletes: 0,
        }
    }

    /// Counts one row.
    pub fn count(&mut self, state: RowState) {
        match state {
            RowState::Upsert => self.upserts += 1,
            RowState::Tombstone => self.deletes += 1,
        }
    }

    /// Rows of either state.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.upserts + self.deletes
    }
}

/// Rows selected across all tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per-table counters, in selection order. Tables without rows are omitted.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Adds a table's counters, merging with an existing entry.
    pub fn push(&mut self, selected: TableChangesSelected) {
        if selected.total() == 0 {
            return;
        }
        match self.tables.iter_mut().find(|t| t.table == selected.table) {
            Some(existing) => {
                existing.upserts += selected.upserts;
                existing.deletes += selected.deletes;
            }
            None => self.tables.push(selected),
        }
    }

    /// Counters for one table.
    #[must_use]
    pub fn table(&self, table: &TableName) -> Option<&TableChangesSelected> {
        self.tables.iter().find(|t| &t.table == table)
    }

    /// Live rows over all tables.
    #[must_use]
    pub fn total_upserts(&self) -> u64 {
        self.tables.iter().map(|t| t.upserts).sum()
    }

    /// Tombstones over all tables.
    #[must_use]
    pub fn total_deletes(&self) -> u64 {
        self.tables.iter().map(|t| t.deletes).sum()
    }

    /// All rows.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total_upserts() + self.total_deletes()
    }
}

/// Outcome counters for a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCounts {
    /// Rows written, by plain writes or by conflict resolution.
    pub applied: u64,
    /// Conflicts that were resolved.
    pub resolved_conflicts: u64,
    /// Rows neither applied nor resolved.
    pub failed: u64,
}

impl ApplyCounts {
    /// Computes counts for one batch of rows.
    ///
    /// `failed` is fixed from the plain-write outcome first:
    /// `considered - applied_by_write - resolved`. Rows a resolution wrote
    /// are added to `applied` afterwards.
    #[must_use]
    pub fn from_outcome(
        considered: u64,
        applied_by_write: u64,
        resolved: u64,
        applied_by_resolution: u64,
    ) -> Self {
        Self {
            applied: applied_by_write + applied_by_resolution,
            resolved_conflicts: resolved,
            failed: considered.saturating_sub(applied_by_write + resolved),
        }
    }

    /// Returns true if nothing was counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for ApplyCounts {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.resolved_conflicts += other.resolved_conflicts;
        self.failed += other.failed;
    }
}

/// Apply outcome for one table and row state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table.
    pub table: TableName,
    /// Delete phase or upsert phase.
    pub state: RowState,
    /// Counters.
    #[serde(flatten)]
    pub counts: ApplyCounts,
}

/// Apply outcome across all tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// Per `(table, state)` counters, in first-seen order.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Merges counts into the entry for `(table, state)`.
    pub fn record(&mut self, table: &TableName, state: RowState, counts: ApplyCounts) {
        match self
            .tables
            .iter_mut()
            .find(|t| &t.table == table && t.state == state)
        {
            Some(existing) => existing.counts += counts,
            None => self.tables.push(TableChangesApplied {
                table: table.clone(),
                state,
                counts,
            }),
        }
    }

    /// Counts for one table over both states.
    #[must_use]
    pub fn for_table(&self, table: &TableName) -> ApplyCounts {
        let mut total = ApplyCounts::default();
        for entry in self.tables.iter().filter(|t| &t.table == table) {
            total += entry.counts;
        }
        total
    }

    /// Counts for one table and state.
    #[must_use]
    pub fn get(&self, table: &TableName, state: RowState) -> Option<ApplyCounts> {
        self.tables
            .iter()
            .find(|t| &t.table == table && t.state == state)
            .map(|t| t.counts)
    }

    /// Counts over everything.
    #[must_use]
    pub fn totals(&self) -> ApplyCounts {
        let mut total = ApplyCounts::default();
        for entry in &self.tables {
            total += entry.counts;
        }
        total
    }

    /// Total rows written.
    #[must_use]
    pub fn total_applied(&self) -> u64 {
        self.totals().applied
    }

    /// Total conflicts resolved.
    #[must_use]
    pub fn total_resolved_conflicts(&self) -> u64 {
        self.totals().resolved_conflicts
    }

    /// Total failed rows.
    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.totals().failed
    }
}
