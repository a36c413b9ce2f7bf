//! Change records.

use crate::schema::TableDescriptor;
use crate::types::TableName;
use rowsync_codec::{encode_key, CodecResult, Value};
use serde::{Deserialize, Serialize};

/// Whether a changed row is a live row or a delete marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowState {
    /// Inserted or updated.
    Upsert,
    /// Deleted; only key columns are meaningful.
    Tombstone,
}

impl RowState {
    /// Converts to a code.
    #[must_use]
    pub fn to_code(self) -> u8 {
        match self {
            RowState::Upsert => 1,
            RowState::Tombstone => 2,
        }
    }

    /// Converts from a code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RowState::Upsert),
            2 => Some(RowState::Tombstone),
            _ => None,
        }
    }
}

/// One changed row, values in the owning table's column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    /// Owning table.
    pub table: TableName,
    /// Upsert or tombstone.
    pub state: RowState,
    /// Column values.
    pub values: Vec<Value>,
}

impl ChangeRecord {
    /// Creates a live row.
    pub fn upsert(table: impl Into<TableName>, values: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            state: RowState::Upsert,
            values,
        }
    }

    /// Creates a delete marker from a full-width row. Non-key columns are
    /// replaced by NULL.
    #[must_use]
    pub fn tombstone(table: &TableDescriptor, values: &[Value]) -> Self {
        let keys = table.primary_key_indexes();
        let values = (0..table.columns.len())
            .map(|i| {
                if keys.contains(&i) {
                    values.get(i).cloned().unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            })
            .collect();
        Self {
            table: table.name.clone(),
            state: RowState::Tombstone,
            values,
        }
    }

    /// Returns true for a delete marker.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.state == RowState::Tombstone
    }

    /// Primary-key values, in key order.
    #[must_use]
    pub fn key(&self, table: &TableDescriptor) -> Vec<Value> {
        table.key_values(&self.values)
    }

    /// Canonical encoding of the primary key, usable as a map key.
    ///
    /// # Errors
    ///
    /// Fails if a key value cannot be encoded (for example NaN).
    pub fn encoded_key(&self, table: &TableDescriptor) -> CodecResult<Vec<u8>> {
        encode_key(&self.key(table))
    }

    /// Value of a named column.
    #[must_use]
    pub fn get(&self, table: &TableDescriptor, column: &str) -> Option<&Value> {
        table.column_index(column).and_then(|i| self.values.get(i))
    }
}
