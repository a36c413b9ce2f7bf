//! Error types for store operations.

use rowsync_codec::CodecError;
use rowsync_protocol::TableName;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a store can raise.
///
/// Concurrency conflicts are not errors; they are reported as a write that
/// affected no rows.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The table is not provisioned in this store.
    #[error("unknown table {0}")]
    UnknownTable(TableName),

    /// An incoming row carries a column the table does not have.
    #[error("table {table} has no column `{column}`")]
    UnknownColumn {
        /// Table.
        table: TableName,
        /// Column name.
        column: String,
    },

    /// A row does not fit the table's column types or nullability.
    #[error("invalid row for {table}: {message}")]
    InvalidRow {
        /// Table.
        table: TableName,
        /// What is wrong.
        message: String,
    },

    /// A unique index rejected the row.
    #[error("unique constraint on {table}({}) violated", columns.join(", "))]
    UniqueConstraint {
        /// Table.
        table: TableName,
        /// Columns of the violated constraint.
        columns: Vec<String>,
    },

    /// A foreign key rejected the write.
    #[error("foreign key `{relation}` on {table} violated")]
    ForeignKey {
        /// Table owning the constraint.
        table: TableName,
        /// Constraint name.
        relation: String,
    },

    /// Key encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The backend failed (connection loss, driver error).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates an invalid row error.
    pub fn invalid_row(table: &TableName, message: impl Into<String>) -> Self {
        Self::InvalidRow {
            table: table.clone(),
            message: message.into(),
        }
    }

    /// Returns true for a uniqueness violation.
    #[must_use]
    pub fn is_unique_constraint(&self) -> bool {
        matches!(self, Self::UniqueConstraint { .. })
    }
}
