//! Error types for the protocol crate.

use crate::types::TableName;
use rowsync_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or decoding protocol structures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A table descriptor is inconsistent with itself.
    #[error("invalid table {table}: {message}")]
    InvalidTable {
        /// Offending table.
        table: TableName,
        /// What is wrong.
        message: String,
    },

    /// A relation or lookup names a table that is not in the schema.
    #[error("unknown table {0}")]
    UnknownTable(TableName),

    /// Two tables were declared with the same name.
    #[error("duplicate table {0}")]
    DuplicateTable(TableName),

    /// Foreign keys form a cycle, so no parent-first order exists.
    #[error("foreign key cycle between tables: {tables:?}")]
    DependencyCycle {
        /// Tables that could not be ordered.
        tables: Vec<String>,
    },

    /// A batch summary could not be interpreted.
    #[error("invalid batch summary: {0}")]
    InvalidSummary(String),

    /// A part was pushed out of order or empty.
    #[error("invalid batch part: {0}")]
    InvalidPart(String),
}

impl ProtocolError {
    /// Creates an invalid table error.
    pub fn invalid_table(table: &TableName, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.clone(),
            message: message.into(),
        }
    }

    /// Creates an invalid summary error.
    pub fn invalid_summary(message: impl Into<String>) -> Self {
        Self::InvalidSummary(message.into())
    }
}
