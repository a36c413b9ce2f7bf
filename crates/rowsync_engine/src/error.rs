//! Error types for the sync engine.
//!
//! Per-row conflicts never surface here; they end up in the apply
//! statistics. What does surface is either a deliberate abort
//! ([`SyncError::Rollback`]), a consistency violation
//! ([`SyncError::FatalForceWrite`]), or a failure that stops the current
//! selection or apply.

use rowsync_codec::CodecError;
use rowsync_protocol::{ConflictCategory, ProtocolError, TableName};
use rowsync_storage::StoreError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Abort requested by a conflict handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackSignal {
    /// Table of the row whose conflict asked for the rollback.
    pub table: TableName,
    /// Category of that conflict.
    pub category: ConflictCategory,
}

impl fmt::Display for RollbackSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} conflict on {}", self.category, self.table)
    }
}

/// Errors raised by selection and apply.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A conflict handler asked to roll the apply back.
    #[error("rollback requested: {0}")]
    Rollback(RollbackSignal),

    /// A write that bypassed the concurrency check affected no rows.
    #[error("forced {operation} on {table} affected no rows")]
    FatalForceWrite {
        /// Table.
        table: TableName,
        /// Which write: upsert, delete or metadata.
        operation: &'static str,
    },

    /// A caller-supplied final row could not be written.
    #[error("merged row for {table} could not be written: {reason}")]
    MergeFailed {
        /// Table.
        table: TableName,
        /// What went wrong.
        reason: String,
    },

    /// The batch does not match the local schema.
    #[error("schema mismatch on {table}: {message}")]
    SchemaMismatch {
        /// Table.
        table: TableName,
        /// What differs.
        message: String,
    },

    /// Storage failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Row encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Malformed manifest or schema.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The session was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A part file is damaged.
    #[error("corrupt part file {}: {message}", path.display())]
    CorruptPart {
        /// File.
        path: PathBuf,
        /// What is wrong.
        message: String,
    },
}

impl SyncError {
    /// Creates a schema mismatch error.
    pub fn schema_mismatch(table: &TableName, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.clone(),
            message: message.into(),
        }
    }

    /// Creates a corrupt part error.
    pub fn corrupt_part(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptPart {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a merge failure.
    pub fn merge_failed(table: &TableName, reason: impl Into<String>) -> Self {
        Self::MergeFailed {
            table: table.clone(),
            reason: reason.into(),
        }
    }

    /// Returns true for a deliberate rollback.
    #[must_use]
    pub fn is_rollback(&self) -> bool {
        matches!(self, SyncError::Rollback(_))
    }

    /// Returns the rollback signal, if this is one.
    #[must_use]
    pub fn rollback_signal(&self) -> Option<&RollbackSignal> {
        match self {
            SyncError::Rollback(signal) => Some(signal),
            _ => None,
        }
    }

    /// Returns true for consistency violations that must never be
    /// downgraded to a conflict count.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::FatalForceWrite { .. })
    }
}
