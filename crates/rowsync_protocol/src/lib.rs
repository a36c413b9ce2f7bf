//! # rowsync protocol
//!
//! Data model shared by both ends of a rowsync session:
//!
//! - [`TableDescriptor`] and [`SyncSchema`]: tables, keys, foreign keys,
//!   sync direction, dependency order
//! - [`ChangeRecord`]: one changed row, upsert or tombstone
//! - [`BatchInfo`]: the manifest of part files holding a change set
//! - [`classify`] and the conflict vocabulary
//! - selection/apply statistics
//!
//! This is a pure data crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod conflict;
mod error;
mod row;
mod schema;
mod scope;
mod stats;
mod types;
mod wire;

pub use batch::{part_file_name, BatchInfo, BatchPartInfo, PART_FILE_EXTENSION, SUMMARY_FILE_NAME};
pub use conflict::{
    classify, ConflictAction, ConflictCategory, ConflictPolicy, ConflictRecord, ConflictResolution,
    WriteFailure,
};
pub use error::{ProtocolError, ProtocolResult};
pub use row::{ChangeRecord, RowState};
pub use schema::{ColumnDescriptor, ColumnType, Relation, SyncDirection, SyncSchema, TableDescriptor};
pub use scope::ScopeInfo;
pub use stats::{
    ApplyCounts, DatabaseChangesApplied, DatabaseChangesSelected, TableChangesApplied,
    TableChangesSelected,
};
pub use types::{ScopeId, SyncSide, SyncType, TableName, Timestamp};
