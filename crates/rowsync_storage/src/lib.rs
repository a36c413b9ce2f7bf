//! # rowsync storage
//!
//! The seam between the sync engine and a database.
//!
//! The engine never talks to a database directly. It sees a [`SyncStore`]:
//! a table-level provider that can stream rows changed after a watermark
//! and perform compare-and-write row writes. One implementation exists per
//! storage backend; this crate ships [`MemoryStore`], a fully tracked
//! in-process store used by tests and tooling.
//!
//! ## Write contract
//!
//! - a non-forced write that affects 0 rows is a concurrency conflict,
//!   not an error
//! - a forced write bypasses the concurrency check and must affect a row
//! - a uniqueness violation is reported as [`StoreError::UniqueConstraint`]
//!
//! ## Example
//!
//! ```rust
//! use rowsync_codec::Value;
//! use rowsync_protocol::{ColumnDescriptor, ColumnType, SyncSchema, TableDescriptor, Timestamp};
//! use rowsync_storage::{MemoryStore, SyncStore};
//!
//! let table = TableDescriptor::new("Customers")
//!     .with_column(ColumnDescriptor::new("id", ColumnType::Integer))
//!     .with_column(ColumnDescriptor::new("name", ColumnType::Text))
//!     .with_primary_key(&["id"]);
//! let schema = SyncSchema::new(vec![table.clone()]).unwrap();
//!
//! let mut store = MemoryStore::new(schema);
//! store.insert_local(&table.name, vec![Value::Integer(1), Value::from("Ada")]).unwrap();
//!
//! let changed: Vec<_> = store
//!     .select_changed_since(&table, Some(Timestamp::new(0)), None)
//!     .unwrap()
//!     .collect();
//! assert_eq!(changed.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command_cache;
mod error;
mod memory;
mod store;

pub use command_cache::{CommandCache, CommandKey, CommandKind};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, RowTracking};
pub use store::{BulkFailure, RowStream, SyncStore};
