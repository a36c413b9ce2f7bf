//! # rowsync engine
//!
//! Change selection, batching and conflict-aware application for rowsync.
//!
//! This crate provides:
//! - [`ChangeSelector`]: streams rows changed after a watermark into
//!   size-bounded part files and builds the batch manifest
//! - [`ChangeApplier`]: replays a batch in dependency order with
//!   optimistic-concurrency writes and resolves the conflicts they raise
//! - [`ConflictResolver`] and the [`ConflictHandler`] override hook
//! - [`SyncSession`]: an upload-then-download session between two stores
//! - the part file format ([`CborRowCodec`]) and directory layout
//!   ([`BatchDirectory`])
//!
//! ## Outcomes
//!
//! Row conflicts are expected and end up in [`DatabaseChangesApplied`]. A
//! handler-requested rollback, a forced write that affects no rows, and
//! storage or file failures are returned as [`SyncError`] and stop the
//! invocation.
//!
//! [`DatabaseChangesApplied`]: rowsync_protocol::DatabaseChangesApplied

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod batch;
mod cancel;
mod config;
mod error;
mod resolver;
mod selector;
mod session;

pub use applier::{ApplyRequest, ChangeApplier};
pub use batch::{
    BatchDirectory, CborRowCodec, PartReader, PartWriter, RowCodec, PART_MAGIC, PART_VERSION,
};
pub use cancel::CancellationToken;
pub use config::{SyncOptions, DEFAULT_BATCH_SIZE};
pub use error::{RollbackSignal, SyncError, SyncResult};
pub use resolver::{ApplyConflictArgs, ConflictHandler, ConflictResolver, Resolution};
pub use selector::{ChangeSelector, SelectedChanges, SelectionRequest};
pub use session::{SessionResult, SyncSession};
