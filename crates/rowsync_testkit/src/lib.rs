//! # rowsync testkit
//!
//! Test utilities for rowsync.
//!
//! This crate provides:
//! - a Customers/Orders fixture schema and seeded stores
//! - temporary batch roots that clean up after themselves
//! - [`RecordingStore`], a [`SyncStore`](rowsync_storage::SyncStore)
//!   wrapper that logs write calls and can inject faults
//! - proptest strategies for values, rows and conflict inputs
//!
//! ## Usage
//!
//! ```rust
//! use rowsync_testkit::prelude::*;
//!
//! let store = scenarios::seeded_store(2, 3);
//! assert_eq!(store.row_count(&orders()).unwrap(), 6);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recording::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recording::*;
