//! Configuration for selection and apply.

use rowsync_protocol::ConflictPolicy;
use std::path::PathBuf;

/// Default part file threshold: 5 MiB.
pub const DEFAULT_BATCH_SIZE: u64 = 5 * 1024 * 1024;

/// Options shared by the selector and the applier.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Part file size threshold in bytes. `0` keeps each table in one part.
    pub batch_size: u64,
    /// Policy for conflicts no handler overrides.
    pub conflict_policy: ConflictPolicy,
    /// Suspend foreign keys for the duration of an apply.
    pub disable_constraints_on_apply: bool,
    /// Use bulk writes when the store supports them.
    pub use_bulk_operations: bool,
    /// Remove batch directories once applied.
    pub cleanup_batches: bool,
    /// Directory under which batch directories are created.
    pub batch_root: PathBuf,
}

impl SyncOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            conflict_policy: ConflictPolicy::ServerWins,
            disable_constraints_on_apply: false,
            use_bulk_operations: true,
            cleanup_batches: true,
            batch_root: std::env::temp_dir().join("rowsync"),
        }
    }

    /// Sets the part file threshold.
    #[must_use]
    pub fn with_batch_size(mut self, bytes: u64) -> Self {
        self.batch_size = bytes;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets whether foreign keys are suspended during apply.
    #[must_use]
    pub fn with_disable_constraints_on_apply(mut self, disable: bool) -> Self {
        self.disable_constraints_on_apply = disable;
        self
    }

    /// Sets whether bulk writes may be used.
    #[must_use]
    pub fn with_bulk_operations(mut self, enabled: bool) -> Self {
        self.use_bulk_operations = enabled;
        self
    }

    /// Sets whether applied batches are removed.
    #[must_use]
    pub fn with_cleanup_batches(mut self, cleanup: bool) -> Self {
        self.cleanup_batches = cleanup;
        self
    }

    /// Sets the batch root directory.
    #[must_use]
    pub fn with_batch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.batch_root = root.into();
        self
    }

    /// Returns true if parts are split by size.
    #[must_use]
    pub fn is_batched(&self) -> bool {
        self.batch_size > 0
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}
