//! Conflict classification and the resolution vocabulary.

use crate::row::{ChangeRecord, RowState};
use crate::types::SyncSide;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of write-write conflict a failed row write represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictCategory {
    /// Both sides hold a live row.
    RemoteExistsLocalExists,
    /// Remote row is live, nothing stored locally.
    RemoteExistsLocalNotExists,
    /// Remote row is live, local row was deleted.
    RemoteExistsLocalIsDeleted,
    /// Remote deleted a row that is live locally.
    RemoteIsDeletedLocalExists,
    /// Both sides deleted the row.
    RemoteIsDeletedLocalIsDeleted,
    /// Remote deleted a row never stored locally.
    RemoteIsDeletedLocalNotExists,
    /// The write broke a uniqueness constraint rather than a version check.
    UniqueKeyConstraint,
    /// The conflict could not be classified.
    ErrorsOccurred,
}

impl ConflictCategory {
    /// Returns true when the incoming row is a delete.
    #[must_use]
    pub fn is_remote_deleted(self) -> bool {
        matches!(
            self,
            Self::RemoteIsDeletedLocalExists
                | Self::RemoteIsDeletedLocalIsDeleted
                | Self::RemoteIsDeletedLocalNotExists
        )
    }

    /// Category for a failed write, given why it failed.
    #[must_use]
    pub fn for_failure(
        failure: WriteFailure,
        remote: &ChangeRecord,
        local: Option<&ChangeRecord>,
    ) -> Self {
        match failure {
            WriteFailure::Concurrency => classify(remote, local),
            WriteFailure::UniqueKey => Self::UniqueKeyConstraint,
            WriteFailure::LookupFailed => Self::ErrorsOccurred,
        }
    }
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a non-forced write was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteFailure {
    /// The stored row changed after the watermark.
    Concurrency,
    /// A unique index rejected the row.
    UniqueKey,
    /// The stored row could not be read back for classification.
    LookupFailed,
}

/// Classifies a conflict from the incoming row and the stored row, if any.
///
/// Total over every presence/state combination. Rows from two different
/// tables cannot be compared and yield [`ConflictCategory::ErrorsOccurred`].
#[must_use]
pub fn classify(remote: &ChangeRecord, local: Option<&ChangeRecord>) -> ConflictCategory {
    use ConflictCategory::*;

    match local {
        Some(local) if local.table != remote.table => ErrorsOccurred,
        None => match remote.state {
            RowState::Upsert => RemoteExistsLocalNotExists,
            RowState::Tombstone => RemoteIsDeletedLocalNotExists,
        },
        Some(local) => match (local.state, remote.state) {
            (RowState::Tombstone, RowState::Tombstone) => RemoteIsDeletedLocalIsDeleted,
            (RowState::Tombstone, RowState::Upsert) => RemoteExistsLocalIsDeleted,
            (RowState::Upsert, RowState::Tombstone) => RemoteIsDeletedLocalExists,
            (RowState::Upsert, RowState::Upsert) => RemoteExistsLocalExists,
        },
    }
}

/// Configured policy for conflicts nobody overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The server's row wins.
    #[default]
    ServerWins,
    /// The client's row wins.
    ClientWins,
}

impl ConflictPolicy {
    /// Converts to a code.
    #[must_use]
    pub fn to_code(self) -> u8 {
        match self {
            ConflictPolicy::ServerWins => 1,
            ConflictPolicy::ClientWins => 2,
        }
    }

    /// Converts from a code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::ServerWins),
            2 => Some(ConflictPolicy::ClientWins),
            _ => None,
        }
    }
}

/// Resolution chosen for one conflict, either from the policy or by a
/// caller override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// The server's row wins.
    ServerWins,
    /// The client's row wins.
    ClientWins,
    /// A caller-supplied final row replaces both.
    MergeRow,
    /// Abort the whole apply.
    Rollback,
}

impl From<ConflictPolicy> for ConflictResolution {
    fn from(policy: ConflictPolicy) -> Self {
        match policy {
            ConflictPolicy::ServerWins => ConflictResolution::ServerWins,
            ConflictPolicy::ClientWins => ConflictResolution::ClientWins,
        }
    }
}

impl ConflictResolution {
    /// Action the applier on `side` performs for this resolution.
    ///
    /// On the server the incoming row is the client's, so `ClientWins`
    /// forces it in. On the client the incoming row is the server's, so
    /// the mapping is mirrored.
    #[must_use]
    pub fn to_action(self, side: SyncSide) -> ConflictAction {
        match (self, side) {
            (ConflictResolution::MergeRow, _) => ConflictAction::MergeRow,
            (ConflictResolution::Rollback, _) => ConflictAction::Rollback,
            (ConflictResolution::ServerWins, SyncSide::Server)
            | (ConflictResolution::ClientWins, SyncSide::Client) => ConflictAction::Continue,
            (ConflictResolution::ClientWins, SyncSide::Server)
            | (ConflictResolution::ServerWins, SyncSide::Client) => {
                ConflictAction::RetryWithForceWrite
            }
        }
    }
}

/// What the applier does with a conflicting row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictAction {
    /// Keep the stored row.
    Continue,
    /// Write the incoming row bypassing the concurrency check.
    RetryWithForceWrite,
    /// Write the caller's final row.
    MergeRow,
    /// Abort the apply.
    Rollback,
}

/// A conflict as presented to resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    /// Category.
    pub category: ConflictCategory,
    /// Incoming row.
    pub remote: ChangeRecord,
    /// Stored row, if one exists.
    pub local: Option<ChangeRecord>,
}

impl ConflictRecord {
    /// Builds and classifies a conflict.
    #[must_use]
    pub fn new(failure: WriteFailure, remote: ChangeRecord, local: Option<ChangeRecord>) -> Self {
        let category = ConflictCategory::for_failure(failure, &remote, local.as_ref());
        Self {
            category,
            remote,
            local,
        }
    }
}
