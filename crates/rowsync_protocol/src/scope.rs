//! Per-side sync bookkeeping.

use crate::types::{ScopeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What one side remembers between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// This side's scope id; stamped on rows it applies for a peer.
    pub id: ScopeId,
    /// Human readable scope name.
    pub name: String,
    /// Peer whose writes must not be echoed back to it.
    pub peer: Option<ScopeId>,
    /// Local watermark at the end of the last successful session.
    pub last_sync_timestamp: Option<Timestamp>,
    /// Peer watermark at the end of the last successful session.
    pub last_server_sync_timestamp: Option<Timestamp>,
    /// Wall-clock duration of the last session.
    pub last_sync_duration: Option<Duration>,
}

impl ScopeInfo {
    /// Creates a scope that has never synced.
    pub fn new(id: ScopeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            peer: None,
            last_sync_timestamp: None,
            last_server_sync_timestamp: None,
            last_sync_duration: None,
        }
    }

    /// Sets the peer scope.
    #[must_use]
    pub fn with_peer(mut self, peer: ScopeId) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Returns true if no session has completed yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.last_sync_timestamp.is_none()
    }

    /// Records a completed session. Watermarks never move backwards.
    pub fn advance(
        &mut self,
        local: Timestamp,
        remote: Option<Timestamp>,
        duration: Duration,
    ) {
        self.last_sync_timestamp = Some(self.last_sync_timestamp.map_or(local, |t| t.max(local)));
        if let Some(remote) = remote {
            self.last_server_sync_timestamp = Some(
                self.last_server_sync_timestamp
                    .map_or(remote, |t| t.max(remote)),
            );
        }
        self.last_sync_duration = Some(duration);
    }
}
