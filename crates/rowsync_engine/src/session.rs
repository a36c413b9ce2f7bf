//! In-process sync session between a client store and a server store.
//!
//! A session runs upload then download:
//!
//! 1. the client selects its changes since its last sync, skipping rows the
//!    server wrote, and the server applies them stamped with the client scope
//! 2. the server selects its changes since the client's last server
//!    watermark, skipping rows the client wrote, and the client applies them
//!    stamped with the server scope
//! 3. the client scope advances to the two batch timestamps
//!
//! A failure leaves the client scope untouched, so the next session
//! reselects the same changes.

use crate::applier::{ApplyRequest, ChangeApplier};
use crate::batch::BatchDirectory;
use crate::cancel::CancellationToken;
use crate::config::SyncOptions;
use crate::error::SyncResult;
use crate::resolver::ConflictHandler;
use crate::selector::{ChangeSelector, SelectedChanges, SelectionRequest};
use rowsync_protocol::{
    DatabaseChangesApplied, DatabaseChangesSelected, ScopeInfo, SyncSchema, SyncSide, SyncType,
};
use rowsync_storage::SyncStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Statistics of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionResult {
    /// Rows the client sent.
    pub uploaded: DatabaseChangesSelected,
    /// What the server did with them.
    pub server_applied: DatabaseChangesApplied,
    /// Rows the server sent.
    pub downloaded: DatabaseChangesSelected,
    /// What the client did with them.
    pub client_applied: DatabaseChangesApplied,
    /// Wall-clock time of the session.
    pub duration: Duration,
}

/// Drives a full session over two local stores sharing one schema.
pub struct SyncSession<'a> {
    schema: &'a SyncSchema,
    options: &'a SyncOptions,
    handler: Option<Arc<dyn ConflictHandler>>,
    cancel: CancellationToken,
}

impl<'a> SyncSession<'a> {
    /// Creates a session.
    #[must_use]
    pub fn new(schema: &'a SyncSchema, options: &'a SyncOptions) -> Self {
        Self {
            schema,
            options,
            handler: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Installs a conflict handler used on both sides.
    #[must_use]
    pub fn with_conflict_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Observes `cancel` throughout the session.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Synchronizes `client` with `server`.
    ///
    /// # Errors
    ///
    /// Returns the first selection or apply error; `client_scope` is only
    /// advanced on success.
    pub fn synchronize<C, S>(
        &self,
        client: &mut C,
        client_scope: &mut ScopeInfo,
        server: &mut S,
        server_scope: &ScopeInfo,
        sync_type: SyncType,
    ) -> SyncResult<SessionResult>
    where
        C: SyncStore + ?Sized,
        S: SyncStore + ?Sized,
    {
        let start = Instant::now();
        let server_watermark = client_scope.last_server_sync_timestamp;

        let mut upload_request =
            SelectionRequest::new(SyncSide::Client).with_sync_type(sync_type);
        upload_request.watermark = client_scope.last_sync_timestamp;
        upload_request.excluded_scope = Some(server_scope.id);
        let upload = self.select(&*client, upload_request)?;
        let client_timestamp = upload.batch.timestamp;

        let server_request = ApplyRequest::new(
            SyncSide::Server,
            server_watermark.unwrap_or_default(),
        )
        .with_sender_scope(client_scope.id);
        let server_applied = self.apply_and_cleanup(server, &upload, server_request)?;

        let mut download_request =
            SelectionRequest::new(SyncSide::Server).with_sync_type(sync_type);
        download_request.watermark = server_watermark;
        download_request.excluded_scope = Some(client_scope.id);
        let download = self.select(&*server, download_request)?;
        let server_timestamp = download.batch.timestamp;

        let client_request = ApplyRequest::new(SyncSide::Client, client_timestamp)
            .with_sender_scope(server_scope.id)
            .with_new_database(client_scope.is_new());
        let client_applied = self.apply_and_cleanup(client, &download, client_request)?;

        let duration = start.elapsed();
        client_scope.advance(client_timestamp, Some(server_timestamp), duration);
        info!(
            scope = %client_scope.name,
            uploaded = upload.changes.total(),
            downloaded = download.changes.total(),
            ?duration,
            "session complete"
        );

        Ok(SessionResult {
            uploaded: upload.changes,
            server_applied,
            downloaded: download.changes,
            client_applied,
            duration,
        })
    }

    fn select<T: SyncStore + ?Sized>(
        &self,
        store: &T,
        request: SelectionRequest,
    ) -> SyncResult<SelectedChanges> {
        let directory = BatchDirectory::create_unique(&self.options.batch_root)?;
        let selector =
            ChangeSelector::new(self.schema, self.options).with_cancellation(self.cancel.clone());
        selector
            .select(store, request, directory.clone())
            .map_err(|e| {
                if let Err(cleanup) = directory.cleanup_unless(!self.options.cleanup_batches) {
                    warn!(error = %cleanup, "failed to remove batch directory");
                }
                e
            })
    }

    fn apply_and_cleanup<T: SyncStore + ?Sized>(
        &self,
        store: &mut T,
        selected: &SelectedChanges,
        request: ApplyRequest,
    ) -> SyncResult<DatabaseChangesApplied> {
        let mut applier =
            ChangeApplier::new(self.schema, self.options).with_cancellation(self.cancel.clone());
        if let Some(handler) = &self.handler {
            applier = applier.with_conflict_handler(Arc::clone(handler));
        }
        let result = applier.apply(store, &selected.batch, &selected.directory, request);

        let cleaned = selected
            .directory
            .clone()
            .cleanup_unless(!self.options.cleanup_batches);
        match (result, cleaned) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), cleaned) => {
                if let Err(cleanup) = cleaned {
                    warn!(error = %cleanup, "failed to remove batch directory");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SyncSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("options", self.options)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}
