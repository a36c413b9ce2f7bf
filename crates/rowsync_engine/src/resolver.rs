//! Conflict resolution policy and the caller override hook.

use rowsync_protocol::{
    ChangeRecord, ConflictAction, ConflictPolicy, ConflictRecord, ConflictResolution, SyncSide,
};
use std::fmt;
use std::sync::Arc;

/// What a conflict handler sees and may change.
#[derive(Debug)]
pub struct ApplyConflictArgs<'a> {
    /// The classified conflict.
    pub conflict: &'a ConflictRecord,
    /// Resolution to apply; starts as the configured policy.
    pub resolution: ConflictResolution,
    /// Final row to write locally, in the incoming row's layout.
    ///
    /// Setting it with [`ConflictResolution::MergeRow`] merges. Setting it
    /// while keeping a resolution that keeps the local row writes it in
    /// place of the local row (merge on continue).
    pub final_row: Option<ChangeRecord>,
}

/// Caller hook invoked once per conflict before the resolution runs.
pub trait ConflictHandler: Send + Sync {
    /// Inspects the conflict and optionally changes the resolution.
    fn on_conflict(&self, args: &mut ApplyConflictArgs<'_>);
}

impl<F> ConflictHandler for F
where
    F: Fn(&mut ApplyConflictArgs<'_>) + Send + Sync,
{
    fn on_conflict(&self, args: &mut ApplyConflictArgs<'_>) {
        self(args);
    }
}

/// Decision for one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Action the applier performs.
    pub action: ConflictAction,
    /// Row to write locally, if the handler supplied one.
    pub final_row: Option<ChangeRecord>,
}

/// Turns a classified conflict into an action.
#[derive(Clone)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    side: SyncSide,
    handler: Option<Arc<dyn ConflictHandler>>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .field("side", &self.side)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl ConflictResolver {
    /// Creates a resolver for the applier running on `side`.
    #[must_use]
    pub fn new(policy: ConflictPolicy, side: SyncSide) -> Self {
        Self {
            policy,
            side,
            handler: None,
        }
    }

    /// Installs a conflict handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Configured policy.
    #[must_use]
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolves one conflict. The handler override, if any, takes
    /// precedence over the policy.
    #[must_use]
    pub fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        let mut args = ApplyConflictArgs {
            conflict,
            resolution: ConflictResolution::from(self.policy),
            final_row: None,
        };
        if let Some(handler) = &self.handler {
            handler.on_conflict(&mut args);
        }
        Resolution {
            action: args.resolution.to_action(self.side),
            final_row: args.final_row,
        }
    }
}
