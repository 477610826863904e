// Failure taxonomy for the fetch-merge pipeline.
//
// None of these reach the user: every job's error is logged at the
// scheduler's per-item boundary and the root is left in a recoverable state.

use thiserror::Error;
use treesync_common::descriptor::MalformedChange;
use treesync_common::tree::MergeError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure talking to the backend. The root keeps its last
    /// synced tree and is marked stale.
    #[error("failed to fetch changes for `{root_path}`: {reason}")]
    TransientFetch { root_path: String, reason: String, daemon_down: bool },

    /// An `add`/`change` record without a descriptor. Only that record is
    /// dropped.
    #[error(transparent)]
    MalformedDelta(#[from] MalformedChange),

    /// A change whose target or parent is missing. Skipped.
    #[error("change could not be applied: {0}")]
    OrphanChange(#[source] MergeError),

    #[error("delta for `{root_path}` would move version {stored} to {computed}")]
    VersionRegression { root_path: String, stored: u64, computed: u64 },

    /// The root was replaced while the fetch was in flight.
    #[error("delta for `{root_path}` was fetched from version {known} but the root is at {stored}")]
    BaseVersionMismatch { root_path: String, known: u64, stored: u64 },

    /// The backend answered a first load with a delta instead of a snapshot.
    #[error("expected a snapshot for `{root_path}`, got a delta")]
    UnexpectedDelta { root_path: String },

    #[error("root `{0}` is not mirrored")]
    RootNotFound(String),
}

impl SyncError {
    pub fn transient(root_path: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::TransientFetch {
            root_path: root_path.into(),
            reason: format!("{error:#}"),
            daemon_down: crate::client::daemon_unavailable_exit_code(error).is_some(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }
}
