// Backend seam for the mirror: where deltas and snapshots come from.

use std::future::Future;
use std::pin::Pin;

use treesync_common::descriptor::{ChangesSince, Snapshot};

use crate::error::SyncError;

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send>>;

/// Source of tree data for a mirror.
///
/// In production this is the daemon over its Unix socket. Tests inject
/// scripted clients with controlled latency and failures.
pub trait DeltaFetchClient: Send + Sync {
    /// Changes for `root_path` since `known_version`, or a snapshot when the
    /// backend cannot produce a delta (`None` always yields a snapshot).
    fn fetch_changes(&self, root_path: String, known_version: Option<u64>)
        -> FetchFuture<ChangesSince>;

    /// Snapshots of every root the backend currently serves.
    fn initial_tree_data(&self) -> FetchFuture<Vec<Snapshot>>;
}
