// Tree mirror: keeps a registry in step with a backend.
//
// Notifications become sync jobs on the update scheduler. Each job fetches
// from the root's last synced version and commits the delta or snapshot it
// gets back; all commits in a mirror happen one at a time.

use std::sync::Arc;

use tracing::{debug, info, warn};
use treesync_common::descriptor::{ChangesSince, Descriptor};
use treesync_common::protocol::tree::RootNotification;
use treesync_common::sort::SortPolicy;

use crate::error::SyncError;
use crate::fetch::DeltaFetchClient;
use crate::registry::{RootRegistry, RootView};
use crate::scheduler::UpdateScheduler;

#[derive(Clone)]
pub struct TreeMirror {
    registry: RootRegistry,
    scheduler: Arc<UpdateScheduler>,
    client: Arc<dyn DeltaFetchClient>,
}

impl TreeMirror {
    pub fn new(client: Arc<dyn DeltaFetchClient>, policy: SortPolicy) -> Self {
        Self { registry: RootRegistry::new(policy), scheduler: UpdateScheduler::new(), client }
    }

    pub fn registry(&self) -> &RootRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    /// Load every root the backend serves. Returns how many were mirrored.
    pub async fn bootstrap(&self) -> Result<usize, SyncError> {
        let snapshots = self.client.initial_tree_data().await?;
        let count = snapshots.len();
        for snapshot in snapshots {
            self.registry.insert_snapshot(snapshot);
        }
        info!(roots = count, "mirror bootstrapped");
        Ok(count)
    }

    /// Start mirroring `root_path`; its first snapshot is loaded by a
    /// scheduled job.
    pub fn open_root(&self, root_path: &str) {
        self.registry.begin_loading(root_path);
        self.request_sync(root_path);
    }

    /// Stop mirroring `root_path`. Queued jobs for it are dropped; one that
    /// is already running finds the root gone at commit time.
    pub fn close_root(&self, root_path: &str) -> bool {
        self.scheduler.discard(root_path);
        self.registry.remove(root_path)
    }

    pub fn handle_notification(&self, notification: RootNotification) {
        debug!(method = notification.method(), root_path = notification.root_path(), "notification");
        match notification {
            RootNotification::RootChanged { root_path } => {
                if !self.registry.contains(&root_path) {
                    self.registry.begin_loading(&root_path);
                }
                self.request_sync(&root_path);
            }
            RootNotification::RootRemoved { root_path } => {
                self.close_root(&root_path);
            }
        }
    }

    /// Queue a sync for `root_path` behind every earlier update.
    pub fn request_sync(&self, root_path: &str) {
        let registry = self.registry.clone();
        let client = Arc::clone(&self.client);
        let root_path = root_path.to_string();
        self.scheduler.enqueue(root_path.clone(), move || sync_root(registry, client, root_path));
    }

    pub fn set_sort_policy(&self, policy: SortPolicy) {
        self.registry.set_sort_policy(policy);
    }

    pub fn root(&self, root_path: &str) -> Option<RootView> {
        self.registry.get(root_path)
    }

    pub fn roots(&self) -> Vec<RootView> {
        self.registry.roots()
    }

    pub fn find(&self, path: &str) -> Option<Descriptor> {
        self.registry.find(path)
    }

    pub fn flatten(&self) -> Vec<Descriptor> {
        self.registry.flatten()
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }
}

async fn sync_root(
    registry: RootRegistry,
    client: Arc<dyn DeltaFetchClient>,
    root_path: String,
) -> Result<(), SyncError> {
    let known_version = registry.begin_update(&root_path)?;

    let fetched = match client.fetch_changes(root_path.clone(), known_version).await {
        Ok(fetched) => fetched,
        Err(error) => {
            registry.mark_stale(&root_path);
            return Err(error);
        }
    };

    match fetched {
        ChangesSince::Snapshot(snapshot) => {
            registry.apply_snapshot(&root_path, snapshot)?;
        }
        ChangesSince::Changes(records) => {
            let Some(known_version) = known_version else {
                registry.mark_stale(&root_path);
                return Err(SyncError::UnexpectedDelta { root_path });
            };
            let commit = registry.apply_delta(&root_path, known_version, records)?;
            if !commit.skipped.is_empty() {
                warn!(
                    root_path = %root_path,
                    version = commit.version,
                    skipped = commit.skipped.len(),
                    "delta committed with skipped changes"
                );
            }
        }
    }
    Ok(())
}
