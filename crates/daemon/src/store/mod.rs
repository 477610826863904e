// Authoritative per-root trees plus their change histories.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};
use treesync_common::descriptor::{ChangeDescriptor, ChangesSince, Descriptor, Snapshot};
use treesync_common::path::{is_within, parent_path};
use treesync_common::sort::SortPolicy;
use treesync_common::tree::{MergeError, TreeIndex};

use crate::history::{ChangeHistory, DEFAULT_HISTORY_CAPACITY};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("root `{0}` is not open")]
    RootNotFound(String),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

struct RootEntry {
    tree: TreeIndex,
    history: ChangeHistory,
}

/// Open roots keyed by root path.
pub struct RootStore {
    roots: BTreeMap<String, RootEntry>,
    /// Last version issued for each closed root path.
    retired: BTreeMap<String, u64>,
    policy: SortPolicy,
    history_capacity: usize,
}

impl Default for RootStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RootStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            roots: BTreeMap::new(),
            retired: BTreeMap::new(),
            policy: SortPolicy::default(),
            history_capacity,
        }
    }

    /// Open (or re-open) a root with a freshly scanned tree. Re-opening
    /// replaces the tree and resets the history, so every mirror falls back
    /// to a snapshot. A path that was open before continues above the last
    /// version it issued. Returns the root's version.
    pub fn open(&mut self, mut descriptor: Descriptor) -> u64 {
        self.policy.sort_tree(&mut descriptor);
        let root_path = descriptor.path().to_string();
        let tree = TreeIndex::from_descriptor(descriptor);

        match self.roots.get_mut(&root_path) {
            Some(entry) => {
                entry.tree = tree;
                let version = entry.history.reset();
                info!(root_path = %root_path, version, "root re-opened");
                version
            }
            None => {
                let version = self.retired.remove(&root_path).map_or(0, |last| last.saturating_add(1));
                info!(root_path = %root_path, nodes = tree.len(), version, "root opened");
                let history = ChangeHistory::with_version(self.history_capacity, version);
                self.roots.insert(root_path, RootEntry { tree, history });
                version
            }
        }
    }

    pub fn close(&mut self, root_path: &str) -> bool {
        let Some(entry) = self.roots.remove(root_path) else {
            return false;
        };
        let version = entry.history.version();
        info!(root_path, version, "root closed");
        self.retired.insert(root_path.to_string(), version);
        true
    }

    pub fn contains(&self, root_path: &str) -> bool {
        self.roots.contains_key(root_path)
    }

    /// Open roots with their current versions.
    pub fn roots(&self) -> Vec<(String, u64)> {
        self.roots.iter().map(|(path, entry)| (path.clone(), entry.history.version())).collect()
    }

    pub fn version(&self, root_path: &str) -> Result<u64, StoreError> {
        Ok(self.entry(root_path)?.history.version())
    }

    /// Whether `path` is a node of `root_path`'s tree.
    pub fn tracks(&self, root_path: &str, path: &str) -> bool {
        self.roots.get(root_path).is_some_and(|entry| entry.tree.contains(path))
    }

    /// The innermost open root containing `path`.
    pub fn root_for(&self, path: &str) -> Option<&str> {
        self.roots
            .keys()
            .filter(|root| is_within(path, root))
            .max_by_key(|root| root.len())
            .map(String::as_str)
    }

    /// Apply a change to the authoritative tree and record it. A change that
    /// cannot be applied is not recorded.
    pub fn record(&mut self, root_path: &str, change: ChangeDescriptor) -> Result<u64, StoreError> {
        let Self { roots, policy, .. } = self;
        let entry =
            roots.get_mut(root_path).ok_or_else(|| StoreError::RootNotFound(root_path.to_string()))?;
        entry.tree.apply(&change, policy)?;
        let version = entry.history.record(change);
        Ok(version)
    }

    /// Record the current state of `descriptor`'s path: an add when the path
    /// is new, a change otherwise. Returns `None` when nothing was recorded.
    pub fn upsert(&mut self, root_path: &str, descriptor: Descriptor) -> Result<Option<u64>, StoreError> {
        let path = descriptor.path().to_string();
        let entry = self.entry(root_path)?;

        let change = if entry.tree.contains(&path) {
            if entry.tree.get(&path).as_ref().is_some_and(|current| same_node(current, &descriptor)) {
                debug!(path = %path, "descriptor unchanged");
                return Ok(None);
            }
            ChangeDescriptor::change(descriptor)
        } else {
            ChangeDescriptor::add(descriptor)
        };

        match self.record(root_path, change) {
            Ok(version) => Ok(Some(version)),
            Err(StoreError::Merge(error)) => {
                warn!(path = %path, %error, "change not recorded");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Record removal of `path` if the tree holds it.
    pub fn remove(&mut self, root_path: &str, path: &str) -> Result<Option<u64>, StoreError> {
        if !self.entry(root_path)?.tree.contains(path) || path == root_path {
            return Ok(None);
        }
        self.record(root_path, ChangeDescriptor::unlink(path)).map(Some)
    }

    /// Nearest ancestor of `path` (inside `root_path`) that the tree does not
    /// know yet while its own parent is known. `path` itself when its parent
    /// is tracked.
    pub fn first_untracked_ancestor<'a>(&self, root_path: &str, path: &'a str) -> &'a str {
        let mut candidate = path;
        while let Some(parent) = parent_path(candidate) {
            if !is_within(parent, root_path) || self.tracks(root_path, parent) {
                break;
            }
            candidate = parent;
        }
        candidate
    }

    /// Delta since `version`, or a snapshot when the history cannot serve it.
    pub fn changes_since(
        &self,
        root_path: &str,
        version: Option<u64>,
    ) -> Result<ChangesSince, StoreError> {
        let entry = self.entry(root_path)?;
        if let Some(changes) = version.and_then(|since| entry.history.changes_since(since)) {
            return Ok(ChangesSince::Changes(changes.into_iter().map(Into::into).collect()));
        }
        debug!(root_path, requested = ?version, current = entry.history.version(), "answering with snapshot");
        Ok(ChangesSince::Snapshot(Self::snapshot_of(entry)))
    }

    pub fn snapshot(&self, root_path: &str) -> Result<Snapshot, StoreError> {
        self.entry(root_path).map(Self::snapshot_of)
    }

    /// Snapshots of every open root, ordered by root path.
    pub fn initial_tree_data(&self) -> Vec<Snapshot> {
        self.roots.values().map(Self::snapshot_of).collect()
    }

    fn snapshot_of(entry: &RootEntry) -> Snapshot {
        Snapshot { descriptor: entry.tree.to_descriptor(), version: entry.history.version() }
    }

    fn entry(&self, root_path: &str) -> Result<&RootEntry, StoreError> {
        self.roots.get(root_path).ok_or_else(|| StoreError::RootNotFound(root_path.to_string()))
    }
}

/// Equal ignoring directory children (a directory change never carries
/// its subtree).
fn same_node(current: &Descriptor, incoming: &Descriptor) -> bool {
    match (current, incoming) {
        (Descriptor::Directory(a), Descriptor::Directory(b)) => {
            a.name == b.name
                && a.modification_time == b.modification_time
                && a.creation_time == b.creation_time
                && a.sort_kind == b.sort_kind
        }
        _ => current == incoming,
    }
}
