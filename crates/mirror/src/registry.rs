// Root registry: the mirror's copy of every open root.
//
// Each root holds an indexed tree, the version it was last synced to and a
// lifecycle state. The lock is a plain `std::sync::RwLock` and is never held
// across an await; callers only ever receive copies.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, warn};
use treesync_common::descriptor::{ChangeDescriptor, ChangeRecord, Descriptor, Snapshot};
use treesync_common::merge::apply_changes;
use treesync_common::sort::SortPolicy;
use treesync_common::tree::TreeIndex;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootState {
    /// Opened; waiting for the first snapshot.
    Loading,
    Synced,
    /// A sync job is fetching for this root.
    Updating,
    /// The last sync failed. The tree is the last good one.
    Stale,
}

#[derive(Debug, Clone)]
struct MirroredRoot {
    tree: Option<TreeIndex>,
    version: u64,
    state: RootState,
}

/// Copy of one root handed out to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootView {
    pub root_path: String,
    pub descriptor: Option<Descriptor>,
    pub version: u64,
    pub state: RootState,
}

/// Result of committing a delta.
#[derive(Debug)]
pub struct DeltaCommit {
    pub version: u64,
    /// Records that were counted but not applied.
    pub skipped: Vec<SyncError>,
}

#[derive(Debug, Default)]
struct Inner {
    roots: BTreeMap<String, MirroredRoot>,
    policy: SortPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct RootRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl RootRegistry {
    pub fn new(policy: SortPolicy) -> Self {
        Self { inner: Arc::new(RwLock::new(Inner { roots: BTreeMap::new(), policy })) }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Register `root_path` as loading. A root that is already mirrored keeps
    /// its tree. Returns `true` if the root was new.
    pub fn begin_loading(&self, root_path: &str) -> bool {
        let mut inner = self.write();
        if inner.roots.contains_key(root_path) {
            return false;
        }
        inner.roots.insert(
            root_path.to_string(),
            MirroredRoot { tree: None, version: 0, state: RootState::Loading },
        );
        debug!(root_path, "root loading");
        true
    }

    /// Insert or replace a root from a snapshot.
    pub fn insert_snapshot(&self, snapshot: Snapshot) {
        let root_path = snapshot.root_path().to_string();
        let mut inner = self.write();
        let root = Self::synced_from(snapshot, &inner.policy);
        info!(root_path = %root_path, version = root.version, "root mirrored");
        inner.roots.insert(root_path, root);
    }

    pub fn remove(&self, root_path: &str) -> bool {
        let removed = self.write().roots.remove(root_path).is_some();
        if removed {
            info!(root_path, "root removed");
        }
        removed
    }

    // ── Sync ───────────────────────────────────────────────────────

    /// Start a sync for `root_path`. Returns the version to fetch from, or
    /// `None` when the root has no tree yet and needs a snapshot.
    pub fn begin_update(&self, root_path: &str) -> Result<Option<u64>, SyncError> {
        let mut inner = self.write();
        let root = inner
            .roots
            .get_mut(root_path)
            .ok_or_else(|| SyncError::RootNotFound(root_path.to_string()))?;
        if root.tree.is_none() {
            return Ok(None);
        }
        root.state = RootState::Updating;
        Ok(Some(root.version))
    }

    /// Commit a delta fetched from `known_version`.
    ///
    /// Records without a descriptor are dropped but still count toward the
    /// new version. A delta that would not move the version forward marks the
    /// root stale; one fetched against a version the root no longer has is
    /// discarded.
    pub fn apply_delta(
        &self,
        root_path: &str,
        known_version: u64,
        records: Vec<ChangeRecord>,
    ) -> Result<DeltaCommit, SyncError> {
        let computed = known_version.checked_add(records.len() as u64);
        let mut skipped = Vec::new();
        let mut changes = Vec::with_capacity(records.len());
        for record in records {
            match ChangeDescriptor::try_from(record) {
                Ok(change) => changes.push(change),
                Err(malformed) => {
                    warn!(root_path, error = %malformed, "dropping malformed change");
                    skipped.push(SyncError::from(malformed));
                }
            }
        }

        let mut guard = self.write();
        let Inner { roots, policy } = &mut *guard;
        let root = roots
            .get_mut(root_path)
            .ok_or_else(|| SyncError::RootNotFound(root_path.to_string()))?;
        let Some(tree) = root.tree.as_mut() else {
            root.state = RootState::Stale;
            return Err(SyncError::UnexpectedDelta { root_path: root_path.to_string() });
        };

        // A version past u64::MAX cannot be newer than what is stored.
        let computed = match computed {
            Some(computed) if computed <= known_version || computed > root.version => computed,
            regressed => {
                root.state = RootState::Stale;
                return Err(SyncError::VersionRegression {
                    root_path: root_path.to_string(),
                    stored: root.version,
                    computed: regressed.unwrap_or(u64::MAX),
                });
            }
        };
        if root.version != known_version {
            if root.state == RootState::Updating {
                root.state = RootState::Synced;
            }
            return Err(SyncError::BaseVersionMismatch {
                root_path: root_path.to_string(),
                known: known_version,
                stored: root.version,
            });
        }

        let orphans = apply_changes(tree, &changes, policy);
        skipped.extend(orphans.into_iter().map(SyncError::OrphanChange));
        root.version = computed;
        root.state = RootState::Synced;
        debug!(root_path, version = computed, applied = changes.len(), "delta committed");
        Ok(DeltaCommit { version: computed, skipped })
    }

    /// Replace an existing root's tree with a snapshot. The snapshot's
    /// version is absolute.
    pub fn apply_snapshot(&self, root_path: &str, snapshot: Snapshot) -> Result<u64, SyncError> {
        let mut inner = self.write();
        if !inner.roots.contains_key(root_path) {
            return Err(SyncError::RootNotFound(root_path.to_string()));
        }
        let root = Self::synced_from(snapshot, &inner.policy);
        let version = root.version;
        inner.roots.insert(root_path.to_string(), root);
        debug!(root_path, version, "snapshot committed");
        Ok(version)
    }

    /// Keep the last synced tree and flag the root for a later resync.
    pub fn mark_stale(&self, root_path: &str) -> bool {
        match self.write().roots.get_mut(root_path) {
            Some(root) => {
                root.state = RootState::Stale;
                true
            }
            None => false,
        }
    }

    // ── Sorting ────────────────────────────────────────────────────

    /// Switch the active policy and resort every root in place.
    pub fn set_sort_policy(&self, policy: SortPolicy) {
        let mut guard = self.write();
        let Inner { roots, policy: active } = &mut *guard;
        *active = policy;
        for tree in roots.values_mut().filter_map(|root| root.tree.as_mut()) {
            tree.resort(active);
        }
    }

    pub fn sort_policy(&self) -> SortPolicy {
        self.read().policy.clone()
    }

    // ── Views ──────────────────────────────────────────────────────

    pub fn get(&self, root_path: &str) -> Option<RootView> {
        self.read().roots.get(root_path).map(|root| Self::view(root_path, root))
    }

    pub fn roots(&self) -> Vec<RootView> {
        self.read().roots.iter().map(|(path, root)| Self::view(path, root)).collect()
    }

    pub fn contains(&self, root_path: &str) -> bool {
        self.read().roots.contains_key(root_path)
    }

    /// Look up any node by absolute path across all roots.
    pub fn find(&self, path: &str) -> Option<Descriptor> {
        self.read()
            .roots
            .values()
            .filter_map(|root| root.tree.as_ref())
            .find_map(|tree| tree.get(path))
    }

    /// Every node of every root, each root in display order.
    pub fn flatten(&self) -> Vec<Descriptor> {
        self.read()
            .roots
            .values()
            .filter_map(|root| root.tree.as_ref())
            .flat_map(TreeIndex::flatten)
            .collect()
    }

    fn synced_from(snapshot: Snapshot, policy: &SortPolicy) -> MirroredRoot {
        let Snapshot { descriptor, version } = snapshot;
        let mut tree = TreeIndex::from_descriptor(descriptor);
        tree.resort(policy);
        MirroredRoot { tree: Some(tree), version, state: RootState::Synced }
    }

    fn view(root_path: &str, root: &MirroredRoot) -> RootView {
        RootView {
            root_path: root_path.to_string(),
            descriptor: root.tree.as_ref().map(TreeIndex::to_descriptor),
            version: root.version,
            state: root.state,
        }
    }

    // A poisoned registry still holds whole trees; every write completes
    // before the lock is released.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use treesync_common::descriptor::{ChangeKind, DirectoryDescriptor, FileDescriptor};
    use treesync_common::sort::{Collation, SortKind};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn file(path: &str, secs: i64) -> Descriptor {
        FileDescriptor::new(path, at(secs)).into()
    }

    fn snapshot(children: Vec<Descriptor>, version: u64) -> Snapshot {
        Snapshot {
            descriptor: DirectoryDescriptor::new("/r", at(0)).with_children(children).into(),
            version,
        }
    }

    fn child_names(registry: &RootRegistry) -> Vec<String> {
        let view = registry.get("/r").expect("root");
        view.descriptor
            .expect("tree")
            .children()
            .iter()
            .map(|child| child.name().to_string())
            .collect()
    }

    fn add(path: &str) -> ChangeRecord {
        ChangeDescriptor::add(FileDescriptor::new(path, at(1))).into()
    }

    fn synced_registry(version: u64) -> RootRegistry {
        let registry = RootRegistry::default();
        registry.insert_snapshot(snapshot(vec![file("/r/a.md", 1)], version));
        registry
    }

    #[test]
    fn inserted_snapshots_are_resorted_before_storing() {
        let registry = RootRegistry::default();
        registry.insert_snapshot(snapshot(vec![file("/r/b.md", 1), file("/r/a.md", 2)], 3));

        assert_eq!(child_names(&registry), vec!["a.md", "b.md"]);
        let view = registry.get("/r").unwrap();
        assert_eq!((view.version, view.state), (3, RootState::Synced));
    }

    #[test]
    fn loading_root_asks_for_a_snapshot() {
        let registry = RootRegistry::default();
        assert!(registry.begin_loading("/r"));
        assert!(!registry.begin_loading("/r"));
        assert_eq!(registry.begin_update("/r").unwrap(), None);
        assert_eq!(registry.get("/r").unwrap().state, RootState::Loading);
        assert!(registry.get("/r").unwrap().descriptor.is_none());
    }

    #[test]
    fn delta_advances_version_by_record_count() {
        let registry = synced_registry(5);
        assert_eq!(registry.begin_update("/r").unwrap(), Some(5));
        assert_eq!(registry.get("/r").unwrap().state, RootState::Updating);

        let commit = registry
            .apply_delta(
                "/r",
                5,
                vec![add("/r/b.md"), ChangeDescriptor::unlink("/r/a.md").into(), add("/r/c.md")],
            )
            .unwrap();

        assert_eq!(commit.version, 8);
        assert!(commit.skipped.is_empty());
        assert_eq!(child_names(&registry), vec!["b.md", "c.md"]);
        assert_eq!(registry.get("/r").unwrap().state, RootState::Synced);
    }

    #[test]
    fn malformed_and_orphan_records_are_counted_but_skipped() {
        let registry = synced_registry(1);
        let malformed =
            ChangeRecord { path: "/r/x.md".to_string(), kind: ChangeKind::Add, descriptor: None };
        let orphan = add("/r/missing/deep.md");

        let commit = registry.apply_delta("/r", 1, vec![malformed, orphan, add("/r/b.md")]).unwrap();

        assert_eq!(commit.version, 4);
        assert!(matches!(commit.skipped[0], SyncError::MalformedDelta(_)));
        assert!(matches!(commit.skipped[1], SyncError::OrphanChange(_)));
        assert_eq!(child_names(&registry), vec!["a.md", "b.md"]);
    }

    #[test]
    fn empty_delta_keeps_version_and_syncs() {
        let registry = synced_registry(7);
        registry.begin_update("/r").unwrap();
        assert_eq!(registry.apply_delta("/r", 7, Vec::new()).unwrap().version, 7);
        assert_eq!(registry.get("/r").unwrap().state, RootState::Synced);
    }

    #[test]
    fn regressing_delta_is_discarded_and_marks_stale() {
        let registry = synced_registry(10);
        let err = registry.apply_delta("/r", 4, vec![add("/r/b.md")]).unwrap_err();

        assert!(matches!(err, SyncError::VersionRegression { stored: 10, computed: 5, .. }));
        let view = registry.get("/r").unwrap();
        assert_eq!((view.version, view.state), (10, RootState::Stale));
        assert_eq!(child_names(&registry), vec!["a.md"]);
    }

    #[test]
    fn delta_from_a_replaced_base_is_discarded() {
        let registry = synced_registry(3);
        let err = registry.apply_delta("/r", 1, vec![add("/r/b.md"), add("/r/c.md"), add("/r/d.md")]);

        assert!(matches!(err, Err(SyncError::BaseVersionMismatch { known: 1, stored: 3, .. })));
        assert_eq!(registry.get("/r").unwrap().version, 3);
        assert_eq!(child_names(&registry), vec!["a.md"]);
    }

    #[test]
    fn discarded_delta_does_not_leave_the_root_updating() {
        let registry = synced_registry(3);
        assert_eq!(registry.begin_update("/r").unwrap(), Some(3));

        let err = registry.apply_delta("/r", 1, vec![add("/r/b.md"), add("/r/c.md"), add("/r/d.md")]);

        assert!(matches!(err, Err(SyncError::BaseVersionMismatch { .. })));
        let view = registry.get("/r").unwrap();
        assert_eq!((view.version, view.state), (3, RootState::Synced));
    }

    #[test]
    fn version_overflow_is_treated_as_a_regression() {
        let registry = synced_registry(3);
        registry.begin_update("/r").unwrap();

        let err = registry
            .apply_delta("/r", u64::MAX, vec![add("/r/b.md"), add("/r/c.md")])
            .unwrap_err();

        assert!(matches!(err, SyncError::VersionRegression { stored: 3, computed: u64::MAX, .. }));
        let view = registry.get("/r").unwrap();
        assert_eq!((view.version, view.state), (3, RootState::Stale));
        assert_eq!(child_names(&registry), vec!["a.md"]);
    }

    #[test]
    fn delta_for_a_loading_root_is_rejected() {
        let registry = RootRegistry::default();
        registry.begin_loading("/r");
        let err = registry.apply_delta("/r", 0, vec![add("/r/a.md")]).unwrap_err();

        assert!(matches!(err, SyncError::UnexpectedDelta { .. }));
        assert_eq!(registry.get("/r").unwrap().state, RootState::Stale);
    }

    #[test]
    fn snapshot_sets_an_absolute_version() {
        let registry = synced_registry(50);
        let version = registry.apply_snapshot("/r", snapshot(vec![file("/r/z.md", 1)], 12)).unwrap();

        assert_eq!(version, 12);
        assert_eq!(child_names(&registry), vec!["z.md"]);
    }

    #[test]
    fn commits_for_removed_roots_fail() {
        let registry = synced_registry(1);
        assert!(registry.remove("/r"));
        assert!(!registry.remove("/r"));

        assert!(matches!(registry.begin_update("/r"), Err(SyncError::RootNotFound(_))));
        assert!(matches!(
            registry.apply_snapshot("/r", snapshot(Vec::new(), 2)),
            Err(SyncError::RootNotFound(_))
        ));
        assert!(!registry.mark_stale("/r"));
    }

    #[test]
    fn policy_change_resorts_every_root() {
        let registry = RootRegistry::default();
        let tree = DirectoryDescriptor::new("/r", at(0))
            .with_sort_kind(SortKind::TimeDown)
            .with_children(vec![file("/r/new.md", 9), file("/r/old.md", 1)]);
        registry.insert_snapshot(Snapshot { descriptor: tree.into(), version: 1 });
        assert_eq!(child_names(&registry), vec!["old.md", "new.md"]);

        let nested = DirectoryDescriptor::new("/r/sub", at(0));
        registry.insert_snapshot(Snapshot {
            descriptor: DirectoryDescriptor::new("/q", at(0))
                .with_children(vec![file("/q/B.md", 1), nested.into(), file("/q/a.md", 1)])
                .into(),
            version: 1,
        });

        let policy = SortPolicy { collation: Collation::Ascii, folders_first: false, ..SortPolicy::default() };
        registry.set_sort_policy(policy.clone());

        assert_eq!(registry.sort_policy(), policy);
        let q = registry.get("/q").unwrap().descriptor.unwrap();
        let names: Vec<&str> = q.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a.md", "B.md", "sub"]);
    }

    #[test]
    fn find_and_flatten_span_all_roots() {
        let registry = synced_registry(1);
        registry.insert_snapshot(Snapshot {
            descriptor: DirectoryDescriptor::new("/q", at(0))
                .with_children(vec![file("/q/n.md", 1)])
                .into(),
            version: 1,
        });

        assert_eq!(registry.find("/q/n.md").map(|d| d.name().to_string()), Some("n.md".into()));
        assert!(registry.find("/nowhere.md").is_none());

        let paths: Vec<String> = registry.flatten().iter().map(|d| d.path().to_string()).collect();
        assert_eq!(paths, vec!["/q", "/q/n.md", "/r", "/r/a.md"]);
        assert_eq!(registry.roots().len(), 2);
    }
}
