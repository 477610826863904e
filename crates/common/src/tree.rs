// Arena-backed workspace tree.
//
// Nodes live in a flat slot vector; a path index gives O(1) lookup and each
// node keeps its parent and ordered child ids. The nested `Descriptor` form
// is rebuilt on demand for display and for the wire.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::descriptor::{ChangeDescriptor, Descriptor};
use crate::path::parent_path;
use crate::sort::{SortKind, SortPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A change that could not be applied. The change is skipped; the tree is
/// left as it was before that change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("no node at `{path}` to change")]
    OrphanChange { path: String },

    #[error("parent `{parent}` of `{path}` is not in the tree")]
    MissingParent { path: String, parent: String },

    #[error("parent `{parent}` of `{path}` is not a directory")]
    ParentNotDirectory { path: String, parent: String },

    #[error("`{path}` already exists in the tree")]
    DuplicatePath { path: String },

    #[error("change for `{path}` carries a descriptor for `{descriptor_path}`")]
    PathMismatch { path: String, descriptor_path: String },
}

impl MergeError {
    pub fn path(&self) -> &str {
        match self {
            Self::OrphanChange { path }
            | Self::MissingParent { path, .. }
            | Self::ParentNotDirectory { path, .. }
            | Self::DuplicatePath { path }
            | Self::PathMismatch { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    /// Directories are stored with empty `children`; `child_ids` is canonical.
    descriptor: Descriptor,
    parent: Option<NodeId>,
    child_ids: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct TreeIndex {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    by_path: HashMap<String, NodeId>,
    root: NodeId,
}

impl TreeIndex {
    /// Index a nested descriptor. Duplicate paths inside the input keep the
    /// first occurrence.
    pub fn from_descriptor(descriptor: Descriptor) -> Self {
        let mut index = Self {
            slots: Vec::with_capacity(descriptor.node_count()),
            free: Vec::new(),
            by_path: HashMap::new(),
            root: NodeId(0),
        };
        index.root = index.insert_subtree(descriptor, None);
        index
    }

    /// Rebuild the nested form.
    pub fn to_descriptor(&self) -> Descriptor {
        self.build(self.root)
    }

    pub fn root_path(&self) -> &str {
        self.node(self.root).descriptor.path()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Nested copy of the subtree at `path`.
    pub fn get(&self, path: &str) -> Option<Descriptor> {
        self.by_path.get(path).map(|id| self.build(*id))
    }

    /// Every node's own descriptor (directories without children), in
    /// display order.
    pub fn flatten(&self) -> Vec<Descriptor> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            out.push(node.descriptor.clone());
            stack.extend(node.child_ids.iter().rev().copied());
        }
        out
    }

    /// Apply a single change. On error the tree is unchanged.
    pub fn apply(&mut self, change: &ChangeDescriptor, policy: &SortPolicy) -> Result<(), MergeError> {
        match change {
            ChangeDescriptor::Change { path, descriptor } => {
                self.replace(path, descriptor, policy)
            }
            ChangeDescriptor::Add { path, descriptor } => self.add(path, descriptor, policy),
            ChangeDescriptor::Unlink { path } => {
                self.unlink(path);
                Ok(())
            }
        }
    }

    /// Resort every directory with its own sort kind.
    pub fn resort(&mut self, policy: &SortPolicy) {
        let dirs: Vec<NodeId> = self
            .by_path
            .values()
            .copied()
            .filter(|id| self.node(*id).descriptor.is_directory())
            .collect();
        for id in dirs {
            self.sort_children(id, policy);
        }
    }

    fn replace(&mut self, path: &str, incoming: &Descriptor, policy: &SortPolicy) -> Result<(), MergeError> {
        check_path(path, incoming)?;
        let id = *self
            .by_path
            .get(path)
            .ok_or_else(|| MergeError::OrphanChange { path: path.to_string() })?;

        let (own, _ignored_children) = incoming.clone().detach_children();
        let was_directory = self.node(id).descriptor.is_directory();
        if was_directory && !own.is_directory() {
            let orphaned = std::mem::take(&mut self.node_mut(id).child_ids);
            for child in orphaned {
                self.remove_subtree(child);
            }
        }
        self.node_mut(id).descriptor = own;

        // The directory's own sort kind may have changed.
        self.sort_children(id, policy);
        if let Some(parent) = self.node(id).parent {
            self.sort_children(parent, policy);
        }
        Ok(())
    }

    fn add(&mut self, path: &str, incoming: &Descriptor, policy: &SortPolicy) -> Result<(), MergeError> {
        check_path(path, incoming)?;
        let parent_str = parent_path(path).ok_or_else(|| MergeError::MissingParent {
            path: path.to_string(),
            parent: String::new(),
        })?;
        let parent = *self.by_path.get(parent_str).ok_or_else(|| MergeError::MissingParent {
            path: path.to_string(),
            parent: parent_str.to_string(),
        })?;
        if !self.node(parent).descriptor.is_directory() {
            return Err(MergeError::ParentNotDirectory {
                path: path.to_string(),
                parent: parent_str.to_string(),
            });
        }
        if self.by_path.contains_key(path) {
            return Err(MergeError::DuplicatePath { path: path.to_string() });
        }

        let id = self.insert_subtree(incoming.clone(), Some(parent));
        self.node_mut(parent).child_ids.push(id);
        self.sort_children(parent, policy);
        Ok(())
    }

    fn unlink(&mut self, path: &str) {
        let Some(id) = self.by_path.get(path).copied() else {
            return;
        };
        let Some(parent) = self.node(id).parent else {
            // The root itself is only replaced through a snapshot.
            return;
        };
        self.node_mut(parent).child_ids.retain(|child| *child != id);
        self.remove_subtree(id);
    }

    fn sort_children(&mut self, id: NodeId, policy: &SortPolicy) {
        let kind = match &self.node(id).descriptor {
            Descriptor::Directory(dir) => dir.sort_kind,
            _ => return,
        };
        let sorted = self.sorted_ids(&self.node(id).child_ids, kind, policy);
        self.node_mut(id).child_ids = sorted;
    }

    fn sorted_ids(&self, ids: &[NodeId], kind: SortKind, policy: &SortPolicy) -> Vec<NodeId> {
        let items: Vec<(NodeId, &Descriptor)> =
            ids.iter().map(|id| (*id, &self.node(*id).descriptor)).collect();
        policy.sort_by_descriptor(items, kind, |(_, descriptor)| *descriptor).into_iter().map(|(id, _)| id).collect()
    }

    fn insert_subtree(&mut self, descriptor: Descriptor, parent: Option<NodeId>) -> NodeId {
        let (own, children) = descriptor.detach_children();
        let path = own.path().to_string();
        let id = self.alloc(Node { descriptor: own, parent, child_ids: Vec::new() });
        self.by_path.insert(path, id);

        let mut child_ids = Vec::with_capacity(children.len());
        for child in children {
            if self.by_path.contains_key(child.path()) {
                warn!(path = child.path(), "duplicate path in subtree, keeping first occurrence");
                continue;
            }
            child_ids.push(self.insert_subtree(child, Some(id)));
        }
        self.node_mut(id).child_ids = child_ids;
        id
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.slots[current.0].take() {
                self.by_path.remove(node.descriptor.path());
                stack.extend(node.child_ids);
                self.free.push(current.0);
            }
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    fn build(&self, id: NodeId) -> Descriptor {
        let node = self.node(id);
        let mut descriptor = node.descriptor.clone();
        if let Some(dir) = descriptor.as_directory_mut() {
            dir.children = node.child_ids.iter().map(|child| self.build(*child)).collect();
        }
        descriptor
    }

    fn node(&self, id: NodeId) -> &Node {
        self.slots[id.0].as_ref().expect("tree index references a freed slot")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0].as_mut().expect("tree index references a freed slot")
    }
}

fn check_path(path: &str, descriptor: &Descriptor) -> Result<(), MergeError> {
    if descriptor.path() == path {
        Ok(())
    } else {
        Err(MergeError::PathMismatch {
            path: path.to_string(),
            descriptor_path: descriptor.path().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::descriptor::{DirectoryDescriptor, FileDescriptor};
    use crate::sort::Collation;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn policy() -> SortPolicy {
        SortPolicy { collation: Collation::Ascii, ..SortPolicy::default() }
    }

    fn file(path: &str) -> FileDescriptor {
        FileDescriptor::new(path, at(0))
    }

    fn sample() -> Descriptor {
        DirectoryDescriptor::new("/root", at(0))
            .with_children(vec![
                DirectoryDescriptor::new("/root/sub", at(0))
                    .with_children(vec![file("/root/sub/inner.md").into()])
                    .into(),
                file("/root/a.md").into(),
                file("/root/b.md").into(),
            ])
            .into()
    }

    fn child_names(descriptor: &Descriptor) -> Vec<&str> {
        descriptor.children().iter().map(Descriptor::name).collect()
    }

    #[test]
    fn round_trips_nested_descriptor() {
        let tree = sample();
        let index = TreeIndex::from_descriptor(tree.clone());
        assert_eq!(index.len(), 5);
        assert_eq!(index.root_path(), "/root");
        assert_eq!(index.to_descriptor(), tree);
    }

    #[test]
    fn add_inserts_sorted_into_parent() {
        let mut index = TreeIndex::from_descriptor(sample());
        index.apply(&ChangeDescriptor::add(file("/root/aa.md")), &policy()).unwrap();
        assert_eq!(child_names(&index.to_descriptor()), ["sub", "a.md", "aa.md", "b.md"]);
    }

    #[test]
    fn add_directory_indexes_its_subtree() {
        let mut index = TreeIndex::from_descriptor(sample());
        let dir = DirectoryDescriptor::new("/root/new", at(0))
            .with_children(vec![file("/root/new/deep.md").into()]);
        index.apply(&ChangeDescriptor::add(dir), &policy()).unwrap();
        assert!(index.contains("/root/new/deep.md"));
        index.apply(&ChangeDescriptor::add(file("/root/new/other.md")), &policy()).unwrap();
        assert_eq!(child_names(&index.get("/root/new").unwrap()), ["deep.md", "other.md"]);
    }

    #[test]
    fn add_rejects_missing_parent_and_duplicates() {
        let mut index = TreeIndex::from_descriptor(sample());
        let before = index.to_descriptor();

        let missing = index.apply(&ChangeDescriptor::add(file("/root/nope/x.md")), &policy());
        assert_eq!(
            missing,
            Err(MergeError::MissingParent { path: "/root/nope/x.md".into(), parent: "/root/nope".into() })
        );

        let duplicate = index.apply(&ChangeDescriptor::add(file("/root/a.md")), &policy());
        assert_eq!(duplicate, Err(MergeError::DuplicatePath { path: "/root/a.md".into() }));

        let under_file = index.apply(&ChangeDescriptor::add(file("/root/a.md/x.md")), &policy());
        assert!(matches!(under_file, Err(MergeError::ParentNotDirectory { .. })));

        assert_eq!(index.to_descriptor(), before);
    }

    #[test]
    fn change_directory_preserves_children() {
        let mut index = TreeIndex::from_descriptor(sample());
        let renamed = DirectoryDescriptor::new("/root/sub", at(99)).with_sort_kind(SortKind::TimeUp);
        index.apply(&ChangeDescriptor::change(renamed), &policy()).unwrap();

        let sub = index.get("/root/sub").unwrap();
        assert_eq!(sub.modification_time(), at(99));
        assert_eq!(sub.as_directory().unwrap().sort_kind, SortKind::TimeUp);
        assert_eq!(child_names(&sub), ["inner.md"]);
    }

    #[test]
    fn change_directory_ignores_incoming_children() {
        let mut index = TreeIndex::from_descriptor(sample());
        let payload = DirectoryDescriptor::new("/root/sub", at(1))
            .with_children(vec![file("/root/sub/bogus.md").into()]);
        index.apply(&ChangeDescriptor::change(payload), &policy()).unwrap();
        assert!(!index.contains("/root/sub/bogus.md"));
        assert!(index.contains("/root/sub/inner.md"));
    }

    #[test]
    fn change_file_replaces_wholesale_and_resorts() {
        let mut index = TreeIndex::from_descriptor(sample());
        let policy = SortPolicy { display_name: crate::sort::DisplayName::Title, ..policy() };
        let retitled = file("/root/a.md").with_title("zzz");
        index.apply(&ChangeDescriptor::change(retitled.clone()), &policy).unwrap();
        let tree = index.to_descriptor();
        assert_eq!(child_names(&tree), ["sub", "b.md", "a.md"]);
        assert_eq!(tree.find("/root/a.md"), Some(&Descriptor::File(retitled)));
    }

    #[test]
    fn change_of_unknown_path_is_orphan() {
        let mut index = TreeIndex::from_descriptor(sample());
        let result = index.apply(&ChangeDescriptor::change(file("/root/ghost.md")), &policy());
        assert_eq!(result, Err(MergeError::OrphanChange { path: "/root/ghost.md".into() }));
    }

    #[test]
    fn change_directory_into_file_drops_subtree() {
        let mut index = TreeIndex::from_descriptor(sample());
        index.apply(&ChangeDescriptor::change(file("/root/sub")), &policy()).unwrap();
        assert!(!index.contains("/root/sub/inner.md"));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn unlink_removes_subtree_and_is_idempotent() {
        let mut index = TreeIndex::from_descriptor(sample());
        index.apply(&ChangeDescriptor::unlink("/root/sub"), &policy()).unwrap();
        assert!(!index.contains("/root/sub/inner.md"));
        let once = index.to_descriptor();
        index.apply(&ChangeDescriptor::unlink("/root/sub"), &policy()).unwrap();
        assert_eq!(index.to_descriptor(), once);
    }

    #[test]
    fn slots_are_reused_after_unlink() {
        let mut index = TreeIndex::from_descriptor(sample());
        index.apply(&ChangeDescriptor::unlink("/root/a.md"), &policy()).unwrap();
        index.apply(&ChangeDescriptor::add(file("/root/c.md")), &policy()).unwrap();
        assert_eq!(index.slots.len(), 5);
        assert_eq!(child_names(&index.to_descriptor()), ["sub", "b.md", "c.md"]);
    }

    #[test]
    fn mismatched_descriptor_path_is_rejected() {
        let mut index = TreeIndex::from_descriptor(sample());
        let change = ChangeDescriptor::Add {
            path: "/root/c.md".into(),
            descriptor: file("/root/d.md").into(),
        };
        assert!(matches!(index.apply(&change, &policy()), Err(MergeError::PathMismatch { .. })));
    }

    #[test]
    fn flatten_lists_nodes_in_display_order() {
        let index = TreeIndex::from_descriptor(sample());
        let paths: Vec<String> = index.flatten().iter().map(|d| d.path().to_string()).collect();
        assert_eq!(paths, ["/root", "/root/sub", "/root/sub/inner.md", "/root/a.md", "/root/b.md"]);
        assert!(index.flatten()[1].children().is_empty());
    }

    #[test]
    fn resort_applies_new_policy_everywhere() {
        let mut index = TreeIndex::from_descriptor(sample());
        let folders_last = SortPolicy { folders_first: false, ..policy() };
        index.resort(&folders_last);
        assert_eq!(child_names(&index.to_descriptor()), ["a.md", "b.md", "sub"]);
    }

    #[test]
    fn single_file_root_accepts_change_only() {
        let mut index = TreeIndex::from_descriptor(file("/notes.md").into());
        let updated = file("/notes.md").with_heading("Hello");
        index.apply(&ChangeDescriptor::change(updated.clone()), &policy()).unwrap();
        assert_eq!(index.to_descriptor(), Descriptor::File(updated));

        index.apply(&ChangeDescriptor::unlink("/notes.md"), &policy()).unwrap();
        assert_eq!(index.len(), 1);
    }
}
