// Tree merge: apply an ordered change list to a tree.
//
// Changes are applied strictly in list order; later entries may depend on
// earlier ones (unlink then re-add of the same path). A change that cannot
// be applied is skipped and reported, never fatal.

use tracing::{debug, warn};

use crate::descriptor::{ChangeDescriptor, Descriptor};
use crate::sort::SortPolicy;
use crate::tree::{MergeError, TreeIndex};

/// Outcome of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub tree: Descriptor,
    pub applied: usize,
    pub skipped: Vec<MergeError>,
}

/// Apply `changes` to a copy of `tree`. The input is never mutated.
pub fn merge(changes: &[ChangeDescriptor], tree: &Descriptor, policy: &SortPolicy) -> Descriptor {
    merge_with_report(changes, tree, policy).tree
}

pub fn merge_with_report(
    changes: &[ChangeDescriptor],
    tree: &Descriptor,
    policy: &SortPolicy,
) -> MergeReport {
    let mut index = TreeIndex::from_descriptor(tree.clone());
    let skipped = apply_changes(&mut index, changes, policy);
    MergeReport { tree: index.to_descriptor(), applied: changes.len() - skipped.len(), skipped }
}

/// Apply `changes` in order to an indexed tree, logging and collecting the
/// ones that had to be skipped.
pub fn apply_changes(
    index: &mut TreeIndex,
    changes: &[ChangeDescriptor],
    policy: &SortPolicy,
) -> Vec<MergeError> {
    let mut skipped = Vec::new();
    for change in changes {
        match index.apply(change, policy) {
            Ok(()) => debug!(path = change.path(), kind = %change.kind(), "applied change"),
            Err(error) => {
                warn!(path = change.path(), kind = %change.kind(), %error, "skipping change");
                skipped.push(error);
            }
        }
    }
    skipped
}
