// treesync-common: tree model, sort policy, merge engine and wire protocol
// shared by the daemon and its mirrors.

pub mod descriptor;
pub mod markdown;
pub mod merge;
pub mod path;
pub mod protocol;
pub mod sort;
pub mod tree;
