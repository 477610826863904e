// Tree node descriptors and the change-feed records exchanged between the
// daemon and its mirrors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::file_name;
use crate::sort::SortKind;

/// A node in a workspace tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Descriptor {
    File(FileDescriptor),
    Code(CodeDescriptor),
    Other(OtherDescriptor),
    Directory(DirectoryDescriptor),
}

/// A markdown or prose file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: String,
    pub name: String,
    pub modification_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    pub size: u64,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub char_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    /// Title from the front matter, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// First level-1 heading, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

/// A source code file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeDescriptor {
    pub path: String,
    pub name: String,
    pub modification_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    pub size: u64,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub char_count: u64,
    pub extension: String,
}

/// Any other file (images, PDFs, binaries).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtherDescriptor {
    pub path: String,
    pub name: String,
    pub modification_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    pub size: u64,
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryDescriptor {
    pub path: String,
    pub name: String,
    pub modification_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<Descriptor>,
    /// Child ordering persisted in the directory's settings file.
    #[serde(default)]
    pub sort_kind: SortKind,
}

impl Descriptor {
    pub fn path(&self) -> &str {
        match self {
            Self::File(file) => &file.path,
            Self::Code(code) => &code.path,
            Self::Other(other) => &other.path,
            Self::Directory(dir) => &dir.path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Code(code) => &code.name,
            Self::Other(other) => &other.name,
            Self::Directory(dir) => &dir.name,
        }
    }

    pub fn modification_time(&self) -> DateTime<Utc> {
        match self {
            Self::File(file) => file.modification_time,
            Self::Code(code) => code.modification_time,
            Self::Other(other) => other.modification_time,
            Self::Directory(dir) => dir.modification_time,
        }
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        match self {
            Self::File(file) => file.creation_time,
            Self::Code(code) => code.creation_time,
            Self::Other(other) => other.creation_time,
            Self::Directory(dir) => dir.creation_time,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::File(file) => file.title.as_deref(),
            _ => None,
        }
    }

    pub fn heading(&self) -> Option<&str> {
        match self {
            Self::File(file) => file.heading.as_deref(),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryDescriptor> {
        match self {
            Self::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryDescriptor> {
        match self {
            Self::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    /// Child descriptors; empty for file-like variants.
    pub fn children(&self) -> &[Descriptor] {
        match self {
            Self::Directory(dir) => &dir.children,
            _ => &[],
        }
    }

    /// Splits a directory into its own fields and its children.
    pub fn detach_children(mut self) -> (Descriptor, Vec<Descriptor>) {
        let children = match &mut self {
            Self::Directory(dir) => std::mem::take(&mut dir.children),
            _ => Vec::new(),
        };
        (self, children)
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(Descriptor::node_count).sum::<usize>()
    }

    /// Depth-first search for `path` within this subtree.
    pub fn find(&self, path: &str) -> Option<&Descriptor> {
        if self.path() == path {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(path))
    }
}

impl FileDescriptor {
    pub fn new(path: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path).to_string(),
            path,
            modification_time: modified,
            creation_time: modified,
            size: 0,
            word_count: 0,
            char_count: 0,
            tags: Vec::new(),
            links: Vec::new(),
            title: None,
            heading: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }
}

impl DirectoryDescriptor {
    pub fn new(path: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path).to_string(),
            path,
            modification_time: modified,
            creation_time: modified,
            children: Vec::new(),
            sort_kind: SortKind::default(),
        }
    }

    pub fn with_children(mut self, children: Vec<Descriptor>) -> Self {
        self.children = children;
        self
    }

    pub fn with_sort_kind(mut self, sort_kind: SortKind) -> Self {
        self.sort_kind = sort_kind;
        self
    }
}

impl From<FileDescriptor> for Descriptor {
    fn from(value: FileDescriptor) -> Self {
        Self::File(value)
    }
}

impl From<CodeDescriptor> for Descriptor {
    fn from(value: CodeDescriptor) -> Self {
        Self::Code(value)
    }
}

impl From<OtherDescriptor> for Descriptor {
    fn from(value: OtherDescriptor) -> Self {
        Self::Other(value)
    }
}

impl From<DirectoryDescriptor> for Descriptor {
    fn from(value: DirectoryDescriptor) -> Self {
        Self::Directory(value)
    }
}

// ── Change feed ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

impl ChangeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filesystem-level event against a root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "ChangeRecord", try_from = "ChangeRecord")]
pub enum ChangeDescriptor {
    Add { path: String, descriptor: Descriptor },
    Change { path: String, descriptor: Descriptor },
    Unlink { path: String },
}

impl ChangeDescriptor {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Change { path, .. } | Self::Unlink { path } => path,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Change { .. } => ChangeKind::Change,
            Self::Unlink { .. } => ChangeKind::Unlink,
        }
    }

    pub fn add(descriptor: impl Into<Descriptor>) -> Self {
        let descriptor = descriptor.into();
        Self::Add { path: descriptor.path().to_string(), descriptor }
    }

    pub fn change(descriptor: impl Into<Descriptor>) -> Self {
        let descriptor = descriptor.into();
        Self::Change { path: descriptor.path().to_string(), descriptor }
    }

    pub fn unlink(path: impl Into<String>) -> Self {
        Self::Unlink { path: path.into() }
    }
}

/// Wire shape of a change: `descriptor` is required for `add`/`change` and
/// absent for `unlink`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRecord {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedChange {
    #[error("`{kind}` change for `{path}` is missing its descriptor")]
    MissingDescriptor { path: String, kind: ChangeKind },
}

impl From<ChangeDescriptor> for ChangeRecord {
    fn from(change: ChangeDescriptor) -> Self {
        match change {
            ChangeDescriptor::Add { path, descriptor } => {
                Self { path, kind: ChangeKind::Add, descriptor: Some(descriptor) }
            }
            ChangeDescriptor::Change { path, descriptor } => {
                Self { path, kind: ChangeKind::Change, descriptor: Some(descriptor) }
            }
            ChangeDescriptor::Unlink { path } => {
                Self { path, kind: ChangeKind::Unlink, descriptor: None }
            }
        }
    }
}

impl TryFrom<ChangeRecord> for ChangeDescriptor {
    type Error = MalformedChange;

    fn try_from(record: ChangeRecord) -> Result<Self, Self::Error> {
        let ChangeRecord { path, kind, descriptor } = record;
        match (kind, descriptor) {
            (ChangeKind::Unlink, _) => Ok(Self::Unlink { path }),
            (ChangeKind::Add, Some(descriptor)) => Ok(Self::Add { path, descriptor }),
            (ChangeKind::Change, Some(descriptor)) => Ok(Self::Change { path, descriptor }),
            (kind, None) => Err(MalformedChange::MissingDescriptor { path, kind }),
        }
    }
}

// ── Snapshots ──────────────────────────────────────────────────────

/// Full, absolute replacement for a root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub descriptor: Descriptor,
    pub version: u64,
}

impl Snapshot {
    pub fn root_path(&self) -> &str {
        self.descriptor.path()
    }
}

/// Answer to `tree.changes_since`. The two shapes are told apart by JSON
/// shape alone: an array is a delta, an object is a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChangesSince {
    Changes(Vec<ChangeRecord>),
    Snapshot(Snapshot),
}
