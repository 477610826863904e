// Filesystem scanner: builds descriptors for roots, directories and files.

use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use treesync_common::descriptor::{
    CodeDescriptor, Descriptor, DirectoryDescriptor, FileDescriptor, OtherDescriptor,
};
use treesync_common::markdown::extract_metadata;
use treesync_common::path::{extension, file_name, normalize_path};
use walkdir::WalkDir;

use crate::config::DirectorySettings;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdown", "txt"];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "c", "h", "cc", "cpp", "hpp", "java", "kt",
    "swift", "rb", "php", "cs", "sh", "bash", "zsh", "lua", "sql", "html", "css", "scss", "json",
    "yaml", "yml", "toml", "xml", "tex", "r", "jl", "hs", "ex", "exs", "scala", "clj",
];

/// How a file is represented in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Markdown,
    Code,
    Other,
}

pub fn classify(path: &str) -> FileClass {
    let ext = extension(path);
    if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::Markdown
    } else if CODE_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::Code
    } else {
        FileClass::Other
    }
}

/// Hidden entries (dotfiles, including the directory settings file) are not
/// part of the tree.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Tree key for a filesystem path.
pub fn path_key(path: &Path) -> Result<String> {
    normalize_path(&path.to_string_lossy())
        .with_context(|| format!("path cannot be used as a tree key: {}", path.display()))
}

/// Scan `root` into a full descriptor tree. Children are left unsorted.
pub fn scan_root(root: &Path) -> Result<Descriptor> {
    let metadata =
        fs::metadata(root).with_context(|| format!("failed to stat root {}", root.display()))?;
    if metadata.is_dir() {
        scan_directory(root, &metadata).map(Descriptor::Directory)
    } else {
        describe_file(root, &metadata)
    }
}

/// Describe a single path. Directories are scanned with their whole
/// subtree. Returns `Ok(None)` when the path no longer exists.
pub fn describe_path(path: &Path) -> Result<Option<Descriptor>> {
    match fs::metadata(path) {
        Ok(_) => scan_root(path).map(Some),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => {
            Err(error).with_context(|| format!("failed to stat {}", path.display()))
        }
    }
}

/// Like [`describe_path`] but directories come back without children, for
/// paths whose subtree is already known.
pub fn describe_shallow(path: &Path) -> Result<Option<Descriptor>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to stat {}", path.display()))
        }
    };
    if metadata.is_dir() {
        directory_node(path, &metadata).map(|dir| Some(Descriptor::Directory(dir)))
    } else {
        describe_file(path, &metadata).map(Some)
    }
}

fn directory_node(dir: &Path, metadata: &Metadata) -> Result<DirectoryDescriptor> {
    let key = path_key(dir)?;
    let (modified, created) = timestamps(metadata);
    let mut descriptor = DirectoryDescriptor::new(key, modified)
        .with_sort_kind(DirectorySettings::load(dir).sort);
    descriptor.creation_time = created;
    Ok(descriptor)
}

fn scan_directory(dir: &Path, metadata: &Metadata) -> Result<DirectoryDescriptor> {
    let mut descriptor = directory_node(dir, metadata)?;

    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(&entry.file_name().to_string_lossy()));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(dir = %dir.display(), %error, "skipping unreadable entry");
                continue;
            }
        };
        if entry.path_is_symlink() {
            debug!(path = %entry.path().display(), "skipping symlink");
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!(path = %entry.path().display(), %error, "skipping entry without metadata");
                continue;
            }
        };

        let child = if metadata.is_dir() {
            scan_directory(entry.path(), &metadata).map(Descriptor::Directory)
        } else {
            describe_file(entry.path(), &metadata)
        };
        match child {
            Ok(child) => descriptor.children.push(child),
            Err(error) => warn!(path = %entry.path().display(), error = %error, "skipping entry"),
        }
    }

    Ok(descriptor)
}

fn describe_file(path: &Path, metadata: &Metadata) -> Result<Descriptor> {
    let key = path_key(path)?;
    let (modified, created) = timestamps(metadata);
    let size = metadata.len();

    let descriptor = match classify(&key) {
        FileClass::Markdown => {
            let content = read_text(path)?;
            let meta = extract_metadata(&content);
            Descriptor::File(FileDescriptor {
                creation_time: created,
                size,
                word_count: meta.word_count,
                char_count: meta.char_count,
                tags: meta.tags,
                links: meta.links,
                title: meta.title,
                heading: meta.heading,
                ..FileDescriptor::new(key, modified)
            })
        }
        FileClass::Code => {
            let content = read_text(path)?;
            Descriptor::Code(CodeDescriptor {
                name: file_name(&key).to_string(),
                extension: extension(&key),
                path: key,
                modification_time: modified,
                creation_time: created,
                size,
                word_count: content.split_whitespace().count() as u64,
                char_count: content.chars().count() as u64,
            })
        }
        FileClass::Other => Descriptor::Other(OtherDescriptor {
            name: file_name(&key).to_string(),
            extension: extension(&key),
            path: key,
            modification_time: modified,
            creation_time: created,
            size,
        }),
    };
    Ok(descriptor)
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Modification and creation time. Platforms without a birth time report
/// the modification time for both.
fn timestamps(metadata: &Metadata) -> (DateTime<Utc>, DateTime<Utc>) {
    let modified = metadata.modified().map(to_utc).unwrap_or_else(|_| Utc::now());
    let created = metadata.created().map(to_utc).unwrap_or(modified);
    (modified, created)
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DIR_SETTINGS_FILE;
    use tempfile::TempDir;
    use treesync_common::sort::SortKind;

    fn names(descriptor: &Descriptor) -> Vec<&str> {
        descriptor.children().iter().map(Descriptor::name).collect()
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(classify("/r/notes.md"), FileClass::Markdown);
        assert_eq!(classify("/r/NOTES.MD"), FileClass::Markdown);
        assert_eq!(classify("/r/main.rs"), FileClass::Code);
        assert_eq!(classify("/r/photo.png"), FileClass::Other);
        assert_eq!(classify("/r/Makefile"), FileClass::Other);
    }

    #[test]
    fn scans_nested_tree_and_skips_hidden_entries() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("a.md"), "---\ntitle: Alpha\n---\n# Heading\nhello #tag [[b]]").unwrap();
        fs::write(root.join("sub").join("lib.rs"), "fn main() {}").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join(".hidden.md"), "secret").unwrap();

        let tree = scan_root(&root).unwrap();
        assert_eq!(tree.path(), path_key(&root).unwrap());
        assert_eq!(names(&tree), vec!["a.md", "image.png", "sub"]);

        let Some(Descriptor::File(file)) = tree.find(&path_key(&root.join("a.md")).unwrap()) else {
            panic!("a.md should be a markdown file");
        };
        assert_eq!(file.title.as_deref(), Some("Alpha"));
        assert_eq!(file.heading.as_deref(), Some("Heading"));
        assert_eq!(file.tags, vec!["tag".to_string()]);
        assert_eq!(file.links, vec!["b".to_string()]);

        let code_path = path_key(&root.join("sub").join("lib.rs")).unwrap();
        let Some(Descriptor::Code(code)) = tree.find(&code_path) else {
            panic!("lib.rs should be code");
        };
        assert_eq!(code.extension, "rs");
        assert_eq!(code.word_count, 3);

        assert!(matches!(
            tree.find(&path_key(&root.join("image.png")).unwrap()),
            Some(Descriptor::Other(other)) if other.size == 3
        ));
    }

    #[test]
    fn directory_sort_kind_comes_from_settings_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("journal")).unwrap();
        fs::write(root.join("journal").join(DIR_SETTINGS_FILE), "sort = \"time-down\"").unwrap();

        let tree = scan_root(&root).unwrap();
        let journal = tree.find(&path_key(&root.join("journal")).unwrap()).unwrap();
        assert_eq!(journal.as_directory().map(|dir| dir.sort_kind), Some(SortKind::TimeDown));
        assert!(journal.children().is_empty(), "settings file must not appear as a child");
    }

    #[test]
    fn describe_missing_path_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(describe_path(&tmp.path().join("gone.md")).unwrap().is_none());
    }

    #[test]
    fn shallow_directory_has_no_children() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        let descriptor = describe_shallow(&root).unwrap().unwrap();
        assert!(descriptor.is_directory());
        assert!(descriptor.children().is_empty());
        assert_eq!(describe_path(&root).unwrap().unwrap().children().len(), 1);
    }

    #[test]
    fn describe_single_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().canonicalize().unwrap().join("one.md");
        fs::write(&path, "# One").unwrap();
        let descriptor = describe_path(&path).unwrap().unwrap();
        assert_eq!(descriptor.heading(), Some("One"));
        assert!(!descriptor.is_directory());
    }
}
