// File watcher: fsevents/inotify → debounce → descriptor → change history.
// This module handles the first stage: raw FS event detection and filtering.

pub mod debounce;
pub mod pipeline;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::config::DIR_SETTINGS_FILE;

/// Raw filesystem event emitted by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Create,
    Modify,
    Remove,
}

/// A raw filesystem event for a single path inside a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

/// Capacity for the shared raw event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Watches one root recursively with the OS-native backend and forwards
/// filtered events to a channel shared by all roots. Stops when dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    pub fn start(root: &Path, tx: mpsc::Sender<RawFsEvent>) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to canonicalize watch root: {}", root.display()))?;

        let root_for_filter = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for raw in translate_event(&event, &root_for_filter) {
                        if tx.blocking_send(raw).is_err() {
                            debug!("event channel closed, stopping event dispatch");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "file watcher error");
                }
            }
        })
        .context("failed to create file watcher")?;

        let mode = if root.is_dir() { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        watcher
            .watch(&root, mode)
            .with_context(|| format!("failed to watch: {}", root.display()))?;

        debug!(path = %root.display(), "file watcher started");
        Ok(Self { _watcher: watcher, root })
    }

    /// The canonicalized root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map an event path to the tree path it affects. Edits to a directory's
/// settings file surface as a change of the directory itself; other hidden
/// entries and anything outside the root are dropped.
fn tree_path(path: &Path, root: &Path) -> Option<PathBuf> {
    let Ok(relative) = path.strip_prefix(root) else {
        warn!(path = %path.display(), "ignoring event outside watch root (possible symlink escape)");
        return None;
    };

    if path.file_name().is_some_and(|name| name == DIR_SETTINGS_FILE) {
        return path.parent().map(Path::to_path_buf);
    }

    let hidden = relative
        .components()
        .any(|component| component.as_os_str().to_string_lossy().starts_with('.'));
    if hidden {
        trace!(path = %path.display(), "skipping hidden path");
        return None;
    }
    Some(path.to_path_buf())
}

/// Translate a `notify::Event` into zero or more `RawFsEvent`s.
fn translate_event(event: &Event, root: &Path) -> Vec<RawFsEvent> {
    let kind = match &event.kind {
        EventKind::Create(_) => FsEventKind::Create,
        EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => {
            trace!("skipping metadata-only modify event");
            return Vec::new();
        }
        // Renames are resolved downstream by checking whether the path exists.
        EventKind::Modify(_) => FsEventKind::Modify,
        EventKind::Remove(_) => FsEventKind::Remove,
        _ => {
            trace!(kind = ?event.kind, "skipping non-content event");
            return Vec::new();
        }
    };

    let settings_edit = |path: &PathBuf| path.file_name().is_some_and(|name| name == DIR_SETTINGS_FILE);
    event
        .paths
        .iter()
        .filter_map(|path| {
            let target = tree_path(path, root)?;
            // Creating or removing the settings file still only modifies its directory.
            let kind = if settings_edit(path) { FsEventKind::Modify } else { kind };
            Some(RawFsEvent { kind, path: target })
        })
        .collect()
}
