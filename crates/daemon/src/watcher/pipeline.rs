// Watcher pipeline: FS event → debounce → descriptor → change history.
//
// Turns debounced filesystem events into recorded changes on the root store
// and announces each touched root once per batch.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use treesync_common::protocol::tree::RootNotification;

use crate::scan::{describe_path, describe_shallow, path_key};
use crate::store::RootStore;

use super::debounce::{DebounceConfig, Debouncer};
use super::RawFsEvent;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub debounce: DebounceConfig,
    /// How often to check the debouncer when no events arrive.
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { debounce: DebounceConfig::default(), poll_interval: Duration::from_millis(50) }
    }
}

/// What a single event did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EventOutcome {
    Ignored,
    Changed(String),
    RootRemoved(String),
}

/// Runs until `raw_rx` closes or `shutdown` fires.
pub async fn run_pipeline(
    mut raw_rx: mpsc::Receiver<RawFsEvent>,
    store: Arc<RwLock<RootStore>>,
    notifier: broadcast::Sender<RootNotification>,
    config: PipelineConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut debouncer = Debouncer::new(config.debounce);
    info!("watcher pipeline started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("watcher pipeline shutting down");
                break;
            }

            maybe_event = raw_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        trace!(path = %event.path.display(), kind = ?event.kind, "raw event received");
                        debouncer.push(event);
                    }
                    None => {
                        info!("raw event channel closed, pipeline exiting");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep(config.poll_interval) => {}
        }

        let ready = debouncer.drain_ready();
        if ready.is_empty() {
            continue;
        }
        for notification in process_batch(&ready, &store).await {
            debug!(root_path = notification.root_path(), method = notification.method(), "announcing root update");
            // No subscribers is not an error.
            let _ = notifier.send(notification);
        }
    }
}

/// Apply a batch of debounced events and return one notification per
/// touched root.
pub async fn process_batch(events: &[RawFsEvent], store: &RwLock<RootStore>) -> Vec<RootNotification> {
    let mut changed = BTreeSet::new();
    let mut removed = BTreeSet::new();
    {
        let mut store = store.write().await;
        for event in events {
            match apply_event(&mut store, &event.path) {
                Ok(EventOutcome::Ignored) => {}
                Ok(EventOutcome::Changed(root)) => {
                    changed.insert(root);
                }
                Ok(EventOutcome::RootRemoved(root)) => {
                    removed.insert(root);
                }
                Err(error) => {
                    warn!(path = %event.path.display(), error = %error, "pipeline error");
                }
            }
        }
    }

    let mut notifications: Vec<RootNotification> = changed
        .into_iter()
        .filter(|root| !removed.contains(root))
        .map(|root_path| RootNotification::RootChanged { root_path })
        .collect();
    notifications.extend(removed.into_iter().map(|root_path| RootNotification::RootRemoved { root_path }));
    notifications
}

/// The current filesystem state of `path` decides the change, so renames and
/// out-of-order create/remove bursts resolve correctly.
fn apply_event(store: &mut RootStore, path: &Path) -> Result<EventOutcome> {
    let key = path_key(path)?;
    let Some(root) = store.root_for(&key).map(str::to_string) else {
        trace!(path = %key, "event outside every open root");
        return Ok(EventOutcome::Ignored);
    };

    let recorded = if store.tracks(&root, &key) {
        match describe_shallow(path)? {
            Some(descriptor) => store.upsert(&root, descriptor)?,
            None if key == root => {
                store.close(&root);
                return Ok(EventOutcome::RootRemoved(root));
            }
            None => store.remove(&root, &key)?,
        }
    } else {
        // New path: add the highest missing ancestor with its whole subtree.
        let target = store.first_untracked_ancestor(&root, &key).to_string();
        match describe_path(Path::new(&target))? {
            Some(descriptor) => store.upsert(&root, descriptor)?,
            None => None,
        }
    };

    Ok(match recorded {
        Some(version) => {
            debug!(root_path = %root, path = %key, version, "recorded change");
            EventOutcome::Changed(root)
        }
        None => EventOutcome::Ignored,
    })
}
