// Event debouncer for the watcher pipeline.
//
// Coalesces bursts of events on the same path. A path becomes ready once it
// has been quiet for `window`, or once `max_wait` has passed since its first
// event so that a file under constant modification still gets flushed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::{FsEventKind, RawFsEvent};

const DEFAULT_WINDOW_MS: u64 = 100;
const MIN_WINDOW_MS: u64 = 20;
const MAX_WINDOW_MS: u64 = 2_000;
/// `max_wait` as a multiple of the quiet window.
const MAX_WAIT_FACTOR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub window: Duration,
    pub max_wait: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::with_millis(DEFAULT_WINDOW_MS)
    }
}

impl DebounceConfig {
    /// Window in milliseconds, clamped to [20, 2000].
    pub fn with_millis(ms: u64) -> Self {
        let window = Duration::from_millis(ms.clamp(MIN_WINDOW_MS, MAX_WINDOW_MS));
        Self { window, max_wait: window * MAX_WAIT_FACTOR }
    }
}

struct Pending {
    kind: FsEventKind,
    first_seen: Instant,
    last_seen: Instant,
}

impl Pending {
    fn ready_at(&self, config: &DebounceConfig) -> Instant {
        (self.last_seen + config.window).min(self.first_seen + config.max_wait)
    }
}

pub struct Debouncer {
    config: DebounceConfig,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self { config, pending: HashMap::new() }
    }

    pub fn push(&mut self, event: RawFsEvent) {
        self.push_at(event, Instant::now());
    }

    pub(crate) fn push_at(&mut self, event: RawFsEvent, now: Instant) {
        match self.pending.get_mut(&event.path) {
            Some(pending) => {
                // A file created inside the window is still a creation.
                if !(pending.kind == FsEventKind::Create && event.kind == FsEventKind::Modify) {
                    pending.kind = event.kind;
                }
                pending.last_seen = now;
            }
            None => {
                self.pending
                    .insert(event.path, Pending { kind: event.kind, first_seen: now, last_seen: now });
            }
        }
    }

    /// Remove and return every ready event, ordered by path so that parent
    /// directories come before their contents.
    pub fn drain_ready(&mut self) -> Vec<RawFsEvent> {
        self.drain_ready_at(Instant::now())
    }

    pub(crate) fn drain_ready_at(&mut self, now: Instant) -> Vec<RawFsEvent> {
        let config = self.config;
        let mut ready = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.ready_at(&config) <= now {
                ready.push(RawFsEvent { kind: pending.kind, path: path.clone() });
                false
            } else {
                true
            }
        });
        ready.sort_by(|a, b| a.path.cmp(&b.path));
        ready
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest instant at which some pending event becomes ready.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.ready_at(&self.config)).min()
    }
}
