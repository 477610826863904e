// Bounded trailing change history with an absolute version counter.
//
// Every recorded change bumps the version by one. Only the last `capacity`
// changes are retained; a reader whose version predates the window must be
// answered with a snapshot instead.

use std::collections::VecDeque;

use treesync_common::descriptor::ChangeDescriptor;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
pub struct ChangeHistory {
    changes: VecDeque<ChangeDescriptor>,
    capacity: usize,
    version: u64,
}

impl Default for ChangeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ChangeHistory {
    pub fn new(capacity: usize) -> Self {
        Self::with_version(capacity, 0)
    }

    /// Empty history whose window starts (and ends) at `version`.
    pub fn with_version(capacity: usize, version: u64) -> Self {
        let capacity = capacity.max(1);
        Self { changes: VecDeque::with_capacity(capacity.min(256)), capacity, version }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Oldest version a reader may hold and still receive a delta.
    pub fn oldest_retained(&self) -> u64 {
        self.version - self.changes.len() as u64
    }

    /// Append a change and return the new version.
    pub fn record(&mut self, change: ChangeDescriptor) -> u64 {
        if self.changes.len() == self.capacity {
            self.changes.pop_front();
        }
        self.changes.push_back(change);
        self.version += 1;
        self.version
    }

    /// Drop every retained change and move the window to a fresh version.
    /// Readers at any earlier version will be sent a snapshot.
    pub fn reset(&mut self) -> u64 {
        self.changes.clear();
        self.version += 1;
        self.version
    }

    /// Changes recorded after `since`, oldest first. `None` when `since` is
    /// outside the retained window (too old, or ahead of this history).
    pub fn changes_since(&self, since: u64) -> Option<Vec<ChangeDescriptor>> {
        let oldest = self.oldest_retained();
        if since < oldest || since > self.version {
            return None;
        }
        let skip = (since - oldest) as usize;
        Some(self.changes.iter().skip(skip).cloned().collect())
    }
}
