//! Detection history store
//!
//! Bounded, most-recent-first list of inference results that carried at
//! least one detection. The synchronizer is the only writer; readers take
//! cheap snapshots of shared entries and can watch the revision counter to
//! learn when the contents changed.

use liveview_values::HistoryEntry;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

/// Most-recent-first detection history
#[derive(Debug)]
pub struct HistoryStore {
    entries: RwLock<VecDeque<Arc<HistoryEntry>>>,
    capacity: usize,
    revision: watch::Sender<u64>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            revision,
        }
    }

    /// Insert an entry, keeping newest first and evicting the oldest past
    /// capacity. Returns `false` if an entry with the same id is already stored.
    pub fn push(&self, entry: HistoryEntry) -> bool {
        {
            let mut entries = self.entries.write();
            if entries.iter().any(|e| e.id == entry.id) {
                return false;
            }

            // Late frames land behind newer ones
            let position = entries
                .iter()
                .position(|e| e.timestamp < entry.timestamp)
                .unwrap_or(entries.len());
            entries.insert(position, Arc::new(entry));

            while entries.len() > self.capacity {
                if let Some(evicted) = entries.pop_back() {
                    tracing::trace!("History full, evicting {}", evicted.id);
                }
            }
        }

        self.revision.send_modify(|r| *r += 1);
        true
    }

    /// Entries, newest first
    pub fn snapshot(&self) -> Vec<Arc<HistoryEntry>> {
        self.entries.read().iter().cloned().collect()
    }

    /// Newest entry
    pub fn latest(&self) -> Option<Arc<HistoryEntry>> {
        self.entries.read().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every entry
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.write();
            let removed = entries.len();
            entries.clear();
            removed
        };

        if removed > 0 {
            tracing::debug!("Cleared {} history entries", removed);
            self.revision.send_modify(|r| *r += 1);
        }
    }

    /// Revision counter, bumped on every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}
