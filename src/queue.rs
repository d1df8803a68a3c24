use std::cmp::Ordering;

use crate::types::{AssetId, BatchId};

/// A pending dispatch ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub asset: AssetId,
    pub priority: i32,
    pub batch: BatchId,
}

/// Priority descending, then asset id ascending.
fn dispatch_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.asset.cmp(&b.asset))
}

/// Pending load entries, kept in dispatch order after every `sort`.
///
/// Pushes append without ordering so that a whole intake can be enqueued and
/// then sorted once.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<QueueEntry>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.entries.push(entry);
    }

    pub fn sort(&mut self) {
        self.entries.sort_by(dispatch_order);
    }

    /// Remove and return the best entry.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Raise the priority of the entry for `asset` if `priority` is higher.
    /// Returns true if an entry was raised. The caller re-sorts.
    pub fn raise_priority(&mut self, asset: AssetId, priority: i32, batch: BatchId) -> bool {
        match self.entries.iter_mut().find(|e| e.asset == asset) {
            Some(entry) if priority > entry.priority => {
                entry.priority = priority;
                entry.batch = batch;
                true
            }
            _ => false,
        }
    }

    /// Drop every entry, returning the assets that were queued.
    pub fn clear(&mut self) -> Vec<AssetId> {
        self.entries.drain(..).map(|e| e.asset).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
