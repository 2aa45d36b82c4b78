//! Bounded record of terminal queue items, newest first

use super::item::QueueItem;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct History {
    items: VecDeque<QueueItem>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Record a terminal item, evicting the oldest entry when full
    ///
    /// Returns the evicted item, if any.
    pub fn record(&mut self, item: QueueItem) -> Option<QueueItem> {
        debug_assert!(item.status.is_terminal());
        self.items.push_front(item);
        if self.items.len() > self.capacity {
            self.items.pop_back()
        } else {
            None
        }
    }

    /// Up to `limit` items, most recently finished first
    pub fn recent(&self, limit: usize) -> Vec<QueueItem> {
        self.items.iter().take(limit).cloned().collect()
    }

    /// Forget every recorded item, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let purged = self.items.len();
        self.items.clear();
        purged
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn find(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }
}
