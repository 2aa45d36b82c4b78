//! Pending items ordered by priority, first-come-first-served within a priority

use super::item::QueueItem;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry: highest priority first, then lowest enqueue sequence
#[derive(Debug)]
struct PendingEntry {
    seq: u64,
    item: QueueItem,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.item
            .priority
            .cmp(&other.item.priority)
            // BinaryHeap is a max-heap: the earlier sequence must compare greater
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<PendingEntry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: QueueItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PendingEntry { seq, item });
    }

    /// Remove the highest-priority item
    pub fn pop(&mut self) -> Option<QueueItem> {
        self.heap.pop().map(|entry| entry.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn find(&self, id: &str) -> Option<&QueueItem> {
        self.heap.iter().map(|e| &e.item).find(|item| item.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandParser;
    use serde_json::json;

    fn item(id: &str, priority: i64) -> QueueItem {
        let command = CommandParser::parse(&json!({"kind": "SCREENSHOT"})).unwrap();
        QueueItem::new(id.into(), command, priority, 0)
    }

    fn drain(queue: &mut PendingQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop()).map(|i| i.id).collect()
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PendingQueue::new();
        queue.push(item("a", 5));
        queue.push(item("b", 10));
        assert_eq!(drain(&mut queue), vec!["b", "a"]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = PendingQueue::new();
        for id in ["a", "c", "d", "e", "f", "g", "h"] {
            queue.push(item(id, 5));
        }
        assert_eq!(
            drain(&mut queue),
            vec!["a", "c", "d", "e", "f", "g", "h"]
        );
    }

    #[test]
    fn test_mixed_bands_and_negative_priorities() {
        let mut queue = PendingQueue::new();
        queue.push(item("low-1", -1));
        queue.push(item("mid-1", 0));
        queue.push(item("high-1", 9));
        queue.push(item("mid-2", 0));
        queue.push(item("low-2", -1));
        queue.push(item("high-2", 9));

        assert_eq!(queue.len(), 6);
        assert!(queue.find("mid-2").is_some());
        assert_eq!(
            drain(&mut queue),
            vec!["high-1", "high-2", "mid-1", "mid-2", "low-1", "low-2"]
        );
        assert_eq!(queue.len(), 0);
    }
}
