//! Bounded window of recently acknowledged envelope ids.

use std::collections::{HashSet, VecDeque};

/// FIFO set of acknowledged ids. The oldest id is evicted once the window
/// exceeds its capacity.
#[derive(Debug)]
pub struct DedupWindow {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record an id. Re-inserting an id already in the window is a no-op.
    pub fn insert(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_over_capacity() {
        let mut window = DedupWindow::new(2);
        window.insert("a");
        window.insert("b");
        window.insert("c");

        assert_eq!(window.len(), 2);
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
    }

    #[test]
    fn duplicate_insert_does_not_consume_capacity() {
        let mut window = DedupWindow::new(2);
        window.insert("a");
        window.insert("a");
        window.insert("b");

        assert_eq!(window.len(), 2);
        assert!(window.contains("a"));
    }
}
