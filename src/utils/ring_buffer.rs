// Fixed-capacity line log; the oldest entry is dropped on overflow
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Copy of the contents in insertion order
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Copy of the newest `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_capacity_items_in_order() {
        let mut buffer = RingBuffer::new(3);
        for i in 0..10 {
            buffer.push(format!("line {}", i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.snapshot(), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_snapshot_does_not_drain() {
        let mut buffer = RingBuffer::new(4);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.snapshot(), vec![1, 2]);
        assert_eq!(buffer.snapshot(), vec![1, 2]);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_tail_limits_from_the_newest_end() {
        let mut buffer = RingBuffer::new(200);
        for i in 0..50 {
            buffer.push(i);
        }
        assert_eq!(buffer.tail(3), vec![47, 48, 49]);
        assert_eq!(buffer.tail(500).len(), 50);
    }

    #[test]
    fn test_zero_capacity_holds_nothing() {
        let mut buffer = RingBuffer::new(0);
        buffer.push("x");
        assert!(buffer.is_empty());
    }
}
