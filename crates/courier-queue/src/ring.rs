//! Capacity-bounded circular buffer.

/// FIFO ring with a fixed capacity.
///
/// When full, `push` overwrites the oldest element: the new value takes the
/// tail slot, the tail advances and the head is moved onto it. The ring stays
/// at capacity and the caller is not told that an element was dropped.
#[derive(Debug)]
pub struct RingStore<T> {
    buf: Vec<Option<T>>,
    /// Next read.
    head: usize,
    /// Next write.
    tail: usize,
    len: usize,
}

impl<T> RingStore<T> {
    /// Create a ring. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        let capacity = self.buf.len();
        self.buf[self.tail] = Some(value);
        self.tail = (self.tail + 1) % capacity;
        if self.len == capacity {
            self.head = self.tail;
        } else {
            self.len += 1;
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.buf[self.head].take();
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        value
    }

    pub fn peek(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.buf[self.head].as_ref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.buf.len();
        (0..self.len).filter_map(move |i| self.buf[(self.head + i) % capacity].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo() {
        let mut ring = RingStore::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);

        ring.push(1);
        ring.push(2);
        assert_eq!(ring.peek(), Some(&1));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn overflow_evicts_only_the_oldest() {
        let capacity = 4;
        let mut ring = RingStore::new(capacity);
        for i in 1..=capacity + 1 {
            ring.push(i);
        }

        assert_eq!(ring.len(), capacity);
        assert!(ring.is_full());
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert_eq!(ring.peek(), Some(&2));
    }

    #[test]
    fn overflow_keeps_order_across_many_wraps() {
        let mut ring = RingStore::new(3);
        for i in 0..10 {
            ring.push(i);
        }
        assert_eq!(ring.pop(), Some(7));
        ring.push(10);
        ring.push(11);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![9, 10, 11]);
    }

    #[test]
    fn wraps_after_partial_drain() {
        let mut ring = RingStore::new(2);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.pop(), Some("a"));
        ring.push("c");
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(ring.pop(), Some("b"));
        assert_eq!(ring.pop(), Some("c"));
        assert!(ring.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut ring = RingStore::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pop(), Some(2));
    }
}
