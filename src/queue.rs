//! Event buffer with amortized compaction
//!
//! Events are appended at the tail and consumed by advancing a head offset.
//! The consumed prefix is dropped in one `drain` once the offset passes the
//! watermark, instead of shifting the buffer on every pop. Under sustained
//! high-rate sources (pointer moves, progress ticks) this keeps each pop O(1)
//! amortized.

use crate::types::DEFAULT_MAX_QUEUE_SIZE;

/// Ordered buffer of events awaiting consumption
#[derive(Debug)]
pub struct EventQueue<E> {
    /// Consumed slots are `None` until compaction drops them
    items: Vec<Option<E>>,
    head: usize,
    max_queue_size: usize,
}

impl<E> EventQueue<E> {
    /// Create a queue that compacts once more than `max_queue_size` events
    /// have been consumed
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            items: Vec::new(),
            head: 0,
            max_queue_size,
        }
    }

    /// Append an event at the tail
    pub fn push(&mut self, event: E) {
        self.items.push(Some(event));
    }

    /// Take the oldest unconsumed event
    pub fn pop(&mut self) -> Option<E> {
        let event = self.items.get_mut(self.head)?.take();
        self.head += 1;

        if self.head > self.max_queue_size {
            self.items.drain(..self.head);
            tracing::trace!(
                remaining = self.items.len(),
                "Event buffer compacted"
            );
            self.head = 0;
        }

        event
    }

    /// Number of unconsumed events
    pub fn len(&self) -> usize {
        self.items.len() - self.head
    }

    /// Whether no unconsumed event is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots held, consumed prefix included
    pub fn capacity_used(&self) -> usize {
        self.items.len()
    }

    /// The compaction watermark
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Drop every buffered event and reset the offset
    pub fn clear(&mut self) {
        self.items.clear();
        self.head = 0;
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = EventQueue::new(100);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_empty() {
        let mut queue: EventQueue<u32> = EventQueue::default();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.capacity_used(), 0);
    }

    #[test]
    fn test_consumed_prefix_kept_until_watermark() {
        let mut queue = EventQueue::new(3);
        for i in 0..6 {
            queue.push(i);
        }

        for expected in 0..3 {
            assert_eq!(queue.pop(), Some(expected));
        }
        assert_eq!(queue.capacity_used(), 6);
        assert_eq!(queue.len(), 3);

        // Fourth pop crosses the watermark and drops the prefix
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.capacity_used(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_trim_never_drops_or_reorders() {
        let max = 100;
        let mut queue = EventQueue::new(max);
        for i in 0..=max {
            queue.push(i);
        }

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, (0..=max).collect::<Vec<_>>());
        assert!(queue.is_empty());
        assert_eq!(queue.capacity_used(), 0);
    }

    #[test]
    fn test_interleaved_push_pop_across_compaction() {
        let mut queue = EventQueue::new(2);
        let mut next_in = 0;
        let mut out = Vec::new();

        for _ in 0..10 {
            queue.push(next_in);
            queue.push(next_in + 1);
            next_in += 2;
            out.push(queue.pop().unwrap());
        }
        while let Some(v) = queue.pop() {
            out.push(v);
        }

        assert_eq!(out, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_watermark_compacts_every_pop() {
        let mut queue = EventQueue::new(0);
        queue.push('a');
        queue.push('b');
        assert_eq!(queue.pop(), Some('a'));
        assert_eq!(queue.capacity_used(), 1);
        assert_eq!(queue.pop(), Some('b'));
        assert_eq!(queue.capacity_used(), 0);
    }

    #[test]
    fn test_clear() {
        let mut queue = EventQueue::new(10);
        queue.push(1);
        queue.push(2);
        queue.pop();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity_used(), 0);
        assert_eq!(queue.pop(), None);
    }
}
