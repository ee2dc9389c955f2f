//! Bounded FIFO used for per-stream packet buffering
//!
//! The queue itself is not synchronised; the demuxer keeps both of its
//! queues under one lock together with the EOF and stop flags so that every
//! wait condition is evaluated atomically.

use std::collections::VecDeque;

/// Default capacity of a per-stream packet queue
pub const DEFAULT_PACKET_QUEUE_CAPACITY: usize = 256;

/// Fixed-capacity FIFO
#[derive(Debug)]
pub struct PacketQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> PacketQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, handing it back when the queue is full
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove the oldest item
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued item
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
