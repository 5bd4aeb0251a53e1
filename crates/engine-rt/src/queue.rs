use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use thiserror::Error;

/// Errors from a bounded SPSC/MPSC handoff between the control and realtime
/// threads.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
}

/// A bounded, lock-free, allocation-free-after-construction queue. Used for
/// transport mutations (control -> RT), processor messages (control -> RT)
/// and anything else crossing the control/audio boundary that fits in a
/// fixed-capacity ring.
#[derive(Clone)]
pub struct EventQueue<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            queue: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    pub fn try_push(&self, value: T) -> Result<(), QueueError> {
        self.queue.push(value).map_err(|_| QueueError::Full)
    }

    pub fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.pop().ok_or(QueueError::Empty)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips() {
        let queue: EventQueue<u32> = EventQueue::new(4);
        queue.try_push(7).unwrap();
        assert_eq!(queue.try_pop().unwrap(), 7);
        assert_eq!(queue.try_pop(), Err(QueueError::Empty));
    }

    #[test]
    fn full_queue_rejects_push() {
        let queue: EventQueue<u32> = EventQueue::new(2);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        assert_eq!(queue.try_push(3), Err(QueueError::Full));
    }

    #[test]
    fn clone_shares_the_same_backing_queue() {
        let queue: EventQueue<u32> = EventQueue::new(2);
        let handle = queue.clone();
        queue.try_push(5).unwrap();
        assert_eq!(handle.try_pop().unwrap(), 5);
    }
}
