//! The bus's priority queue.
//!
//! Entries are ordered by descending priority, then ascending sequence
//! number. The sequence is assigned under the queue lock at push time, so it
//! is strictly increasing and equal-priority messages keep publish order
//! without ever comparing payloads.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use concerto_contracts::message::Message;

struct QueuedMessage {
    priority: u8,
    sequence: u64,
    message: Message,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then the earlier sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedMessage>,
    next_sequence: u64,
}

/// Blocking max-priority queue of bus messages.
pub(crate) struct MessageQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl MessageQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue `message` and return the sequence number it was assigned.
    pub(crate) fn push(&self, message: Message) -> u64 {
        let mut state = self.state.lock().expect("bus queue lock poisoned");
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(QueuedMessage {
            priority: message.priority,
            sequence,
            message,
        });
        drop(state);
        self.available.notify_one();
        sequence
    }

    /// Pop the highest-priority message, waiting up to `timeout` for one.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<Message> {
        let state = self.state.lock().expect("bus queue lock poisoned");
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.heap.is_empty())
            .expect("bus queue lock poisoned");
        state.heap.pop().map(|entry| entry.message)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().expect("bus queue lock poisoned").heap.len()
    }

    /// Wake every waiter so it can re-check shutdown.
    pub(crate) fn wake_all(&self) {
        self.available.notify_all();
    }
}
