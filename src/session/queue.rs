//! Bounded per-agent FIFO message queue (§4.4, back-pressure resolution).
//!
//! A broadcast sender must never block on a slow listener, so the
//! queue drops its oldest entry once `max_depth` is reached rather than
//! rejecting the push — the Open Question resolution recorded in
//! SPEC_FULL.md §4.4 and DESIGN.md.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Default bound on a session's message queue depth.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 256;

/// A message delivered to a session's queue, either by broadcast or
/// directed `@mention`.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Sender's agent name.
    pub from: String,
    /// Message body.
    pub content: String,
    /// Whether this was a directed mention rather than a broadcast.
    pub mention: bool,
    /// Delivery timestamp.
    pub ts: DateTime<Utc>,
}

/// A bounded FIFO queue with drop-oldest back-pressure.
#[derive(Debug)]
pub struct MessageQueue {
    inner: VecDeque<QueuedMessage>,
    max_depth: usize,
    overflow_count: u64,
}

impl MessageQueue {
    /// A queue bounded at `max_depth` entries.
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: VecDeque::with_capacity(max_depth.min(64)),
            max_depth,
            overflow_count: 0,
        }
    }

    /// Push a message, dropping the oldest entry if already at capacity.
    pub fn push(&mut self, message: QueuedMessage) {
        if self.inner.len() >= self.max_depth {
            self.inner.pop_front();
            self.overflow_count += 1;
        }
        self.inner.push_back(message);
    }

    /// Pop the oldest message, if any.
    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.inner.pop_front()
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue currently holds no messages.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Total messages dropped to back-pressure since this session began.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str) -> QueuedMessage {
        QueuedMessage {
            from: from.to_string(),
            content: "hi".to_string(),
            mention: false,
            ts: Utc::now(),
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut q = MessageQueue::new(4);
        q.push(msg("a"));
        q.push(msg("b"));
        assert_eq!(q.pop().unwrap().from, "a");
        assert_eq!(q.pop().unwrap().from, "b");
        assert!(q.pop().is_none());
    }

    #[test]
    fn drops_oldest_once_full() {
        let mut q = MessageQueue::new(2);
        q.push(msg("a"));
        q.push(msg("b"));
        q.push(msg("c"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.overflow_count(), 1);
        assert_eq!(q.pop().unwrap().from, "b");
        assert_eq!(q.pop().unwrap().from, "c");
    }
}
