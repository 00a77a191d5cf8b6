//! Inbound line queue
//!
//! Bounded FIFO of the most recent raw lines received from the controller.
//! The reader thread pushes every complete line; request/response style
//! callers (the VEK diagnostic) drain it looking for their answer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use super::INBOUND_QUEUE_CAPACITY;

#[derive(Debug)]
struct Shared {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    arrived: Notify,
}

/// Shared, bounded queue of raw inbound lines (oldest evicted first)
#[derive(Debug, Clone)]
pub struct InboundQueue {
    shared: Arc<Shared>,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new(INBOUND_QUEUE_CAPACITY)
    }
}

impl InboundQueue {
    /// Create a queue holding at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                lines: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                arrived: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.shared
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a line, returning the evicted oldest line when full
    pub fn push(&self, line: impl Into<String>) -> Option<String> {
        let evicted = {
            let mut lines = self.lock();
            let evicted = if lines.len() >= self.shared.capacity {
                lines.pop_front()
            } else {
                None
            };
            lines.push_back(line.into());
            evicted
        };
        self.shared.arrived.notify_one();
        evicted
    }

    /// Pop lines from the front until `matcher` accepts one.
    ///
    /// Lines examined before the match are consumed; lines after it stay
    /// queued. Returns `None` (with the queue emptied) when nothing matched.
    pub fn take_first<T>(&self, mut matcher: impl FnMut(&str) -> Option<T>) -> Option<T> {
        let mut lines = self.lock();
        while let Some(line) = lines.pop_front() {
            if let Some(found) = matcher(&line) {
                return Some(found);
            }
        }
        None
    }

    /// Wait until a push happens (or a stored wake-up is pending)
    pub async fn arrived(&self) {
        self.shared.arrived.notified().await
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no line is queued
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of lines kept
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Copy of the queued lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Drop every queued line
    pub fn clear(&self) {
        self.lock().clear();
    }
}
