//! Receiver-side duplicate suppression.
//!
//! Retransmissions mean the same DATA id can arrive more than once. The
//! window remembers the most recent ids so a repeat is re-ACKed without
//! being delivered to the application again.

use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Bounded set of recently delivered DATA ids
#[derive(Debug)]
pub struct DedupWindow {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl DedupWindow {
    /// Create a window remembering up to `capacity` ids; zero disables suppression
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`, returning `true` if it was not seen recently
    pub fn insert(&mut self, id: u64) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.seen.insert(id) {
            return false;
        }

        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
                trace!("Dedup window evicted id {}", evicted);
            }
        }
        true
    }

    /// Whether `id` is currently remembered
    pub fn contains(&self, id: u64) -> bool {
        self.seen.contains(&id)
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no id is remembered
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
