//! Pending-acknowledgment tracking and retransmission scheduling.
//!
//! The tracker owns every DATA envelope that has been written but not yet
//! acknowledged. It performs no I/O: callers write the envelopes it hands
//! back and report ACKs and clock ticks to it.

use link_wire::Envelope;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retransmission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first retransmission
    pub base_timeout: Duration,
    /// Cap on the wait between retransmissions
    pub max_interval: Duration,
    /// Total transmissions allowed per message
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Wait after transmission number `attempts` (1-based):
    /// `base_timeout * 2^(attempts-1)`, capped at `max_interval`
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        self.base_timeout
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

/// Bookkeeping for one unacknowledged DATA envelope
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// The envelope awaiting an ACK
    pub envelope: Envelope,
    /// Transmissions so far
    pub attempts: u32,
    /// Instant after which the envelope is retransmitted
    pub next_deadline: Instant,
}

/// Result of a [`PendingTracker::tick`]
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Envelopes to write again, in id order
    pub retransmit: Vec<Envelope>,
    /// Ids that exhausted their attempts and were dropped, in id order
    pub failed: Vec<u64>,
}

/// Map of in-flight DATA envelopes keyed by id
#[derive(Debug)]
pub struct PendingTracker {
    entries: HashMap<u64, PendingEntry>,
    policy: RetryPolicy,
}

impl PendingTracker {
    /// Create an empty tracker
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
        }
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start tracking a freshly sent envelope, returning the copy to write
    pub fn track(&mut self, mut envelope: Envelope, now: Instant) -> Envelope {
        envelope.touch();
        let id = envelope.id();
        let entry = PendingEntry {
            envelope: envelope.clone(),
            attempts: 1,
            next_deadline: now + self.policy.delay_for(1),
        };

        if self.entries.insert(id, entry).is_some() {
            warn!("Message {} was already pending; tracking restarted", id);
        }
        debug!("Tracking message {} ({} pending)", id, self.entries.len());
        envelope
    }

    /// Remove the entry acknowledged by `id`.
    ///
    /// Unknown and repeated ids are ignored.
    pub fn on_ack(&mut self, id: u64) -> Option<PendingEntry> {
        let entry = self.entries.remove(&id);
        match &entry {
            Some(e) => debug!("Message {} acknowledged after {} attempt(s)", id, e.attempts),
            None => debug!("Ignoring ACK for unknown message {}", id),
        }
        entry
    }

    /// Retransmit or fail every entry whose deadline has passed
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let policy = self.policy;

        for (id, entry) in self.entries.iter_mut() {
            if entry.next_deadline > now {
                continue;
            }

            if entry.attempts >= policy.max_attempts {
                outcome.failed.push(*id);
                continue;
            }

            entry.attempts += 1;
            entry.next_deadline = now + policy.delay_for(entry.attempts);
            entry.envelope.touch();
            debug!(
                "Retransmitting message {} (attempt {}/{})",
                id, entry.attempts, policy.max_attempts
            );
            outcome.retransmit.push(entry.envelope.clone());
        }

        for id in &outcome.failed {
            self.entries.remove(id);
            warn!(
                "Message {} failed after {} attempts without ACK",
                id, policy.max_attempts
            );
        }

        outcome.retransmit.sort_by_key(|e| e.id());
        outcome.failed.sort_unstable();
        outcome
    }

    /// Reset every entry to its first attempt and return them for
    /// retransmission on a new connection, in id order
    pub fn replay(&mut self, now: Instant) -> Vec<Envelope> {
        let first_deadline = now + self.policy.delay_for(1);
        let mut envelopes: Vec<Envelope> = self
            .entries
            .values_mut()
            .map(|entry| {
                entry.attempts = 1;
                entry.next_deadline = first_deadline;
                entry.envelope.touch();
                entry.envelope.clone()
            })
            .collect();
        envelopes.sort_by_key(|e| e.id());
        envelopes
    }

    /// Remove every entry, returning their ids in order
    pub fn drain(&mut self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.entries.drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    /// Look up a pending entry
    pub fn get(&self, id: u64) -> Option<&PendingEntry> {
        self.entries.get(&id)
    }

    /// Whether `id` is pending
    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
