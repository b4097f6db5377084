//! Thread-safe link statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by the send, receive and liveness paths
#[derive(Debug, Default)]
pub struct LinkStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    reconnections: AtomicU64,
    errors: AtomicU64,
    retransmissions: AtomicU64,
    duplicates: AtomicU64,
    heartbeats_sent: AtomicU64,
    delivery_failures: AtomicU64,
    last_rtt_micros: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// DATA envelopes transmitted for the first time
    pub messages_sent: u64,
    /// DATA envelopes delivered to the application
    pub messages_received: u64,
    /// ACK envelopes written
    pub acks_sent: u64,
    /// ACK envelopes read
    pub acks_received: u64,
    /// Successful connections after the first one
    pub reconnections: u64,
    /// Transport and protocol errors
    pub errors: u64,
    /// DATA envelopes written again after a timeout or reconnect
    pub retransmissions: u64,
    /// DATA envelopes dropped as duplicates
    pub duplicates: u64,
    /// HEARTBEAT envelopes written
    pub heartbeats_sent: u64,
    /// Messages that exhausted their retry budget
    pub delivery_failures: u64,
    /// Most recent heartbeat round-trip time in microseconds (0 if none yet)
    pub last_rtt_micros: u64,
}

impl LinkStats {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a first DATA transmission
    pub fn inc_messages_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a DATA envelope delivered to the application
    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an ACK written
    pub fn inc_acks_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an ACK read
    pub fn inc_acks_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful reconnection
    pub fn inc_reconnections(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transport or protocol error
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a duplicate DATA envelope
    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a HEARTBEAT written
    pub fn inc_heartbeats_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a message that exhausted its retries
    pub fn inc_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `count` retransmissions
    pub fn add_retransmissions(&self, count: u64) {
        self.retransmissions.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the latest heartbeat round-trip time
    pub fn record_rtt(&self, rtt: Duration) {
        self.last_rtt_micros
            .store(rtt.as_micros() as u64, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            last_rtt_micros: self.last_rtt_micros.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_reflects_increments() {
        let stats = LinkStats::new();
        stats.inc_messages_sent();
        stats.inc_messages_sent();
        stats.inc_acks_received();
        stats.add_retransmissions(3);
        stats.record_rtt(Duration::from_millis(2));

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.acks_received, 1);
        assert_eq!(snap.retransmissions, 3);
        assert_eq!(snap.last_rtt_micros, 2_000);
        assert_eq!(snap.errors, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(LinkStats::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.inc_messages_sent();
                        stats.inc_acks_received();
                        stats.inc_heartbeats_sent();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 8000);
        assert_eq!(snap.acks_received, 8000);
        assert_eq!(snap.heartbeats_sent, 8000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(LinkStats::new().snapshot()).unwrap();
        assert_eq!(json["messages_sent"], 0);
        assert_eq!(json["reconnections"], 0);
    }
}
