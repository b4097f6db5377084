//! Heartbeat-based liveness detection with RTT measurement.
//!
//! The monitor is driven by the supervisor's heartbeat timer. Each tick
//! either produces the next HEARTBEAT to send or reports the peer as
//! unreachable once enough consecutive heartbeats went unanswered.

use link_wire::Envelope;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long an unanswered heartbeat is kept for late RTT samples
const OUTSTANDING_RETENTION: Duration = Duration::from_secs(60);

/// Verdict of a heartbeat tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// Peer still considered alive; send this heartbeat
    Heartbeat(Envelope),
    /// Miss threshold reached; no heartbeat emitted
    Unreachable {
        /// Consecutive unanswered heartbeats
        missed: u32,
    },
}

/// Per-connection heartbeat state
#[derive(Debug)]
pub struct LivenessMonitor {
    miss_threshold: u32,
    missed: u32,
    next_seq: u64,
    last_sent: Option<u64>,
    /// Outstanding heartbeat sequence numbers and their send times
    outstanding: HashMap<u64, Instant>,
    last_rtt: Option<Duration>,
}

impl LivenessMonitor {
    /// Create a monitor that declares the peer unreachable after
    /// `miss_threshold` consecutive unanswered heartbeats
    pub fn new(miss_threshold: u32) -> Self {
        Self {
            miss_threshold: miss_threshold.max(1),
            missed: 0,
            next_seq: 1,
            last_sent: None,
            outstanding: HashMap::new(),
            last_rtt: None,
        }
    }

    /// Advance one heartbeat interval.
    ///
    /// The previous heartbeat counts as missed if it is still unanswered.
    pub fn on_tick(&mut self, now: Instant) -> Liveness {
        if let Some(seq) = self.last_sent {
            if self.outstanding.contains_key(&seq) {
                self.missed += 1;
                debug!(
                    "Heartbeat {} unanswered ({}/{} missed)",
                    seq, self.missed, self.miss_threshold
                );
            }
        }

        if self.missed >= self.miss_threshold {
            warn!(
                "Peer unreachable after {} consecutive missed heartbeats",
                self.missed
            );
            return Liveness::Unreachable {
                missed: self.missed,
            };
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.last_sent = Some(seq);
        self.outstanding.insert(seq, now);

        if let Some(cutoff) = now.checked_sub(OUTSTANDING_RETENTION) {
            self.outstanding.retain(|_, &mut sent| sent > cutoff);
        }

        Liveness::Heartbeat(Envelope::heartbeat(seq))
    }

    /// Process a HEARTBEAT_ACK, returning the RTT if it answers a known heartbeat.
    ///
    /// Any reply proves the peer alive and clears the miss counter.
    pub fn on_heartbeat_ack(&mut self, seq: u64, now: Instant) -> Option<Duration> {
        self.missed = 0;

        let sent = self.outstanding.remove(&seq)?;
        // Older heartbeats are implicitly answered by a newer reply
        self.outstanding.retain(|&s, _| s > seq);

        let rtt = now.saturating_duration_since(sent);
        self.last_rtt = Some(rtt);
        Some(rtt)
    }

    /// Forget all state, for a fresh connection
    pub fn reset(&mut self) {
        self.missed = 0;
        self.last_sent = None;
        self.outstanding.clear();
    }

    /// Consecutive unanswered heartbeats
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Configured miss threshold
    pub fn miss_threshold(&self) -> u32 {
        self.miss_threshold
    }

    /// Most recent round-trip time
    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_wire::EnvelopeKind;

    fn expect_heartbeat(result: Liveness) -> Envelope {
        match result {
            Liveness::Heartbeat(envelope) => envelope,
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_unreachable_after_exactly_threshold_misses() {
        for threshold in 1..=5u32 {
            let mut monitor = LivenessMonitor::new(threshold);
            let now = Instant::now();

            // First tick has nothing outstanding yet
            expect_heartbeat(monitor.on_tick(now));
            for miss in 1..threshold {
                expect_heartbeat(monitor.on_tick(now));
                assert_eq!(monitor.missed(), miss);
            }

            assert_eq!(
                monitor.on_tick(now),
                Liveness::Unreachable { missed: threshold }
            );
        }
    }

    #[test]
    fn test_reply_resets_missed_counter() {
        let mut monitor = LivenessMonitor::new(2);
        let start = Instant::now();

        let hb = expect_heartbeat(monitor.on_tick(start));
        assert_eq!(hb.kind(), EnvelopeKind::Heartbeat);
        let hb2 = expect_heartbeat(monitor.on_tick(start));
        assert_eq!(monitor.missed(), 1);

        let rtt = monitor.on_heartbeat_ack(hb2.id(), start + Duration::from_millis(15));
        assert_eq!(rtt, Some(Duration::from_millis(15)));
        assert_eq!(monitor.missed(), 0);
        assert_eq!(monitor.last_rtt(), Some(Duration::from_millis(15)));

        // Answered heartbeat is not counted on the next tick
        expect_heartbeat(monitor.on_tick(start));
        assert_eq!(monitor.missed(), 0);
    }

    #[test]
    fn test_late_reply_still_yields_rtt() {
        let mut monitor = LivenessMonitor::new(5);
        let start = Instant::now();

        let first = expect_heartbeat(monitor.on_tick(start));
        expect_heartbeat(monitor.on_tick(start + Duration::from_secs(1)));
        assert_eq!(monitor.missed(), 1);

        let rtt = monitor.on_heartbeat_ack(first.id(), start + Duration::from_millis(1500));
        assert_eq!(rtt, Some(Duration::from_millis(1500)));
        assert_eq!(monitor.missed(), 0);

        // Unknown sequence still proves liveness but carries no RTT
        assert_eq!(monitor.on_heartbeat_ack(999, start), None);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut monitor = LivenessMonitor::new(1);
        let now = Instant::now();
        expect_heartbeat(monitor.on_tick(now));
        assert!(matches!(monitor.on_tick(now), Liveness::Unreachable { .. }));

        monitor.reset();
        expect_heartbeat(monitor.on_tick(now));
        assert_eq!(monitor.missed(), 0);
    }
}
