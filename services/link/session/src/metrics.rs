//! Periodic link statistics reporting

use crate::link::LinkHandle;
use crate::state::ConnectionState;
use crate::stats::StatsSnapshot;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Retransmissions per sent message above which the link looks lossy
const RETRANSMISSION_WARN_PERCENT: f64 = 10.0;
/// Failed deliveries per sent message considered unhealthy
const FAILURE_WARN_PERCENT: f64 = 1.0;
/// Duplicates per received message considered unhealthy
const DUPLICATE_WARN_PERCENT: f64 = 10.0;

/// Logs link counters on a fixed interval until the link closes
#[derive(Debug)]
pub struct StatsReporter {
    handle: LinkHandle,
    report_interval: Duration,
}

impl StatsReporter {
    /// Create a reporter for `handle`
    pub fn new(handle: LinkHandle) -> Self {
        Self {
            handle,
            report_interval: Duration::from_secs(30),
        }
    }

    /// Set the reporting interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Start the reporting task
    pub fn start_reporting_task(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.report_interval);
            // The first tick completes immediately
            ticker.tick().await;

            info!(
                "Starting link stats reporting (interval: {:?})",
                self.report_interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = self.handle.stats();
                        log_stats(self.handle.state(), &stats);
                        for warning in health_warnings(&stats) {
                            warn!("{}", warning);
                        }
                    }
                    _ = self.handle.wait_for_state(ConnectionState::Closed) => break,
                }
            }

            debug!("Link stats reporting stopped");
        })
    }
}

fn log_stats(state: ConnectionState, stats: &StatsSnapshot) {
    info!(
        "Link Stats - State: {}, Sent: {}, Received: {}, ACKs out/in: {}/{}, Retransmissions: {}, Duplicates: {}, Failures: {}, Reconnections: {}, Errors: {}",
        state,
        stats.messages_sent,
        stats.messages_received,
        stats.acks_sent,
        stats.acks_received,
        stats.retransmissions,
        stats.duplicates,
        stats.delivery_failures,
        stats.reconnections,
        stats.errors
    );

    if stats.last_rtt_micros > 0 {
        debug!(
            "Last heartbeat RTT: {:?}",
            Duration::from_micros(stats.last_rtt_micros)
        );
    }
}

/// Warnings for counters outside their healthy range
pub fn health_warnings(stats: &StatsSnapshot) -> Vec<String> {
    let mut warnings = Vec::new();

    if stats.messages_sent > 0 {
        let sent = stats.messages_sent as f64;

        let retransmission_rate = stats.retransmissions as f64 / sent * 100.0;
        if retransmission_rate > RETRANSMISSION_WARN_PERCENT {
            warnings.push(format!(
                "High retransmission rate: {:.1}% ({}/{})",
                retransmission_rate, stats.retransmissions, stats.messages_sent
            ));
        }

        let failure_rate = stats.delivery_failures as f64 / sent * 100.0;
        if failure_rate > FAILURE_WARN_PERCENT {
            warnings.push(format!(
                "High delivery failure rate: {:.1}% ({}/{})",
                failure_rate, stats.delivery_failures, stats.messages_sent
            ));
        }
    }

    let arrivals = stats.messages_received + stats.duplicates;
    if arrivals > 0 {
        let duplicate_rate = stats.duplicates as f64 / arrivals as f64 * 100.0;
        if duplicate_rate > DUPLICATE_WARN_PERCENT {
            warnings.push(format!(
                "High duplicate rate: {:.1}% ({}/{})",
                duplicate_rate, stats.duplicates, arrivals
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_stats_produce_no_warnings() {
        let stats = StatsSnapshot {
            messages_sent: 1000,
            acks_received: 1000,
            retransmissions: 20,
            messages_received: 500,
            duplicates: 3,
            ..StatsSnapshot::default()
        };
        assert!(health_warnings(&stats).is_empty());
        assert!(health_warnings(&StatsSnapshot::default()).is_empty());
    }

    #[test]
    fn test_lossy_link_warns() {
        let stats = StatsSnapshot {
            messages_sent: 100,
            retransmissions: 40,
            delivery_failures: 5,
            messages_received: 10,
            duplicates: 10,
            ..StatsSnapshot::default()
        };

        let warnings = health_warnings(&stats);
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].starts_with("High retransmission rate: 40.0%"));
        assert!(warnings[1].contains("(5/100)"));
        assert!(warnings[2].starts_with("High duplicate rate: 50.0%"));
    }
}
