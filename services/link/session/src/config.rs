//! Link configuration.
//!
//! All timing and capacity knobs of the link live in [`LinkConfig`]. Values
//! can be set programmatically or applied from string key/value pairs (as
//! found in the shared service config file) via [`LinkConfig::apply_setting`].

use crate::error::LinkError;
use crate::tracker::RetryPolicy;
use link_wire::{DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE, HEADER_SIZE};
use std::time::Duration;

/// Configuration for a reliable link
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    /// Time to wait for an ACK before the first retransmission
    pub base_timeout: Duration,
    /// Upper bound on the per-message retransmission interval
    pub max_retry_interval: Duration,
    /// Transmissions per message before it fails with `DeliveryFailed`
    pub max_attempts: u32,
    /// Cadence of the retransmission check
    pub tick_interval: Duration,
    /// Interval between HEARTBEAT envelopes
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered heartbeats before the link is DEGRADED
    pub heartbeat_miss_threshold: u32,
    /// Time spent DEGRADED waiting for a late reply before reconnecting
    pub degraded_grace: Duration,
    /// Delay after the first failed connection attempt
    pub reconnect_backoff_base: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_backoff_cap: Duration,
    /// Connection attempts before the link fails with `ConnectionFailed`
    pub reconnect_max_attempts: u32,
    /// Random extra delay as a fraction of the backoff (0.0 disables)
    pub reconnect_jitter: f64,
    /// Timeout for a single outbound connection attempt
    pub connect_timeout: Duration,
    /// Sends that may queue while the link is not draining them
    pub send_queue_depth: usize,
    /// Capacity of the application event queue
    pub event_queue_depth: usize,
    /// Number of recently received DATA ids remembered for de-duplication
    pub dedup_window: usize,
    /// Largest accepted frame in bytes
    pub max_frame_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(5),
            max_retry_interval: Duration::from_secs(30),
            max_attempts: 3,
            tick_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_miss_threshold: 3,
            degraded_grace: Duration::from_secs(1),
            reconnect_backoff_base: Duration::from_secs(1),
            reconnect_backoff_cap: Duration::from_secs(30),
            reconnect_max_attempts: 5,
            reconnect_jitter: 0.1,
            connect_timeout: Duration::from_secs(10),
            send_queue_depth: 1024,
            event_queue_depth: 1024,
            dedup_window: 4096,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl LinkConfig {
    /// Retry policy for the pending-acknowledgment tracker
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_timeout: self.base_timeout,
            max_interval: self.max_retry_interval,
            max_attempts: self.max_attempts,
        }
    }

    /// Keys understood by [`LinkConfig::apply_setting`]
    pub const SETTINGS: &'static [&'static str] = &[
        "base_timeout",
        "max_retry_interval",
        "max_attempts",
        "tick_interval",
        "heartbeat_interval",
        "heartbeat_miss_threshold",
        "degraded_grace",
        "reconnect_backoff_base",
        "reconnect_backoff_cap",
        "reconnect_max_attempts",
        "reconnect_jitter",
        "connect_timeout",
        "send_queue_depth",
        "event_queue_depth",
        "dedup_window",
        "max_frame_size",
    ];

    /// Reject settings the link cannot run with
    pub fn validate(&self) -> Result<(), LinkError> {
        let non_zero = [
            ("base_timeout", self.base_timeout),
            ("tick_interval", self.tick_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconnect_backoff_base", self.reconnect_backoff_base),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(LinkError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        if self.max_attempts == 0 {
            return Err(LinkError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.heartbeat_miss_threshold == 0 {
            return Err(LinkError::InvalidConfig(
                "heartbeat_miss_threshold must be at least 1".into(),
            ));
        }
        if self.reconnect_max_attempts == 0 {
            return Err(LinkError::InvalidConfig(
                "reconnect_max_attempts must be at least 1".into(),
            ));
        }
        if self.send_queue_depth == 0 || self.event_queue_depth == 0 {
            return Err(LinkError::InvalidConfig("queue depths must be non-zero".into()));
        }
        if self.max_retry_interval < self.base_timeout {
            return Err(LinkError::InvalidConfig(
                "max_retry_interval must not be below base_timeout".into(),
            ));
        }
        if self.reconnect_backoff_cap < self.reconnect_backoff_base {
            return Err(LinkError::InvalidConfig(
                "reconnect_backoff_cap must not be below reconnect_backoff_base".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(LinkError::InvalidConfig(
                "reconnect_jitter must be within 0.0..=1.0".into(),
            ));
        }
        // Control envelopes are bare headers and must always fit
        if !(HEADER_SIZE..=HARD_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(LinkError::InvalidConfig(format!(
                "max_frame_size must be within {}..={}",
                HEADER_SIZE, HARD_MAX_FRAME_SIZE
            )));
        }

        Ok(())
    }

    /// Apply one `key = value` setting; durations use humantime syntax ("250ms", "5s")
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), LinkError> {
        match key {
            "base_timeout" => self.base_timeout = parse_duration(key, value)?,
            "max_retry_interval" => self.max_retry_interval = parse_duration(key, value)?,
            "max_attempts" => self.max_attempts = parse_number(key, value)?,
            "tick_interval" => self.tick_interval = parse_duration(key, value)?,
            "heartbeat_interval" => self.heartbeat_interval = parse_duration(key, value)?,
            "heartbeat_miss_threshold" => {
                self.heartbeat_miss_threshold = parse_number(key, value)?
            }
            "degraded_grace" => self.degraded_grace = parse_duration(key, value)?,
            "reconnect_backoff_base" => {
                self.reconnect_backoff_base = parse_duration(key, value)?
            }
            "reconnect_backoff_cap" => self.reconnect_backoff_cap = parse_duration(key, value)?,
            "reconnect_max_attempts" => self.reconnect_max_attempts = parse_number(key, value)?,
            "reconnect_jitter" => self.reconnect_jitter = parse_number(key, value)?,
            "connect_timeout" => self.connect_timeout = parse_duration(key, value)?,
            "send_queue_depth" => self.send_queue_depth = parse_number(key, value)?,
            "event_queue_depth" => self.event_queue_depth = parse_number(key, value)?,
            "dedup_window" => self.dedup_window = parse_number(key, value)?,
            "max_frame_size" => self.max_frame_size = parse_number(key, value)?,
            _ => {
                return Err(LinkError::InvalidConfig(format!("unknown setting '{}'", key)));
            }
        }
        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, LinkError> {
    humantime::parse_duration(value.trim())
        .map_err(|e| LinkError::InvalidConfig(format!("{}: {}", key, e)))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, LinkError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| LinkError::InvalidConfig(format!("{}: {}", key, e)))
}
