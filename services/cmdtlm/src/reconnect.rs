//! Reconnect delay policy for the reader loop
//!
//! The default is a fixed delay equal to the interface `reconnect_delay`. An
//! optional backoff multiplier and jitter stretch the wait across attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

fn default_multiplier() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Seconds before the first retry
    #[serde(skip)]
    pub delay: Duration,
    /// Growth factor per failed attempt; 1.0 keeps the delay fixed
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Cap in seconds when backing off
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    /// Add ±25% random jitter
    #[serde(default)]
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            backoff_multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Reconnection statistics tracking
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Tracks attempts between successful connects
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    current_attempt: u32,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn record_attempt(&mut self) {
        self.current_attempt = self.current_attempt.saturating_add(1);
        self.stats.total_attempts += 1;
    }

    pub fn record_failure(&mut self) {
        self.stats.failed_reconnects += 1;
    }

    /// Mark the connection as successful
    pub fn mark_connected(&mut self) {
        if self.current_attempt > 1 {
            self.stats.successful_reconnects += 1;
        }
        self.current_attempt = 0;
        self.stats.last_connected = Some(Instant::now());
        debug!("Connection marked as successful");
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        let attempt = self.current_attempt.saturating_sub(1);
        let mut delay = self
            .policy
            .delay
            .mul_f64(self.policy.backoff_multiplier.max(1.0).powi(attempt as i32));

        let max = Duration::from_secs_f64(self.policy.max_delay.max(0.0));
        if self.policy.backoff_multiplier > 1.0 && delay > max {
            delay = max;
        }

        if self.policy.jitter {
            let range = delay.as_millis() as f64 * 0.25;
            if range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-range..range);
                let millis = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(millis as u64);
            }
        }
        delay
    }
}
