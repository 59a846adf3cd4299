//! Time provider abstraction
//!
//! Separates time acquisition from message stamping so tests can pin the
//! clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider trait for generating timestamps
pub trait TimeProvider: Send + Sync + 'static {
    /// Current timestamp in nanoseconds since Unix epoch
    fn now_nanos(&self) -> i64;

    /// Current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64 {
        self.now_nanos() / 1_000_000
    }

    /// Current timestamp in whole seconds since Unix epoch
    fn now_secs(&self) -> i64 {
        self.now_nanos() / 1_000_000_000
    }
}

/// System time provider using local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default()
    }
}

/// Fixed time provider for testing
///
/// Returns a predetermined timestamp, useful for deterministic tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_ns: i64,
}

impl FixedTimeProvider {
    pub fn new(timestamp_ns: i64) -> Self {
        Self { timestamp_ns }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::new(secs * 1_000_000_000)
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_nanos(&self) -> i64 {
        self.timestamp_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider;
        let time1 = provider.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let time2 = provider.now_millis();

        assert!(time2 >= time1);
        assert!(time2 - time1 >= 10);
    }

    #[test]
    fn test_fixed_time_provider() {
        let provider = FixedTimeProvider::from_secs(1_700_000_000);

        assert_eq!(provider.now_secs(), 1_700_000_000);
        assert_eq!(provider.now_millis(), 1_700_000_000_000);
        assert_eq!(provider.now_nanos(), 1_700_000_000_000_000_000);
    }
}
