//! Time provider abstraction for the sinks
//!
//! Row keys of dead-letter records and fallback timestamps come from here,
//! so tests can pin the clock.

use std::sync::Arc;

/// Time provider trait for generating timestamps
pub trait TimeProvider: Send + Sync + 'static {
    /// Get current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// System time provider using the local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Fixed time provider for deterministic tests
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_ms: i64,
}

impl FixedTimeProvider {
    pub fn new(timestamp_ms: i64) -> Self {
        Self { timestamp_ms }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn TimeProvider>;

/// System clock as a shared handle
pub fn system_clock() -> SharedClock {
    Arc::new(SystemTimeProvider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider_moves_forward() {
        let provider = SystemTimeProvider;
        let time1 = provider.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(provider.now_millis() >= time1 + 5);
    }

    #[test]
    fn test_fixed_time_provider() {
        let provider = FixedTimeProvider::new(1_700_000_000_000);
        assert_eq!(provider.now_millis(), 1_700_000_000_000);
        assert_eq!(provider.now_millis(), 1_700_000_000_000);
    }
}
