//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of scheduler slots (concurrent simulations in flight)
pub const DEFAULT_SLOTS: usize = 3;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the offgrid optimizer service (grid + supply)
    pub optimizer_url: String,

    /// Number of scheduler slots, i.e. the bound on concurrently running
    /// simulations
    pub slots: usize,

    /// Interval between worker polling cycles, in milliseconds
    pub poll_interval_ms: u64,

    /// Pacing delay in front of each gateway call, in milliseconds. Keeps the
    /// external service from being hammered slot after slot.
    pub pacing_delay_ms: u64,

    /// Request timeout applied to every gateway network call, in milliseconds
    pub request_timeout_ms: u64,

    /// Path to the SQLite database file (":memory:" for ephemeral runs)
    pub db_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimizer_url: "http://localhost:8008".to_string(),
            slots: DEFAULT_SLOTS,
            poll_interval_ms: 1_000,
            pacing_delay_ms: 3_000,
            request_timeout_ms: 30_000,
            db_path: "gridscout.db".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimizer service base URL
    pub fn with_optimizer_url(mut self, url: impl Into<String>) -> Self {
        self.optimizer_url = url.into();
        self
    }

    /// Set the slot count
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots.max(1);
        self
    }

    /// Set the polling interval
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the per-slot pacing delay
    pub fn with_pacing_delay_ms(mut self, ms: u64) -> Self {
        self.pacing_delay_ms = ms;
        self
    }

    /// Set the database path
    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.slots, DEFAULT_SLOTS);
        assert!(config.poll_interval_ms > 0);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_optimizer_url("http://optimizer:9000")
            .with_slots(5)
            .with_poll_interval_ms(10);

        assert_eq!(config.optimizer_url, "http://optimizer:9000");
        assert_eq!(config.slots, 5);
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_slots_never_zero() {
        let config = EngineConfig::new().with_slots(0);
        assert_eq!(config.slots, 1);
    }
}
