//! # Bus Configuration
//!
//! Every limit and interval the bus uses. All values have sane defaults and
//! can be overridden from a deserialised config or field by field.

use std::time::Duration;

use manifold_types::ConfigError;
use serde::Deserialize;

/// Complete bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Lowest accepted priority (inclusive).
    pub priority_min: u8,
    /// Highest accepted priority (inclusive).
    pub priority_max: u8,
    /// Priority used when a publish request names none.
    pub default_priority: u8,
    /// Event log ring-buffer capacity.
    pub max_log: usize,
    /// Buffer capacity for wormholes created without one.
    pub default_wormhole_capacity: usize,
    /// Analyzer window bound by count.
    pub window_size: usize,
    /// Analyzer window bound by age.
    pub window_secs: u64,
    /// Arrival rate (events/s) that saturates the rate term of the temperature.
    pub rate_reference: f64,
    pub weight_rate: f64,
    pub weight_priority: f64,
    pub weight_entropy: f64,
    /// Let the scheduler drive metabolic pressure from the analyzer temperature.
    pub auto_pressure: bool,
    /// How long shutdown waits for wormhole queues to drain.
    pub drain_timeout_ms: u64,
    pub scheduler_tick_ms: u64,
    pub log_flush_interval_secs: u64,
    /// Router diagnostics ring capacity.
    pub diagnostics_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            priority_min: 1,
            priority_max: 5,
            default_priority: 3,
            max_log: 1000,
            default_wormhole_capacity: 64,
            window_size: 256,
            window_secs: 60,
            rate_reference: 100.0,
            weight_rate: 0.4,
            weight_priority: 0.3,
            weight_entropy: 0.3,
            auto_pressure: false,
            drain_timeout_ms: 5_000,
            scheduler_tick_ms: 250,
            log_flush_interval_secs: 5,
            diagnostics_capacity: 256,
        }
    }
}

impl BusConfig {
    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// - `ConfigError::PriorityRange` if the range is inverted or excludes the default
    /// - `ConfigError::Zero` for zero-sized buffers, windows, or intervals
    /// - `ConfigError::Weights` if the temperature weights do not sum to 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.priority_min > self.priority_max
            || !(self.priority_min..=self.priority_max).contains(&self.default_priority)
        {
            return Err(ConfigError::PriorityRange {
                min: self.priority_min,
                max: self.priority_max,
                default: self.default_priority,
            });
        }

        let positive = [
            ("max_log", self.max_log as u64),
            ("default_wormhole_capacity", self.default_wormhole_capacity as u64),
            ("window_size", self.window_size as u64),
            ("window_secs", self.window_secs),
            ("scheduler_tick_ms", self.scheduler_tick_ms),
            ("log_flush_interval_secs", self.log_flush_interval_secs),
            ("diagnostics_capacity", self.diagnostics_capacity as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if self.rate_reference <= 0.0 {
            return Err(ConfigError::Zero("rate_reference"));
        }

        let weights = [self.weight_rate, self.weight_priority, self.weight_entropy];
        let sum: f64 = weights.iter().sum();
        if weights.iter().any(|w| *w < 0.0) || (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Weights(sum));
        }

        Ok(())
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[must_use]
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    #[must_use]
    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_secs(self.log_flush_interval_secs)
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}
