//! Node configuration.
//!
//! Defaults come from [`BusConfig`] and [`TelemetryConfig`]; every field
//! can be overridden through a `MANIFOLD_*` environment variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use manifold_bus::BusConfig;
use manifold_telemetry::TelemetryConfig;
use manifold_types::ConfigError;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bus: BusConfig,
    pub telemetry: TelemetryConfig,
    /// Directory holding `wormholes.json` and `event_log.json`.
    pub data_dir: PathBuf,
    /// Create the default wormholes when none were persisted.
    pub default_wormholes: bool,
    /// Reclassifier temperature threshold; `None` disables it.
    pub reclassify_threshold: Option<f64>,
    /// How often bus stats are mirrored into Prometheus gauges.
    pub metrics_export: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            telemetry: TelemetryConfig::default(),
            data_dir: PathBuf::from("./data"),
            default_wormholes: true,
            reclassify_threshold: Some(0.8),
            metrics_export: Duration::from_secs(5),
        }
    }
}

impl NodeConfig {
    /// Load from the process environment and validate.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidEnv` for an unparsable variable, or the bus
    /// config validation error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`NodeConfig::load`] over an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// See [`NodeConfig::load`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            telemetry: TelemetryConfig::from_lookup(&lookup),
            ..Self::default()
        };
        let bus = &mut config.bus;

        if let Some(dir) = lookup("MANIFOLD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        override_with(&lookup, "MANIFOLD_PRIORITY_MIN", &mut bus.priority_min)?;
        override_with(&lookup, "MANIFOLD_PRIORITY_MAX", &mut bus.priority_max)?;
        override_with(&lookup, "MANIFOLD_DEFAULT_PRIORITY", &mut bus.default_priority)?;
        override_with(&lookup, "MANIFOLD_MAX_LOG", &mut bus.max_log)?;
        override_with(&lookup, "MANIFOLD_WORMHOLE_CAPACITY", &mut bus.default_wormhole_capacity)?;
        override_with(&lookup, "MANIFOLD_WINDOW_SIZE", &mut bus.window_size)?;
        override_with(&lookup, "MANIFOLD_WINDOW_SECS", &mut bus.window_secs)?;
        override_with(&lookup, "MANIFOLD_AUTO_PRESSURE", &mut bus.auto_pressure)?;
        override_with(&lookup, "MANIFOLD_DRAIN_TIMEOUT_MS", &mut bus.drain_timeout_ms)?;
        override_with(&lookup, "MANIFOLD_SCHEDULER_TICK_MS", &mut bus.scheduler_tick_ms)?;
        override_with(&lookup, "MANIFOLD_LOG_FLUSH_SECS", &mut bus.log_flush_interval_secs)?;
        override_with(&lookup, "MANIFOLD_DEFAULT_WORMHOLES", &mut config.default_wormholes)?;

        if let Some(raw) = lookup("MANIFOLD_RECLASSIFY_THRESHOLD") {
            config.reclassify_threshold = match raw.as_str() {
                "" | "off" | "none" => None,
                value => Some(parse("MANIFOLD_RECLASSIFY_THRESHOLD", value)?),
            };
        }
        let mut export_secs = config.metrics_export.as_secs();
        override_with(&lookup, "MANIFOLD_METRICS_EXPORT_SECS", &mut export_secs)?;
        config.metrics_export = Duration::from_secs(export_secs.max(1));

        config.bus.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn wormhole_store_path(&self) -> PathBuf {
        self.data_dir.join("wormholes.json")
    }

    #[must_use]
    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("event_log.json")
    }
}

fn override_with<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *target = parse(key, &raw)?;
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
