//! Loop configuration.
//!
//! Configuration is an explicit value handed to each loop at construction.
//! Nothing in the runtime reads process state on its own; `from_env` is the
//! one place environment overrides are applied.

use serde::Deserialize;

use crate::error::ConfigError;

/// Default maximum nesting of `EventBus::post` calls on one loop.
pub const DEFAULT_MAX_POST_DEPTH: usize = 20;

/// Toggles for optional bookkeeping. Disabled collectors cost nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Track entity gauges (current, peak, totals) in the entity manager.
    pub entities: bool,
    /// Track fire/failure counts in the tick manager.
    pub ticks: bool,
    /// Track post/delivery counts in the event bus.
    pub events: bool,
}

/// Per-loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Posts nested deeper than this are dropped.
    pub max_post_depth: usize,
    /// Run queued tasks on shutdown instead of abandoning them.
    pub drain_on_shutdown: bool,
    /// Optional collectors.
    pub metrics: MetricsConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_post_depth: DEFAULT_MAX_POST_DEPTH,
            drain_on_shutdown: true,
            metrics: MetricsConfig::default(),
        }
    }
}

impl LoopConfig {
    pub const ENV_MAX_POST_DEPTH: &'static str = "STRAND_MAX_POST_DEPTH";
    pub const ENV_DRAIN_ON_SHUTDOWN: &'static str = "STRAND_DRAIN_ON_SHUTDOWN";
    pub const ENV_METRICS_ENTITIES: &'static str = "STRAND_METRICS_ENTITIES";
    pub const ENV_METRICS_TICKS: &'static str = "STRAND_METRICS_TICKS";
    pub const ENV_METRICS_EVENTS: &'static str = "STRAND_METRICS_EVENTS";

    /// Defaults overridden by `STRAND_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `STRAND_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::ENV_MAX_POST_DEPTH) {
            config.max_post_depth = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: Self::ENV_MAX_POST_DEPTH,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(Self::ENV_DRAIN_ON_SHUTDOWN) {
            config.drain_on_shutdown = parse_bool(Self::ENV_DRAIN_ON_SHUTDOWN, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_METRICS_ENTITIES) {
            config.metrics.entities = parse_bool(Self::ENV_METRICS_ENTITIES, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_METRICS_TICKS) {
            config.metrics.ticks = parse_bool(Self::ENV_METRICS_TICKS, &value)?;
        }
        if let Some(value) = lookup(Self::ENV_METRICS_EVENTS) {
            config.metrics.events = parse_bool(Self::ENV_METRICS_EVENTS, &value)?;
        }

        Ok(config)
    }

    /// Override the maximum post depth.
    #[must_use]
    pub fn with_max_post_depth(mut self, depth: usize) -> Self {
        self.max_post_depth = depth;
        self
    }

    /// Choose whether shutdown drains or abandons queued tasks.
    #[must_use]
    pub fn with_drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Replace the metrics toggles.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }
}

impl MetricsConfig {
    /// Every collector enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            entities: true,
            ticks: true,
            events: true,
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
