//! Runtime bootstrap: a loop group with the core components installed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use strand_entity::{Entity, EntityManager};
use strand_event::EventBus;
use strand_loop::{
    ConfigError, DEFAULT_BROADCAST_TIMEOUT, LoopConfig, LoopContext, LoopError, LoopGroup,
    TaskError, TaskHandle,
};
use strand_tick::TickManager;
use tracing::{info, warn};

use crate::install_core;

/// Application-wide lifecycle event, posted on every loop's bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Wiring is done; loops may start work that depends on other loops.
    Ready,
    /// The runtime is stopping. Entities and ticks are released next.
    ShuttingDown,
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Group id; loops are named `<name>-<index>`.
    pub name: String,
    /// Number of loops.
    pub loops: usize,
    /// Configuration shared by every loop.
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    /// How long lifecycle broadcasts block.
    pub broadcast_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "strand".to_string(),
            loops: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            loop_config: LoopConfig::default(),
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    pub const ENV_LOOPS: &'static str = "STRAND_LOOPS";

    /// Defaults overridden by `STRAND_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `STRAND_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            loop_config: LoopConfig::from_lookup(&lookup)?,
            ..Self::default()
        };
        if let Some(value) = lookup(Self::ENV_LOOPS) {
            config.loops = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|loops| *loops > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: Self::ENV_LOOPS,
                    value,
                })?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_loops(mut self, loops: usize) -> Self {
        self.loops = loops;
        self
    }

    #[must_use]
    pub fn with_loop_config(mut self, config: LoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    #[must_use]
    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }
}

/// A running loop group with event bus, tick manager and entity manager on
/// every loop.
pub struct Runtime {
    group: LoopGroup,
    broadcast_timeout: Duration,
}

impl Runtime {
    /// Spawn the loops and install the core components on each.
    pub fn start(config: RuntimeConfig) -> Result<Self, LoopError> {
        let group = LoopGroup::builder(&config.name)
            .size(config.loops)
            .config(config.loop_config)
            .on_start(install_core)
            .build()?;
        info!(runtime = %group.id(), loops = group.len(), "runtime started");
        Ok(Self {
            group,
            broadcast_timeout: config.broadcast_timeout,
        })
    }

    #[must_use]
    pub fn group(&self) -> &LoopGroup {
        &self.group
    }

    #[must_use]
    pub fn broadcast_timeout(&self) -> Duration {
        self.broadcast_timeout
    }

    /// Post [`Lifecycle::Ready`] on every loop and wait for the handlers.
    ///
    /// Returns the number of handlers that ran successfully, summed over
    /// loops.
    pub fn ready(&self) -> Result<usize, TaskError> {
        let delivered = self
            .group
            .broadcast_wait(|ctx| post_lifecycle(ctx, Lifecycle::Ready), self.broadcast_timeout)?;
        Ok(delivered.into_iter().sum())
    }

    /// Register `entity` on the next loop in round-robin order.
    pub fn spawn_entity(&self, entity: Arc<Entity>) -> TaskHandle<bool> {
        EntityManager::register_on(self.group.next(), entity)
    }

    /// Stop the runtime.
    ///
    /// Posts [`Lifecycle::ShuttingDown`], cancels every tick, releases every
    /// entity, then shuts the loops down. `timeout` bounds the whole
    /// sequence. Returns `true` if every loop terminated in time.
    pub fn stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let released = self.group.broadcast_wait(release_loop, timeout);
        match released {
            Ok(counts) => {
                let (ticks, entities) = counts
                    .into_iter()
                    .fold((0, 0), |(t, e), (ticks, entities)| (t + ticks, e + entities));
                info!(runtime = %self.group.id(), ticks, entities, "runtime released loop state");
            }
            Err(err) => warn!(runtime = %self.group.id(), error = %err, "runtime release failed"),
        }

        self.group.shutdown();
        let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
        let terminated = self.group.await_termination(remaining);
        info!(runtime = %self.group.id(), terminated, "runtime stopped");
        terminated
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("group", &self.group)
            .field("broadcast_timeout", &self.broadcast_timeout)
            .finish()
    }
}

fn post_lifecycle(ctx: &LoopContext, phase: Lifecycle) -> usize {
    ctx.component::<EventBus>()
        .and_then(|bus| bus.post(ctx, &phase))
        .unwrap_or(0)
}

fn release_loop(ctx: &LoopContext) -> (usize, usize) {
    post_lifecycle(ctx, Lifecycle::ShuttingDown);
    let ticks = ctx
        .component::<TickManager>()
        .map_or(0, |ticks| ticks.unregister_all(ctx));
    let entities = ctx
        .component::<EntityManager>()
        .map_or(0, |entities| entities.unregister_all(ctx));
    (ticks, entities)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = [("STRAND_LOOPS", "3"), ("STRAND_MAX_POST_DEPTH", "7")]
            .into_iter()
            .collect();
        let config =
            RuntimeConfig::from_lookup(|key| env.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.loops, 3);
        assert_eq!(config.loop_config.max_post_depth, 7);
        assert_eq!(config.broadcast_timeout, DEFAULT_BROADCAST_TIMEOUT);
    }

    #[test]
    fn test_config_rejects_zero_loops() {
        let err = RuntimeConfig::from_lookup(|key| (key == "STRAND_LOOPS").then(|| "0".into()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "STRAND_LOOPS",
                value: "0".to_string(),
            }
        );
    }

    #[test]
    fn test_config_deserialize() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{ "name": "world", "loops": 2, "loop": { "drain_on_shutdown": false } }"#,
        )
        .unwrap();
        assert_eq!(config.name, "world");
        assert_eq!(config.loops, 2);
        assert!(!config.loop_config.drain_on_shutdown);
        assert_eq!(config.loop_config.max_post_depth, 20);
    }

    #[test]
    fn test_start_installs_core_and_stops() {
        let runtime = Runtime::start(RuntimeConfig::default().with_name("core").with_loops(2)).unwrap();
        let installed = runtime
            .group()
            .broadcast_wait(
                |ctx| {
                    ctx.has_component::<EventBus>()
                        && ctx.has_component::<TickManager>()
                        && ctx.has_component::<EntityManager>()
                },
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(installed, [true, true]);
        assert_eq!(runtime.ready(), Ok(0));
        assert!(runtime.stop(Duration::from_secs(5)));
    }
}
