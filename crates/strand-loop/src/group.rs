//! A fixed pool of loops with selection and fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::LoopConfig;
use crate::context::LoopContext;
use crate::error::{LoopError, TaskError};
use crate::event_loop::{Loop, LoopBuilder, StartHook};
use crate::task::TaskHandle;

/// How long lifecycle broadcasts block by default.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Identity of a loop group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopGroupId(Arc<str>);

impl LoopGroupId {
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LoopGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builder for a [`LoopGroup`].
pub struct LoopGroupBuilder {
    id: LoopGroupId,
    size: usize,
    config: LoopConfig,
    on_start: Option<StartHook>,
}

impl LoopGroupBuilder {
    /// Number of loops. Defaults to the available parallelism.
    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Configuration shared by every loop.
    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Hook run on each loop's thread before its first task.
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn(&LoopContext) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Spawn every loop.
    ///
    /// If any loop fails to start, the ones already started are shut down.
    pub fn build(self) -> Result<LoopGroup, LoopError> {
        if self.size == 0 {
            return Err(LoopError::EmptyGroup(self.id.to_string()));
        }

        let mut loops = Vec::with_capacity(self.size);
        for index in 0..self.size {
            let spawned = LoopBuilder::new(format!("{}-{index}", self.id))
                .owner(self.id.clone())
                .config(self.config.clone())
                .on_start_shared(self.on_start.clone())
                .spawn();
            match spawned {
                Ok(event_loop) => loops.push(event_loop),
                Err(err) => {
                    warn!(group = %self.id, index, error = %err, "loop group failed to start");
                    for started in &loops {
                        started.shutdown();
                    }
                    return Err(err);
                }
            }
        }

        info!(group = %self.id, size = loops.len(), "loop group started");
        Ok(LoopGroup {
            id: self.id,
            loops,
            cursor: AtomicUsize::new(0),
        })
    }
}

/// A fixed-size pool of loops.
pub struct LoopGroup {
    id: LoopGroupId,
    loops: Vec<Loop>,
    cursor: AtomicUsize,
}

impl LoopGroup {
    /// Start building a group.
    #[must_use]
    pub fn builder(id: impl AsRef<str>) -> LoopGroupBuilder {
        LoopGroupBuilder {
            id: LoopGroupId::new(id),
            size: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            config: LoopConfig::default(),
            on_start: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &LoopGroupId {
        &self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Every loop, in index order.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// The loop with this id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Loop> {
        self.loops.iter().find(|l| l.id() == id)
    }

    /// The next loop in round-robin order.
    #[must_use]
    pub fn next(&self) -> &Loop {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[index]
    }

    /// Every loop matching `predicate`.
    pub fn select(&self, mut predicate: impl FnMut(&Loop) -> bool) -> Vec<Loop> {
        self.loops.iter().filter(|l| predicate(l)).cloned().collect()
    }

    /// Submit a clone of `f` to every loop.
    pub fn broadcast<F, R>(&self, f: F) -> Vec<TaskHandle<R>>
    where
        F: Fn(&LoopContext) -> R + Clone + Send + 'static,
        R: Send + 'static,
    {
        self.loops.iter().map(|l| l.submit(f.clone())).collect()
    }

    /// Submit a clone of `f` to every loop and wait for all of them.
    ///
    /// `timeout` bounds the whole broadcast, not each loop. The first failure
    /// is returned; tasks still running are not cancelled.
    pub fn broadcast_wait<F, R>(&self, f: F, timeout: Duration) -> Result<Vec<R>, TaskError>
    where
        F: Fn(&LoopContext) -> R + Clone + Send + 'static,
        R: Send + 'static,
    {
        let deadline = Instant::now().checked_add(timeout);
        self.broadcast(f)
            .into_iter()
            .map(|handle| match deadline {
                Some(deadline) => handle
                    .wait_timeout(deadline.saturating_duration_since(Instant::now()))
                    .map_err(|err| match err {
                        TaskError::Timeout(_) => TaskError::Timeout(timeout),
                        other => other,
                    }),
                None => handle.wait(),
            })
            .collect()
    }

    /// Shut down every loop.
    pub fn shutdown(&self) {
        for event_loop in &self.loops {
            event_loop.shutdown();
        }
    }

    /// Whether every loop has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.loops.iter().all(Loop::is_terminated)
    }

    /// Wait for every loop to terminate, sharing one deadline.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        self.loops.iter().fold(true, |all, event_loop| {
            let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            event_loop.await_termination(remaining) && all
        })
    }
}

impl std::fmt::Debug for LoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopGroup")
            .field("id", &self.id)
            .field("loops", &self.loops.iter().map(Loop::id).collect::<Vec<_>>())
            .finish()
    }
}
