#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! Loop-per-thread runtime for server-side entity simulation.
//!
//! This crate wires the building blocks together:
//!
//! ```text
//!                 ┌──────────── LoopGroup ────────────┐
//!                 │                                   │
//!  submit ──────► │  Loop 0         Loop 1      ...   │
//!                 │  ├ EventBus     ├ EventBus        │
//!                 │  ├ TickManager  ├ TickManager     │
//!                 │  └ EntityMgr    └ EntityMgr       │
//!                 └───────────────────────────────────┘
//! ```
//!
//! Each loop owns its components outright; other threads reach them only by
//! submitting tasks to the loop.
//!
//! # Example
//!
//! ```ignore
//! use strand::prelude::*;
//!
//! let runtime = Runtime::start(RuntimeConfig::from_env()?.with_name("world"))?;
//! runtime.ready()?;
//!
//! let zombie = Entity::new("zombie-1");
//! zombie.insert(Health::new(20));
//! assert!(runtime.spawn_entity(zombie).wait()?);
//!
//! runtime.stop(Duration::from_secs(5));
//! ```

mod runtime;
mod stats;

pub use strand_entity;
pub use strand_event;
pub use strand_loop;
pub use strand_tick;

pub use runtime::{Lifecycle, Runtime, RuntimeConfig};
pub use stats::{LoopStats, collect_stats, loop_stats};

use strand_entity::EntityManager;
use strand_event::EventBus;
use strand_loop::LoopContext;
use strand_tick::TickManager;

/// Install the event bus, tick manager and entity manager on the current
/// loop. Components already present are kept.
pub fn install_core(ctx: &LoopContext) {
    EventBus::install(ctx);
    TickManager::install(ctx);
    EntityManager::install(ctx);
    tracing::debug!(loop_id = ctx.id(), "core components installed");
}

/// Prelude for convenient imports
pub mod prelude {
    pub use strand_entity::prelude::*;
    pub use strand_event::prelude::*;
    pub use strand_loop::prelude::*;
    pub use strand_tick::prelude::*;

    pub use crate::{Lifecycle, LoopStats, Runtime, RuntimeConfig, install_core};
}
