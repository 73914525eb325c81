#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! Single-threaded task loops.
//!
//! A [`Loop`] is an actor: one OS thread draining one task queue. Any thread
//! may [`submit`](Loop::submit) work; only the loop's own thread runs it, in
//! submission order. Everything a loop owns (its components and timers)
//! lives in a [`LoopContext`] that never leaves the loop thread, so loop
//! state needs no locks.
//!
//! # Example
//!
//! ```ignore
//! use strand_loop::{Loop, LoopGroup};
//!
//! let group = LoopGroup::builder("world").size(4).build()?;
//!
//! // Spread independent work across loops.
//! let answer = group.next().submit(|ctx| {
//!     tracing::info!(loop_id = ctx.id(), "running on the loop thread");
//!     42
//! });
//! assert_eq!(answer.wait()?, 42);
//!
//! group.shutdown();
//! group.await_termination(Duration::from_secs(5));
//! ```
//!
//! # Cross-loop waits
//!
//! A loop blocked on another loop's [`TaskHandle`] stalls everything queued
//! behind it, and two loops waiting on each other deadlock. Wait with a
//! timeout, or await the handle as a future.

mod config;
mod context;
mod error;
mod event_loop;
mod group;
mod object;
mod task;
mod timer;

pub use config::{DEFAULT_MAX_POST_DEPTH, LoopConfig, MetricsConfig};
pub use context::LoopContext;
pub use error::{ConfigError, LoopError, TaskError, TaskResult, panic_message};
pub use event_loop::{Loop, LoopBuilder, StartHook, TaskPriority, WeakLoop};
pub use group::{DEFAULT_BROADCAST_TIMEOUT, LoopGroup, LoopGroupBuilder, LoopGroupId};
pub use object::{ObjectKey, ObjectRef};
pub use task::TaskHandle;
pub use timer::TimerId;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Loop, LoopConfig, LoopContext, LoopGroup, ObjectRef, TaskError, TaskHandle, TaskPriority,
    };
}
