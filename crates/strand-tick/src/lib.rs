#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! Periodic ticks on the owning loop.
//!
//! # Tick Execution Model
//!
//! ```text
//! register(obj) ──► one record per declared method ──► loop timer
//!                                                          │
//!          ┌───────────────────────────────────────────────┘
//!          ▼
//!   loop thread: method(&obj, ctx, TickTime { now, last })
//!          │
//!          └─► re-arm: FixedRate from the schedule, FixedDelay from completion
//! ```
//!
//! A tick never runs on a foreign thread, so a handler may touch the same
//! loop-owned state as any task. Successive firings of one method are
//! serialized; firings of different methods have no relative order.

mod manager;
mod spec;
mod table;

pub use manager::{TickManager, TickStats};
pub use spec::{TickMode, TickSpec, TimeUnit};
pub use table::{TickTable, TickTime, Ticking};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{TickManager, TickMode, TickSpec, TickTable, TickTime, Ticking, TimeUnit};
}
