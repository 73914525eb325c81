#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! Loop-scoped event bus.
//!
//! Each loop carries one [`EventBus`] as a component. Objects declare their
//! handlers once per type with a [`SubscriptionTable`]; registering an
//! instance binds those handlers to it. Posting an event runs the bound
//! handlers synchronously on the loop thread, in [`Priority`] order.
//!
//! # Example
//!
//! ```ignore
//! struct Damage { amount: u32 }
//!
//! struct Health { current: Cell<u32> }
//!
//! impl Subscriber for Health {
//!     fn subscriptions(table: &mut SubscriptionTable<Self>) {
//!         table.on::<Damage>("on_damage", |health, _ctx, damage| {
//!             health.current.set(health.current.get().saturating_sub(damage.amount));
//!             Ok(())
//!         });
//!     }
//! }
//!
//! event_loop.submit(|ctx| {
//!     let bus = EventBus::install(ctx);
//!     let health = Rc::new(Health { current: Cell::new(20) });
//!     bus.register(ctx, &health);
//!     bus.post(ctx, &Damage { amount: 5 });
//! });
//! ```
//!
//! # Recursion
//!
//! Handlers may post further events. Nesting is bounded by
//! `LoopConfig::max_post_depth`; a post beyond it is dropped and returns
//! `None` instead of a handler count.

mod bus;
mod event;
mod priority;
mod subscription;

pub use bus::{EventBus, EventStats};
pub use event::Event;
pub use priority::Priority;
pub use subscription::{Subscriber, SubscriptionTable};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Event, EventBus, Priority, Subscriber, SubscriptionTable};
}
