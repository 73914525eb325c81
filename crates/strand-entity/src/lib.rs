#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::redundant_pub_crate)]

//! Loop-owned entities.
//!
//! # Ownership
//!
//! An [`Entity`] is shared as `Arc<Entity>` but owned by at most one loop at
//! a time. Ownership is taken by [`EntityManager::register_entity`] on the
//! owning loop's thread, through a compare-and-swap on the entity's
//! `registered` flag:
//!
//! ```text
//!            register_entity (CAS false → true)
//!  detached ─────────────────────────────────────► owned by loop L
//!     ▲                                                 │
//!     └─────────────────────────────────────────────────┘
//!            unregister_entity (CAS true → false)
//! ```
//!
//! While owned, components may only be inserted or removed on L's thread;
//! doing it elsewhere panics.
//!
//! # Typed access
//!
//! Entity lookups are non-generic and return `Arc<Entity>`. Component and
//! capability lookups are typed and return `None` when nothing of the
//! requested type is attached.

mod component;
mod entity;
mod events;
mod manager;

pub use component::{Capabilities, Component};
pub use entity::{Entity, EntityRef};
pub use events::{EntityRegistered, EntityUnregistered, EntityUnregistering};
pub use manager::{EntityGauge, EntityManager};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Capabilities, Component, Entity, EntityManager, EntityRef};
}
