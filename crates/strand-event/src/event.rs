//! Event marker trait.
//!
//! Events are plain values. Dispatch is keyed by the event's exact type:
//! a handler for `Damage` never sees a `Heal`, and there is no subtyping.

use std::any::type_name;

/// Marker trait for event values.
///
/// Any `'static` type can be posted. Events crossing loops through
/// [`EventBus::post_on`](crate::EventBus::post_on) must also be `Send`.
pub trait Event: 'static {
    /// Name used in logs.
    fn event_name() -> &'static str {
        type_name::<Self>()
    }
}

// Blanket implementation: any 'static type can be an event
impl<T: 'static> Event for T {}
