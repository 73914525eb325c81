//! Component trait and capability publishing.
//!
//! A component is data attached to one entity. It may also publish itself
//! under any number of capability traits, so callers can ask an entity
//! "give me whatever is `dyn Damageable`" without knowing the concrete
//! component type:
//!
//! ```ignore
//! trait Damageable: Send + Sync {
//!     fn damage(&self, amount: u32);
//! }
//!
//! impl Component for Health {
//!     fn provide(self: Arc<Self>, caps: &mut Capabilities) {
//!         caps.provide::<dyn Damageable>(self);
//!     }
//! }
//!
//! entity.capability::<dyn Damageable>().map(|d| d.damage(3));
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

/// Data attached to an entity.
pub trait Component: Send + Sync + 'static {
    /// Publish capabilities this component implements.
    fn provide(self: Arc<Self>, caps: &mut Capabilities) {
        let _ = caps;
    }
}

/// Capabilities published by one component.
#[derive(Default)]
pub struct Capabilities {
    pub(crate) entries: Vec<(TypeId, Box<dyn Any + Send + Sync>)>,
}

impl Capabilities {
    /// Publish `capability` under the capability type `C`, usually a
    /// `dyn Trait`.
    pub fn provide<C: ?Sized + Send + Sync + 'static>(&mut self, capability: Arc<C>) -> &mut Self {
        let key = TypeId::of::<C>();
        self.entries.retain(|(existing, _)| *existing != key);
        self.entries.push((key, Box::new(capability)));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Recover a published capability.
pub(crate) fn downcast_capability<C: ?Sized + 'static>(
    boxed: &(dyn Any + Send + Sync),
) -> Option<Arc<C>> {
    boxed.downcast_ref::<Arc<C>>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Tag(&'static str);

    impl Named for Tag {
        fn name(&self) -> &str {
            self.0
        }
    }

    impl Component for Tag {
        fn provide(self: Arc<Self>, caps: &mut Capabilities) {
            caps.provide::<dyn Named>(self);
        }
    }

    struct Plain;

    impl Component for Plain {}

    #[test]
    fn test_provide_and_recover() {
        let mut caps = Capabilities::default();
        Arc::new(Tag("sword")).provide(&mut caps);
        assert_eq!(caps.len(), 1);

        let (key, boxed) = &caps.entries[0];
        assert_eq!(*key, TypeId::of::<dyn Named>());
        let named = downcast_capability::<dyn Named>(&**boxed).unwrap();
        assert_eq!(named.name(), "sword");
        assert!(downcast_capability::<Tag>(&**boxed).is_none());
    }

    #[test]
    fn test_default_provides_nothing() {
        let mut caps = Capabilities::default();
        Arc::new(Plain).provide(&mut caps);
        assert!(caps.is_empty());
    }
}
