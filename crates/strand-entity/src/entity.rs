//! Entities: identified bags of components owned by at most one loop.
//!
//! An entity is created detached. [`EntityManager::register_entity`]
//! claims it for a loop with a compare-and-swap on its `registered` flag,
//! so two loops racing for the same entity cannot both win. While it is
//! registered, only the owning loop's thread may change its components.
//!
//! [`EntityManager::register_entity`]: crate::EntityManager::register_entity

use std::any::{Any, TypeId, type_name};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use strand_loop::{Loop, WeakLoop};

use crate::component::{Capabilities, Component, downcast_capability};

struct ComponentSlot {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    provides: Vec<TypeId>,
}

#[derive(Default)]
struct ComponentTable {
    slots: FxHashMap<TypeId, ComponentSlot>,
    /// Capability type to (providing component type, `Arc<Capability>`).
    capabilities: FxHashMap<TypeId, (TypeId, Box<dyn Any + Send + Sync>)>,
}

impl ComponentTable {
    fn take_slot(&mut self, key: TypeId) -> Option<ComponentSlot> {
        let slot = self.slots.remove(&key)?;
        for capability in &slot.provides {
            // A later component may have taken the capability over.
            if self
                .capabilities
                .get(capability)
                .is_some_and(|(provider, _)| *provider == key)
            {
                self.capabilities.remove(capability);
            }
        }
        Some(slot)
    }
}

/// A uniquely identified bag of components.
pub struct Entity {
    id: String,
    registered: AtomicBool,
    owner: Mutex<Option<WeakLoop>>,
    components: RwLock<ComponentTable>,
}

/// Weak back-reference from a component to its entity.
///
/// Lets a component answer "which entity and loop do I belong to" without
/// keeping the entity alive.
#[derive(Clone)]
pub struct EntityRef {
    id: String,
    entity: Weak<Entity>,
}

impl EntityRef {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<Entity>> {
        self.entity.upgrade()
    }

    /// The loop that currently owns the entity.
    #[must_use]
    pub fn owner_loop(&self) -> Option<Loop> {
        self.upgrade().and_then(|entity| entity.owner_loop())
    }
}

impl std::fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityRef").field(&self.id).finish()
    }
}

impl Entity {
    /// Create a detached entity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            registered: AtomicBool::new(false),
            owner: Mutex::new(None),
            components: RwLock::new(ComponentTable::default()),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether some loop currently owns this entity.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// The owning loop, while registered and still running.
    #[must_use]
    pub fn owner_loop(&self) -> Option<Loop> {
        self.owner.lock().as_ref().and_then(WeakLoop::upgrade)
    }

    /// A weak back-reference to this entity.
    #[must_use]
    pub fn downgrade(self: &Arc<Self>) -> EntityRef {
        EntityRef {
            id: self.id.clone(),
            entity: Arc::downgrade(self),
        }
    }

    /// `false → true`. Fails if already owned.
    pub(crate) fn try_claim(&self, owner: WeakLoop) -> bool {
        let mut slot = self.owner.lock();
        let claimed = self
            .registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            *slot = Some(owner);
        }
        claimed
    }

    /// `true → false`. Fails if not owned.
    pub(crate) fn try_release(&self) -> bool {
        let mut slot = self.owner.lock();
        let released = self
            .registered
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            *slot = None;
        }
        released
    }

    #[track_caller]
    fn assert_writable(&self) {
        if let Some(owner) = self.owner_loop() {
            assert!(
                owner.in_loop(),
                "entity `{}` is owned by loop `{}` and must be mutated from it",
                self.id,
                owner.id()
            );
        }
    }

    /// Attach a component, replacing any of the same type.
    ///
    /// # Panics
    ///
    /// Panics if the entity is registered and this is not its loop's thread.
    #[track_caller]
    pub fn insert<C: Component>(&self, component: C) -> Arc<C> {
        self.assert_writable();
        let component = Arc::new(component);
        let mut caps = Capabilities::default();
        Arc::clone(&component).provide(&mut caps);

        let replaced = {
            let mut table = self.components.write();
            let replaced = table.take_slot(TypeId::of::<C>());
            let mut provides = Vec::with_capacity(caps.entries.len());
            for (key, capability) in caps.entries {
                table
                    .capabilities
                    .insert(key, (TypeId::of::<C>(), capability));
                provides.push(key);
            }
            table.slots.insert(
                TypeId::of::<C>(),
                ComponentSlot {
                    name: type_name::<C>(),
                    value: Arc::clone(&component) as Arc<dyn Any + Send + Sync>,
                    provides,
                },
            );
            replaced
        };
        // Dropped outside the lock; a destructor may look at the entity.
        drop(replaced);
        component
    }

    /// Attach a component built from a back-reference to this entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity is registered and this is not its loop's thread.
    #[track_caller]
    pub fn insert_with<C: Component>(
        self: &Arc<Self>,
        build: impl FnOnce(EntityRef) -> C,
    ) -> Arc<C> {
        let component = build(self.downgrade());
        self.insert(component)
    }

    /// The component of type `C`, if attached.
    #[must_use]
    pub fn get<C: Component>(&self) -> Option<Arc<C>> {
        let value = Arc::clone(&self.components.read().slots.get(&TypeId::of::<C>())?.value);
        value.downcast::<C>().ok()
    }

    #[must_use]
    pub fn has<C: Component>(&self) -> bool {
        self.components.read().slots.contains_key(&TypeId::of::<C>())
    }

    /// Detach the component of type `C`.
    ///
    /// # Panics
    ///
    /// Panics if the entity is registered and this is not its loop's thread.
    #[track_caller]
    pub fn remove<C: Component>(&self) -> Option<Arc<C>> {
        self.assert_writable();
        let slot = self.components.write().take_slot(TypeId::of::<C>())?;
        slot.value.downcast::<C>().ok()
    }

    /// The component published under capability `C` (usually `dyn Trait`).
    #[must_use]
    pub fn capability<C: ?Sized + 'static>(&self) -> Option<Arc<C>> {
        let table = self.components.read();
        let (_, boxed) = table.capabilities.get(&TypeId::of::<C>())?;
        downcast_capability::<C>(&**boxed)
    }

    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.read().slots.len()
    }

    /// Type names of the attached components, sorted.
    #[must_use]
    pub fn component_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .components
            .read()
            .slots
            .values()
            .map(|slot| slot.name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("registered", &self.is_registered())
            .field("owner", &self.owner_loop().as_ref().map(Loop::id))
            .field("components", &self.component_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Damageable: Send + Sync {
        fn damage(&self, amount: u32) -> u32;
    }

    #[derive(Debug)]
    struct Health(u32);

    impl Damageable for Health {
        fn damage(&self, amount: u32) -> u32 {
            self.0.saturating_sub(amount)
        }
    }

    impl Component for Health {
        fn provide(self: Arc<Self>, caps: &mut Capabilities) {
            caps.provide::<dyn Damageable>(self);
        }
    }

    #[derive(Debug)]
    struct Name(&'static str);

    impl Component for Name {}

    struct Backlink {
        owner: EntityRef,
    }

    impl Component for Backlink {}

    #[test]
    fn test_insert_get_remove() {
        let entity = Entity::new("zombie-1");
        assert!(!entity.is_registered());
        assert_eq!(entity.component_count(), 0);

        entity.insert(Health(20));
        entity.insert(Name("zombie"));
        assert!(entity.has::<Health>());
        assert_eq!(entity.get::<Name>().map(|n| n.0), Some("zombie"));
        assert_eq!(entity.component_count(), 2);

        // Replacing keeps one slot per type.
        entity.insert(Health(5));
        assert_eq!(entity.get::<Health>().map(|h| h.0), Some(5));
        assert_eq!(entity.component_count(), 2);

        assert_eq!(entity.remove::<Name>().map(|n| n.0), Some("zombie"));
        assert!(entity.remove::<Name>().is_none());
        assert!(!entity.has::<Name>());
    }

    #[test]
    fn test_capability_lookup() {
        let entity = Entity::new("knight");
        assert!(entity.capability::<dyn Damageable>().is_none());

        entity.insert(Health(10));
        let damageable = entity.capability::<dyn Damageable>().unwrap();
        assert_eq!(damageable.damage(3), 7);

        entity.remove::<Health>();
        assert!(entity.capability::<dyn Damageable>().is_none());
    }

    #[derive(Debug)]
    struct Armor(u32);

    impl Damageable for Armor {
        fn damage(&self, amount: u32) -> u32 {
            self.0.saturating_sub(amount / 2)
        }
    }

    impl Component for Armor {
        fn provide(self: Arc<Self>, caps: &mut Capabilities) {
            caps.provide::<dyn Damageable>(self);
        }
    }

    #[test]
    fn test_capability_survives_earlier_provider_removal() {
        let entity = Entity::new("tank");
        entity.insert(Health(10));
        entity.insert(Armor(10));
        assert_eq!(entity.capability::<dyn Damageable>().unwrap().damage(4), 8);

        entity.remove::<Health>();
        assert_eq!(entity.capability::<dyn Damageable>().unwrap().damage(4), 8);
    }

    #[test]
    fn test_insert_with_backlink() {
        let entity = Entity::new("cart");
        let link = entity.insert_with(|owner| Backlink { owner });
        assert_eq!(link.owner.id(), "cart");
        assert!(Arc::ptr_eq(&link.owner.upgrade().unwrap(), &entity));
        assert!(link.owner.owner_loop().is_none());

        // The backlink does not keep the entity alive.
        let weak = link.owner.clone();
        drop(entity);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_component_names_sorted() {
        let entity = Entity::new("names");
        entity.insert(Name("n"));
        entity.insert(Health(1));
        let names = entity.component_names();
        assert_eq!(names.len(), 2);
        assert!(names.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(names.iter().any(|name| name.ends_with("Health")));
    }

    #[test]
    fn test_claim_and_release_are_exclusive() {
        let event_loop = Loop::spawn("claim").unwrap();
        let entity = Entity::new("contested");

        assert!(!entity.try_release());
        assert!(entity.try_claim(event_loop.downgrade()));
        assert!(!entity.try_claim(event_loop.downgrade()));
        assert_eq!(entity.owner_loop().as_ref(), Some(&event_loop));

        assert!(entity.try_release());
        assert!(!entity.try_release());
        assert!(entity.owner_loop().is_none());

        event_loop.shutdown();
        assert!(event_loop.await_termination(std::time::Duration::from_secs(5)));
    }

    #[test]
    fn test_foreign_mutation_panics_while_owned() {
        let event_loop = Loop::spawn("owner").unwrap();
        let entity = Entity::new("guarded");
        assert!(entity.try_claim(event_loop.downgrade()));

        let foreign = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            entity.insert(Name("intruder"));
        }));
        assert!(foreign.is_err());
        assert!(!entity.has::<Name>());

        // The owner's thread may mutate.
        let inside = Arc::clone(&entity);
        event_loop
            .submit(move |_| {
                inside.insert(Name("owner"));
            })
            .wait_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(entity.get::<Name>().map(|n| n.0), Some("owner"));

        assert!(entity.try_release());
        entity.insert(Name("free again"));

        event_loop.shutdown();
        assert!(event_loop.await_termination(std::time::Duration::from_secs(5)));
    }
}
