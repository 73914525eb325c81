//! The loop-scoped entity registry.
//!
//! # Registration
//!
//! ```text
//! register_entity(e)
//!     ├─ id already here?          ──► false
//!     ├─ CAS e.registered f → t    ──► fails: owned elsewhere, false
//!     ├─ insert into id map
//!     └─ post EntityRegistered     ──► true
//!
//! unregister_entity(id)
//!     ├─ absent                    ──► None
//!     ├─ post EntityUnregistering  (entity still present)
//!     ├─ remove from id map
//!     ├─ CAS e.registered t → f
//!     └─ post EntityUnregistered   ──► Some(e)
//! ```
//!
//! Notifications go to the loop's [`EventBus`] when one is installed and
//! are skipped otherwise.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use hashbrown::HashMap;
use strand_event::{Event, EventBus};
use strand_loop::{Loop, LoopContext, TaskHandle};
use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::events::{EntityRegistered, EntityUnregistered, EntityUnregistering};

/// Entity counts, kept when `metrics.entities` is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityGauge {
    /// Entities registered right now.
    pub current: usize,
    /// Highest `current` seen.
    pub peak: usize,
    /// Successful registrations.
    pub registered: u64,
    /// Successful unregistrations.
    pub unregistered: u64,
}

/// Registry of the entities one loop owns.
pub struct EntityManager {
    loop_id: String,
    entities: RefCell<HashMap<String, Arc<Entity>>>,
    gauge: Option<Cell<EntityGauge>>,
}

impl EntityManager {
    #[must_use]
    pub fn new(ctx: &LoopContext) -> Self {
        Self {
            loop_id: ctx.id().to_string(),
            entities: RefCell::new(HashMap::new()),
            gauge: ctx
                .config()
                .metrics
                .entities
                .then(|| Cell::new(EntityGauge::default())),
        }
    }

    /// The entity manager of this loop, installing it (and an event bus) if
    /// needed.
    pub fn install(ctx: &LoopContext) -> Rc<Self> {
        EventBus::install(ctx);
        ctx.component_or_insert_with(|| Self::new(ctx))
    }

    fn notify<E: Event>(ctx: &LoopContext, event: &E) {
        if let Some(bus) = ctx.component::<EventBus>() {
            bus.post(ctx, event);
        }
    }

    fn update_gauge(&self, update: impl FnOnce(&mut EntityGauge)) {
        if let Some(cell) = &self.gauge {
            let mut gauge = cell.get();
            update(&mut gauge);
            gauge.peak = gauge.peak.max(gauge.current);
            cell.set(gauge);
        }
    }

    /// Claim `entity` for this loop.
    ///
    /// Returns `false`, changing nothing, if an entity with the same id is
    /// already here or `entity` is owned by another loop.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn register_entity(&self, ctx: &LoopContext, entity: Arc<Entity>) -> bool {
        ctx.assert_in_loop();

        if self.entities.borrow().contains_key(entity.id()) {
            debug!(
                loop_id = %self.loop_id,
                entity_id = entity.id(),
                "entity id already registered here"
            );
            return false;
        }
        if !entity.try_claim(ctx.weak_handle()) {
            warn!(
                loop_id = %self.loop_id,
                entity_id = entity.id(),
                owner = ?entity.owner_loop().map(|owner| owner.id().to_string()),
                "entity is owned by another loop"
            );
            return false;
        }

        let entity_id = entity.id().to_string();
        self.entities.borrow_mut().insert(entity_id.clone(), entity);
        let current = self.entity_count();
        self.update_gauge(|gauge| {
            gauge.current = current;
            gauge.registered += 1;
        });
        debug!(loop_id = %self.loop_id, entity_id = %entity_id, "entity registered");

        Self::notify(
            ctx,
            &EntityRegistered {
                entity_id,
                loop_id: self.loop_id.clone(),
            },
        );
        true
    }

    /// Release the entity with this id.
    ///
    /// Returns `None` if no such entity is registered here.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister_entity(&self, ctx: &LoopContext, id: &str) -> Option<Arc<Entity>> {
        ctx.assert_in_loop();

        if !self.has_entity(id) {
            return None;
        }
        Self::notify(
            ctx,
            &EntityUnregistering {
                entity_id: id.to_string(),
                loop_id: self.loop_id.clone(),
            },
        );

        // A handler may have unregistered it re-entrantly.
        let entity = self.entities.borrow_mut().remove(id)?;
        if !entity.try_release() {
            warn!(loop_id = %self.loop_id, entity_id = id, "entity was not marked registered");
        }
        let current = self.entity_count();
        self.update_gauge(|gauge| {
            gauge.current = current;
            gauge.unregistered += 1;
        });
        debug!(loop_id = %self.loop_id, entity_id = id, "entity unregistered");

        Self::notify(
            ctx,
            &EntityUnregistered {
                entity_id: id.to_string(),
                loop_id: self.loop_id.clone(),
            },
        );
        Some(entity)
    }

    /// Release every entity. Returns how many were released.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister_all(&self, ctx: &LoopContext) -> usize {
        let released = self
            .entity_ids()
            .iter()
            .filter(|id| self.unregister_entity(ctx, id).is_some())
            .count();
        if released > 0 {
            info!(loop_id = %self.loop_id, released, "released all entities");
        }
        released
    }

    #[must_use]
    pub fn has_entity(&self, id: &str) -> bool {
        self.entities.borrow().contains_key(id)
    }

    #[must_use]
    pub fn get_entity(&self, id: &str) -> Option<Arc<Entity>> {
        self.entities.borrow().get(id).cloned()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.borrow().len()
    }

    /// Live, read-only view of the id → entity map.
    ///
    /// Release the view before registering or unregistering.
    #[must_use]
    pub fn entity_map(&self) -> Ref<'_, HashMap<String, Arc<Entity>>> {
        self.entities.borrow()
    }

    /// Ids of the registered entities, sorted.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.entities.borrow().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Counts, if `metrics.entities` is enabled.
    #[must_use]
    pub fn gauge(&self) -> Option<EntityGauge> {
        self.gauge.as_ref().map(Cell::get)
    }

    /// Register `entity` on `target` from any thread.
    pub fn register_on(target: &Loop, entity: Arc<Entity>) -> TaskHandle<bool> {
        target.submit(move |ctx| Self::install(ctx).register_entity(ctx, entity))
    }

    /// Unregister the entity `id` on `target` from any thread.
    pub fn unregister_on(target: &Loop, id: impl Into<String>) -> TaskHandle<Option<Arc<Entity>>> {
        let id = id.into();
        target.submit(move |ctx| {
            ctx.component::<Self>()
                .and_then(|manager| manager.unregister_entity(ctx, &id))
        })
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("loop_id", &self.loop_id)
            .field("entities", &self.entities.borrow().len())
            .field("gauge", &self.gauge())
            .finish()
    }
}

/// A loop that stops without unregistering its entities still frees them,
/// so another loop can claim them.
impl Drop for EntityManager {
    fn drop(&mut self) {
        let entities = std::mem::take(self.entities.get_mut());
        let released = entities
            .values()
            .filter(|entity| entity.try_release())
            .count();
        if released > 0 {
            debug!(loop_id = %self.loop_id, released, "released entities of a stopped loop");
        }
    }
}
