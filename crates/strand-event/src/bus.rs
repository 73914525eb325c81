//! The loop-scoped event bus.
//!
//! # Dispatch
//!
//! `post` runs every handler registered for the event's exact type,
//! synchronously, on the loop thread:
//!
//! ```text
//! post(X) ─► depth + 1 > max? ──yes──► dropped (None)
//!                 │ no
//!                 ▼
//!        snapshot handlers[X]  (sorted by priority, then registration)
//!                 │
//!                 ▼
//!        run each; errors and panics are logged and skipped
//!                 │
//!                 ▼
//!        depth - 1, Some(succeeded)
//! ```
//!
//! Handlers may post, register and unregister re-entrantly. A handler
//! registered during a dispatch first runs on the next post; one
//! unregistered during a dispatch is skipped if it has not run yet.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use strand_loop::{Loop, LoopConfig, LoopContext, ObjectKey, ObjectRef, TaskHandle, panic_message};
use tracing::{debug, error, trace, warn};

use crate::Event;
use crate::priority::Priority;
use crate::subscription::{Subscriber, SubscriptionTable};

type InvokeFn = Box<dyn Fn(&LoopContext, &dyn Any) -> eyre::Result<()>>;

/// A handler bound to a registered object.
struct Registered {
    owner: ObjectKey,
    method: &'static str,
    event_name: &'static str,
    priority: Priority,
    invoke: InvokeFn,
}

/// Event counters, kept when `metrics.events` is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Posts that reached dispatch.
    pub posted: u64,
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub failed: u64,
    /// Posts dropped by the depth limit.
    pub dropped: u64,
}

/// Priority-ordered, recursion-bounded pub/sub for one loop.
pub struct EventBus {
    max_depth: usize,
    depth: Cell<usize>,
    handlers: RefCell<FxHashMap<TypeId, Vec<Rc<Registered>>>>,
    owners: RefCell<FxHashMap<ObjectKey, FxHashSet<&'static str>>>,
    tables: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    stats: Option<Cell<EventStats>>,
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl EventBus {
    /// Create a bus configured from `config`.
    #[must_use]
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            max_depth: config.max_post_depth,
            depth: Cell::new(0),
            handlers: RefCell::new(FxHashMap::default()),
            owners: RefCell::new(FxHashMap::default()),
            tables: RefCell::new(FxHashMap::default()),
            stats: config.metrics.events.then(|| Cell::new(EventStats::default())),
        }
    }

    /// The bus of this loop, installing one if needed.
    pub fn install(ctx: &LoopContext) -> Rc<Self> {
        ctx.component_or_insert_with(|| Self::new(ctx.config()))
    }

    fn table<T: Subscriber>(&self) -> Rc<SubscriptionTable<T>> {
        let key = TypeId::of::<T>();
        let cached = self.tables.borrow().get(&key).cloned();
        if let Some(table) = cached.and_then(|table| table.downcast::<SubscriptionTable<T>>().ok())
        {
            return table;
        }
        let table = Rc::new(SubscriptionTable::<T>::build());
        self.tables
            .borrow_mut()
            .insert(key, Rc::clone(&table) as Rc<dyn Any>);
        table
    }

    /// Register every handler `T` declares, bound to `target`.
    ///
    /// Returns the number of newly registered handlers. Handlers already
    /// registered for this object count zero. The bus keeps `target` alive
    /// until it is unregistered.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn register<T, P>(&self, ctx: &LoopContext, target: &P) -> usize
    where
        T: Subscriber,
        P: ObjectRef<T>,
    {
        ctx.assert_in_loop();
        let owner = target.key();
        let table = self.table::<T>();
        let mut added = 0;

        for declared in table.entries() {
            if !self
                .owners
                .borrow_mut()
                .entry(owner)
                .or_default()
                .insert(declared.method)
            {
                continue;
            }

            let bound = target.clone();
            let handler = Rc::clone(&declared.handler);
            let registered = Rc::new(Registered {
                owner,
                method: declared.method,
                event_name: declared.event_name,
                priority: declared.priority,
                invoke: Box::new(move |ctx: &LoopContext, event: &dyn Any| {
                    handler(bound.object(), ctx, event)
                }),
            });

            let mut handlers = self.handlers.borrow_mut();
            let list = handlers.entry(declared.event_type).or_default();
            // Equal priorities keep registration order.
            let at = list.partition_point(|existing| existing.priority <= registered.priority);
            list.insert(at, registered);
            added += 1;
        }

        if added > 0 {
            debug!(
                loop_id = ctx.id(),
                subscriber = std::any::type_name::<T>(),
                handlers = added,
                "registered event handlers"
            );
        }
        added
    }

    /// Remove every handler bound to `target`. Returns the number removed.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister<T, P>(&self, ctx: &LoopContext, target: &P) -> usize
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        self.unregister_key(ctx, target.key())
    }

    /// Remove every handler bound to the object with this key.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister_key(&self, ctx: &LoopContext, owner: ObjectKey) -> usize {
        ctx.assert_in_loop();
        if self.owners.borrow_mut().remove(&owner).is_none() {
            return 0;
        }

        let mut removed = 0;
        let mut handlers = self.handlers.borrow_mut();
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|registered| registered.owner != owner);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Whether any handler is bound to `target`.
    pub fn is_registered<T, P>(&self, target: &P) -> bool
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        self.owners
            .borrow()
            .get(&target.key())
            .is_some_and(|methods| !methods.is_empty())
    }

    /// Number of handlers registered for events of type `E`.
    #[must_use]
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .borrow()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    /// Number of objects with at least one registered handler.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.owners.borrow().len()
    }

    /// Current nesting depth of `post` calls.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Counters, if `metrics.events` is enabled.
    #[must_use]
    pub fn stats(&self) -> Option<EventStats> {
        self.stats.as_ref().map(Cell::get)
    }

    fn is_live(&self, registered: &Registered) -> bool {
        self.owners
            .borrow()
            .get(&registered.owner)
            .is_some_and(|methods| methods.contains(registered.method))
    }

    fn record(&self, update: impl FnOnce(&mut EventStats)) {
        if let Some(cell) = &self.stats {
            let mut stats = cell.get();
            update(&mut stats);
            cell.set(stats);
        }
    }

    /// Dispatch `event` to its handlers.
    ///
    /// Returns the number of handlers that completed without error, or
    /// `None` if the post was nested deeper than the configured maximum and
    /// dropped without invoking anything.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn post<E: Event>(&self, ctx: &LoopContext, event: &E) -> Option<usize> {
        ctx.assert_in_loop();

        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            warn!(
                loop_id = ctx.id(),
                event = E::event_name(),
                depth,
                max_depth = self.max_depth,
                "event dropped: post depth exceeded"
            );
            self.record(|stats| stats.dropped += 1);
            return None;
        }
        self.depth.set(depth);
        let _guard = DepthGuard(&self.depth);
        self.record(|stats| stats.posted += 1);

        let snapshot: Vec<Rc<Registered>> = self
            .handlers
            .borrow()
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default();
        trace!(
            loop_id = ctx.id(),
            event = E::event_name(),
            handlers = snapshot.len(),
            depth,
            "posting event"
        );

        let mut succeeded = 0;
        let mut failed = 0_u64;
        for registered in &snapshot {
            if !self.is_live(registered) {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (registered.invoke)(ctx, event as &dyn Any)
            }));
            match outcome {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(err)) => {
                    failed += 1;
                    warn!(
                        loop_id = ctx.id(),
                        event = registered.event_name,
                        method = registered.method,
                        error = ?err,
                        "event handler failed"
                    );
                }
                Err(payload) => {
                    failed += 1;
                    error!(
                        loop_id = ctx.id(),
                        event = registered.event_name,
                        method = registered.method,
                        panic = %panic_message(&*payload),
                        "event handler panicked"
                    );
                }
            }
        }

        self.record(|stats| {
            stats.delivered += succeeded as u64;
            stats.failed += failed;
        });
        Some(succeeded)
    }

    /// Post `event` on `target`'s bus from any thread.
    ///
    /// Resolves to `None` if the loop has no bus or the post was dropped.
    pub fn post_on<E: Event + Send>(target: &Loop, event: E) -> TaskHandle<Option<usize>> {
        target.submit(move |ctx| match ctx.component::<Self>() {
            Some(bus) => bus.post(ctx, &event),
            None => {
                debug!(
                    loop_id = ctx.id(),
                    event = E::event_name(),
                    "no event bus on loop"
                );
                None
            }
        })
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("max_depth", &self.max_depth)
            .field("depth", &self.depth.get())
            .field("event_types", &self.handlers.borrow().len())
            .field("subscribers", &self.owners.borrow().len())
            .field("stats", &self.stats())
            .finish()
    }
}
