//! The loop-scoped tick manager.
//!
//! Every registered (object, method) pair owns one record and at most one
//! pending loop timer. A firing runs the method, stamps the record's last
//! fire time, then schedules the next timer from the record's mode:
//!
//! ```text
//! timer(key, epoch, scheduled)
//!     │
//!     ├─ record gone or epoch changed ──► stop
//!     │
//!     ├─ run method(now, last)            (errors logged, tick continues)
//!     │
//!     └─ schedule next:  FixedRate  → scheduled + period
//!                        FixedDelay → completion + period
//! ```
//!
//! Timers fire on the loop thread between tasks, never on a separate timer
//! thread. The epoch guards against a timer that outlived its registration
//! firing a newer registration of the same method.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use strand_loop::{LoopConfig, LoopContext, ObjectKey, ObjectRef, TimerId, panic_message};
use tracing::{debug, error, warn};

use crate::spec::TickSpec;
use crate::table::{TickFn, TickTable, TickTime, Ticking};

type BoundFn = Rc<dyn Fn(&LoopContext, TickTime) -> eyre::Result<()>>;
type RecordKey = (ObjectKey, &'static str);

struct TickRecord {
    spec: TickSpec,
    epoch: u64,
    first_fire: Instant,
    last_fire: Option<Instant>,
    timer: TimerId,
    callback: BoundFn,
}

/// Tick counters, kept when `metrics.ticks` is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Firings that returned `Ok`.
    pub fired: u64,
    /// Firings that returned an error or panicked.
    pub failed: u64,
}

/// Periodic method scheduler for one loop.
pub struct TickManager {
    records: RefCell<FxHashMap<RecordKey, TickRecord>>,
    tables: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    next_epoch: Cell<u64>,
    stats: Option<Cell<TickStats>>,
}

impl TickManager {
    #[must_use]
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            records: RefCell::new(FxHashMap::default()),
            tables: RefCell::new(FxHashMap::default()),
            next_epoch: Cell::new(0),
            stats: config.metrics.ticks.then(|| Cell::new(TickStats::default())),
        }
    }

    /// The tick manager of this loop, installing one if needed.
    pub fn install(ctx: &LoopContext) -> Rc<Self> {
        ctx.component_or_insert_with(|| Self::new(ctx.config()))
    }

    fn table<T: Ticking>(&self) -> Rc<TickTable<T>> {
        let key = TypeId::of::<T>();
        let cached = self.tables.borrow().get(&key).cloned();
        if let Some(table) = cached.and_then(|table| table.downcast::<TickTable<T>>().ok()) {
            return table;
        }
        let table = Rc::new(TickTable::<T>::build());
        self.tables
            .borrow_mut()
            .insert(key, Rc::clone(&table) as Rc<dyn Any>);
        table
    }

    /// Schedule every periodic method `T` declares, bound to `target`.
    ///
    /// Returns the number of newly scheduled methods. The manager keeps
    /// `target` alive until its ticks are unregistered.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn register<T, P>(&self, ctx: &LoopContext, target: &P) -> usize
    where
        T: Ticking,
        P: ObjectRef<T>,
    {
        ctx.assert_in_loop();
        let table = self.table::<T>();
        let added = table
            .entries()
            .iter()
            .filter(|tick| self.schedule_new(ctx, target, tick.method, tick.spec, &tick.callback))
            .count();
        if added > 0 {
            debug!(
                loop_id = ctx.id(),
                target = std::any::type_name::<T>(),
                ticks = added,
                "registered ticks"
            );
        }
        added
    }

    /// Schedule one declared method with its declared timing.
    ///
    /// Returns `false` if `T` declares no such method or it is already
    /// scheduled for `target`.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn register_method<T, P>(&self, ctx: &LoopContext, target: &P, method: &str) -> bool
    where
        T: Ticking,
        P: ObjectRef<T>,
    {
        ctx.assert_in_loop();
        let table = self.table::<T>();
        table.find(method).is_some_and(|tick| {
            self.schedule_new(ctx, target, tick.method, tick.spec, &tick.callback)
        })
    }

    /// Schedule one declared method with explicit timing.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread or if `spec` has a zero period.
    #[track_caller]
    pub fn register_method_with<T, P>(
        &self,
        ctx: &LoopContext,
        target: &P,
        method: &str,
        spec: TickSpec,
    ) -> bool
    where
        T: Ticking,
        P: ObjectRef<T>,
    {
        ctx.assert_in_loop();
        spec.validate();
        let table = self.table::<T>();
        table
            .find(method)
            .is_some_and(|tick| self.schedule_new(ctx, target, tick.method, spec, &tick.callback))
    }

    fn schedule_new<T, P>(
        &self,
        ctx: &LoopContext,
        target: &P,
        method: &'static str,
        spec: TickSpec,
        callback: &TickFn<T>,
    ) -> bool
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        let key = (target.key(), method);
        if self.records.borrow().contains_key(&key) {
            return false;
        }

        let bound = target.clone();
        let callback = Rc::clone(callback);
        let epoch = self.next_epoch.get();
        self.next_epoch.set(epoch + 1);

        let first_fire = Instant::now()
            .checked_add(spec.initial_delay())
            .unwrap_or_else(Instant::now);
        let timer = arm(ctx, key, epoch, first_fire);
        self.records.borrow_mut().insert(
            key,
            TickRecord {
                spec,
                epoch,
                first_fire,
                last_fire: None,
                timer,
                callback: Rc::new(move |ctx: &LoopContext, time: TickTime| {
                    callback(bound.object(), ctx, time)
                }),
            },
        );
        true
    }

    /// Cancel every tick bound to `target`. Returns the number cancelled.
    pub fn unregister<T, P>(&self, ctx: &LoopContext, target: &P) -> usize
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        self.unregister_key(ctx, target.key())
    }

    /// Cancel every tick bound to the object with this key.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister_key(&self, ctx: &LoopContext, owner: ObjectKey) -> usize {
        ctx.assert_in_loop();
        let removed: Vec<TickRecord> = {
            let mut records = self.records.borrow_mut();
            let keys: Vec<RecordKey> = records
                .keys()
                .filter(|(key, _)| *key == owner)
                .copied()
                .collect();
            keys.iter().filter_map(|key| records.remove(key)).collect()
        };
        for record in &removed {
            ctx.cancel_timer(record.timer);
        }
        removed.len()
    }

    /// Cancel one tick. Returns `false` if it was not scheduled.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister_method<T, P>(&self, ctx: &LoopContext, target: &P, method: &str) -> bool
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        ctx.assert_in_loop();
        let owner = target.key();
        let removed = {
            let mut records = self.records.borrow_mut();
            let key = records
                .keys()
                .find(|(key, name)| *key == owner && *name == method)
                .copied();
            key.and_then(|key| records.remove(&key))
        };
        removed.map(|record| ctx.cancel_timer(record.timer)).is_some()
    }

    /// Cancel every tick this manager owns. Returns the number cancelled.
    ///
    /// # Panics
    ///
    /// Panics if called off the loop thread.
    #[track_caller]
    pub fn unregister_all(&self, ctx: &LoopContext) -> usize {
        ctx.assert_in_loop();
        let removed = std::mem::take(&mut *self.records.borrow_mut());
        for record in removed.values() {
            ctx.cancel_timer(record.timer);
        }
        if !removed.is_empty() {
            debug!(loop_id = ctx.id(), ticks = removed.len(), "cancelled all ticks");
        }
        removed.len()
    }

    /// Whether `method` is scheduled for `target`.
    pub fn is_registered<T, P>(&self, target: &P, method: &str) -> bool
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        let owner = target.key();
        self.records
            .borrow()
            .keys()
            .any(|(key, name)| *key == owner && *name == method)
    }

    /// When `method` last fired for `target`.
    pub fn last_fire<T, P>(&self, target: &P, method: &str) -> Option<Instant>
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        let owner = target.key();
        self.records
            .borrow()
            .iter()
            .find(|((key, name), _)| *key == owner && *name == method)
            .and_then(|(_, record)| record.last_fire)
    }

    /// When `method` was first due to fire for `target`.
    pub fn first_fire<T, P>(&self, target: &P, method: &str) -> Option<Instant>
    where
        T: 'static,
        P: ObjectRef<T>,
    {
        let owner = target.key();
        self.records
            .borrow()
            .iter()
            .find(|((key, name), _)| *key == owner && *name == method)
            .map(|(_, record)| record.first_fire)
    }

    /// Number of scheduled ticks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Counters, if `metrics.ticks` is enabled.
    #[must_use]
    pub fn stats(&self) -> Option<TickStats> {
        self.stats.as_ref().map(Cell::get)
    }

    fn record_outcome(&self, ok: bool) {
        if let Some(cell) = &self.stats {
            let mut stats = cell.get();
            if ok {
                stats.fired += 1;
            } else {
                stats.failed += 1;
            }
            cell.set(stats);
        }
    }

    fn fire(&self, ctx: &LoopContext, key: RecordKey, epoch: u64, scheduled: Instant) {
        let (callback, last) = {
            let records = self.records.borrow();
            match records.get(&key) {
                Some(record) if record.epoch == epoch => {
                    (Rc::clone(&record.callback), record.last_fire)
                }
                _ => return,
            }
        };

        let now = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(ctx, TickTime { now, last })));
        let ok = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(loop_id = ctx.id(), method = key.1, error = ?err, "tick failed");
                false
            }
            Err(payload) => {
                error!(
                    loop_id = ctx.id(),
                    method = key.1,
                    panic = %panic_message(&*payload),
                    "tick panicked"
                );
                false
            }
        };
        self.record_outcome(ok);

        // The method may have unregistered itself, or been replaced.
        let mut records = self.records.borrow_mut();
        let Some(record) = records.get_mut(&key) else {
            return;
        };
        if record.epoch != epoch {
            return;
        }
        record.last_fire = Some(now);
        let next = record
            .spec
            .mode
            .next_fire(scheduled, Instant::now(), record.spec.interval());
        record.timer = arm(ctx, key, epoch, next);
    }
}

fn arm(ctx: &LoopContext, key: RecordKey, epoch: u64, at: Instant) -> TimerId {
    ctx.schedule_at(at, move |ctx| {
        if let Some(manager) = ctx.component::<TickManager>() {
            manager.fire(ctx, key, epoch, at);
        }
    })
}

impl std::fmt::Debug for TickManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickManager")
            .field("ticks", &self.records.borrow().len())
            .field("stats", &self.stats())
            .finish()
    }
}
