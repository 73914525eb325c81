//! The loop thread's view of its loop.
//!
//! A [`LoopContext`] exists once per loop and lives on the loop's worker
//! thread. Every task, timer callback and start hook receives it by
//! reference. It owns the loop-scoped components (entity manager, event
//! bus, tick manager, caller extensions) and the loop's timers.
//!
//! The context is `!Send`: its components are reachable only from inside
//! the loop's own tasks, which is what lets them use `Rc`/`RefCell`
//! instead of locks.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::config::LoopConfig;
use crate::error::TaskError;
use crate::event_loop::{Loop, TaskPriority, WeakLoop};
use crate::task::TaskHandle;
use crate::timer::{TimerId, TimerQueue};

/// Callback run by a timer on the loop thread.
pub(crate) type TimerFn = Box<dyn FnOnce(&LoopContext)>;

/// Loop-scoped state, available only on the loop's worker thread.
pub struct LoopContext {
    handle: WeakLoop,
    id: String,
    config: LoopConfig,
    thread: ThreadId,
    components: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    timers: RefCell<TimerQueue<TimerFn>>,
}

impl LoopContext {
    pub(crate) fn new(handle: WeakLoop, id: String, config: LoopConfig) -> Self {
        Self {
            handle,
            id,
            config,
            thread: thread::current().id(),
            components: RefCell::new(FxHashMap::default()),
            timers: RefCell::new(TimerQueue::new()),
        }
    }

    /// The thread-safe handle of this loop, or `None` once every handle
    /// outside the loop has been dropped.
    #[must_use]
    pub fn handle(&self) -> Option<Loop> {
        self.handle.upgrade()
    }

    /// A handle to this loop that does not keep it alive.
    #[must_use]
    pub fn weak_handle(&self) -> WeakLoop {
        self.handle.clone()
    }

    /// This loop's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// This loop's configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Panic unless called from this loop's worker thread.
    ///
    /// # Panics
    ///
    /// Panics when the single-writer invariant has been broken.
    #[track_caller]
    pub fn assert_in_loop(&self) {
        assert!(
            thread::current().id() == self.thread,
            "loop-owned state of `{}` touched from a foreign thread",
            self.id
        );
    }

    /// Submit a task to this same loop. It runs after the current task.
    pub fn submit<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&LoopContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        match self.handle.upgrade() {
            Some(handle) => handle.submit_with(TaskPriority::Normal, f),
            None => TaskHandle::failed(TaskError::Closed {
                loop_id: self.id.clone(),
            }),
        }
    }

    // ==================== Components ====================

    /// Attach a component, replacing any existing one of the same type.
    pub fn insert_component<T: 'static>(&self, component: T) -> Rc<T> {
        let component = Rc::new(component);
        self.components
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::clone(&component) as Rc<dyn Any>);
        component
    }

    /// Look up a component by type.
    #[must_use]
    pub fn component<T: 'static>(&self) -> Option<Rc<T>> {
        let component = self.components.borrow().get(&TypeId::of::<T>()).cloned()?;
        component.downcast::<T>().ok()
    }

    /// Look up a component, creating it with `create` if absent.
    ///
    /// `create` may itself install other components.
    pub fn component_or_insert_with<T: 'static>(&self, create: impl FnOnce() -> T) -> Rc<T> {
        if let Some(existing) = self.component::<T>() {
            return existing;
        }
        let created = create();
        // `create` may have installed a `T` re-entrantly; keep the first one.
        if let Some(existing) = self.component::<T>() {
            return existing;
        }
        self.insert_component(created)
    }

    /// Whether a component of this type is attached.
    #[must_use]
    pub fn has_component<T: 'static>(&self) -> bool {
        self.components.borrow().contains_key(&TypeId::of::<T>())
    }

    /// Detach a component, returning it if it was attached.
    pub fn remove_component<T: 'static>(&self) -> Option<Rc<T>> {
        let component = self.components.borrow_mut().remove(&TypeId::of::<T>())?;
        component.downcast::<T>().ok()
    }

    /// Number of attached components.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.borrow().len()
    }

    // ==================== Timers ====================

    /// Run `f` on this loop once `delay` has elapsed.
    pub fn schedule_after(
        &self,
        delay: Duration,
        f: impl FnOnce(&LoopContext) + 'static,
    ) -> TimerId {
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(far_future);
        self.schedule_at(deadline, f)
    }

    /// Run `f` on this loop at (or shortly after) `deadline`.
    pub fn schedule_at(&self, deadline: Instant, f: impl FnOnce(&LoopContext) + 'static) -> TimerId {
        self.timers.borrow_mut().schedule(deadline, Box::new(f))
    }

    /// Cancel a pending timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().cancel(id)
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.borrow_mut().next_deadline()
    }

    /// Id the next scheduled timer will get. Timers scheduled from here on
    /// compare greater or equal.
    pub(crate) fn next_timer_id(&self) -> TimerId {
        self.timers.borrow().next_id()
    }

    pub(crate) fn pop_due_timer(
        &self,
        now: Instant,
        before: TimerId,
    ) -> Option<(TimerId, TimerFn)> {
        self.timers.borrow_mut().pop_due(now, before)
    }

    pub(crate) fn clear(&self) {
        // Drop outside the borrows: destructors may reach back into the context.
        let timers = std::mem::take(&mut *self.timers.borrow_mut());
        drop(timers);
        let components = std::mem::take(&mut *self.components.borrow_mut());
        drop(components);
    }
}

fn far_future() -> Instant {
    // Roughly thirty years out; `Instant` has no MAX.
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}

impl std::fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopContext")
            .field("loop_id", &self.id)
            .field("components", &self.components.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        hits: Cell<u32>,
    }

    fn with_context<R: Send + 'static>(f: impl FnOnce(&LoopContext) -> R + Send + 'static) -> R {
        let event_loop = Loop::spawn("context-test").unwrap();
        let result = event_loop.submit(f).wait_timeout(Duration::from_secs(5));
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        result.unwrap()
    }

    #[test]
    fn test_component_insert_get_remove() {
        with_context(|ctx| {
            assert!(ctx.component::<Counter>().is_none());

            let counter = ctx.insert_component(Counter::default());
            counter.hits.set(3);

            let again = ctx.component::<Counter>().unwrap();
            assert!(Rc::ptr_eq(&counter, &again));
            assert_eq!(again.hits.get(), 3);
            assert!(ctx.has_component::<Counter>());
            assert_eq!(ctx.component_count(), 1);

            assert!(ctx.remove_component::<Counter>().is_some());
            assert!(!ctx.has_component::<Counter>());
        });
    }

    #[test]
    fn test_component_or_insert_with_keeps_existing() {
        with_context(|ctx| {
            let first = ctx.component_or_insert_with(Counter::default);
            first.hits.set(9);
            let second = ctx.component_or_insert_with(|| Counter {
                hits: Cell::new(100),
            });
            assert_eq!(second.hits.get(), 9);
        });
    }

    #[test]
    fn test_cancel_timer() {
        let fired = with_context(|ctx| {
            let id = ctx.schedule_after(Duration::from_secs(60), |_| {});
            assert_eq!(ctx.pending_timers(), 1);
            assert!(ctx.cancel_timer(id));
            assert!(!ctx.cancel_timer(id));
            ctx.pending_timers()
        });
        assert_eq!(fired, 0);
    }
}
