//! Declared event handlers.
//!
//! A type lists its handlers once, in [`Subscriber::subscriptions`]. The
//! resulting table is built the first time a bus sees the type and reused
//! for every instance registered afterwards.

use std::any::{Any, TypeId};
use std::rc::Rc;

use strand_loop::LoopContext;

use crate::Event;
use crate::priority::Priority;

/// Type-erased handler for one event type, bound to a `T` receiver.
pub(crate) type HandlerFn<T> = Rc<dyn Fn(&T, &LoopContext, &dyn Any) -> eyre::Result<()>>;

/// One declared handler.
pub(crate) struct Declared<T> {
    pub(crate) method: &'static str,
    pub(crate) event_type: TypeId,
    pub(crate) event_name: &'static str,
    pub(crate) priority: Priority,
    pub(crate) handler: HandlerFn<T>,
}

/// A type whose instances handle events.
///
/// # Example
///
/// ```ignore
/// struct Scoreboard { total: Cell<u32> }
///
/// impl Subscriber for Scoreboard {
///     fn subscriptions(table: &mut SubscriptionTable<Self>) {
///         table
///             .on::<Goal>("on_goal", |board, _ctx, goal| {
///                 board.total.set(board.total.get() + goal.points);
///                 Ok(())
///             })
///             .on_with_priority::<Reset>("on_reset", Priority::HIGHEST, |board, _, _| {
///                 board.total.set(0);
///                 Ok(())
///             });
///     }
/// }
/// ```
pub trait Subscriber: Sized + 'static {
    fn subscriptions(table: &mut SubscriptionTable<Self>);
}

/// Handlers declared by one subscriber type.
pub struct SubscriptionTable<T> {
    entries: Vec<Declared<T>>,
}

impl<T: Subscriber> SubscriptionTable<T> {
    pub(crate) fn build() -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        T::subscriptions(&mut table);
        table
    }
}

impl<T: 'static> SubscriptionTable<T> {
    /// Declare a handler at [`Priority::NORMAL`].
    ///
    /// # Panics
    ///
    /// Panics if `method` was already declared on this table.
    #[track_caller]
    pub fn on<E: Event>(
        &mut self,
        method: &'static str,
        handler: impl Fn(&T, &LoopContext, &E) -> eyre::Result<()> + 'static,
    ) -> &mut Self {
        self.on_with_priority(method, Priority::NORMAL, handler)
    }

    /// Declare a handler at an explicit priority.
    ///
    /// # Panics
    ///
    /// Panics if `method` was already declared on this table.
    #[track_caller]
    pub fn on_with_priority<E: Event>(
        &mut self,
        method: &'static str,
        priority: Priority,
        handler: impl Fn(&T, &LoopContext, &E) -> eyre::Result<()> + 'static,
    ) -> &mut Self {
        assert!(
            self.entries.iter().all(|entry| entry.method != method),
            "handler `{method}` declared twice on `{}`",
            std::any::type_name::<T>()
        );

        self.entries.push(Declared {
            method,
            event_type: TypeId::of::<E>(),
            event_name: E::event_name(),
            priority,
            handler: Rc::new(
                move |target: &T, ctx: &LoopContext, event: &dyn Any| match event
                    .downcast_ref::<E>()
                {
                    Some(event) => handler(target, ctx, event),
                    None => Ok(()),
                },
            ),
        });
        self
    }

    /// Number of declared handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[Declared<T>] {
        &self.entries
    }
}
