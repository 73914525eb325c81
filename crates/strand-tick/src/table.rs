//! Declared periodic methods.

use std::rc::Rc;
use std::time::Instant;

use strand_loop::LoopContext;

use crate::spec::TickSpec;

/// Timestamps handed to a tick handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTime {
    /// When this firing started.
    pub now: Instant,
    /// When the previous firing started, `None` on the first one.
    pub last: Option<Instant>,
}

impl TickTime {
    /// Time since the previous firing, if any.
    #[must_use]
    pub fn since_last(&self) -> Option<std::time::Duration> {
        self.last.map(|last| self.now.saturating_duration_since(last))
    }
}

pub(crate) type TickFn<T> = Rc<dyn Fn(&T, &LoopContext, TickTime) -> eyre::Result<()>>;

pub(crate) struct DeclaredTick<T> {
    pub(crate) method: &'static str,
    pub(crate) spec: TickSpec,
    pub(crate) callback: TickFn<T>,
}

/// A type whose instances have periodic methods.
///
/// # Example
///
/// ```ignore
/// impl Ticking for Regen {
///     fn ticks(table: &mut TickTable<Self>) {
///         table.every("regen", TickSpec::every(1, TimeUnit::Seconds), |regen, _ctx, time| {
///             regen.apply(time.since_last());
///             Ok(())
///         });
///     }
/// }
/// ```
pub trait Ticking: Sized + 'static {
    fn ticks(table: &mut TickTable<Self>);
}

/// Periodic methods declared by one type.
pub struct TickTable<T> {
    entries: Vec<DeclaredTick<T>>,
}

impl<T: Ticking> TickTable<T> {
    pub(crate) fn build() -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        T::ticks(&mut table);
        table
    }
}

impl<T: 'static> TickTable<T> {
    /// Declare `method` to fire on `spec`.
    ///
    /// # Panics
    ///
    /// Panics if `method` was already declared or the period is zero.
    #[track_caller]
    pub fn every(
        &mut self,
        method: &'static str,
        spec: TickSpec,
        callback: impl Fn(&T, &LoopContext, TickTime) -> eyre::Result<()> + 'static,
    ) -> &mut Self {
        spec.validate();
        assert!(
            self.find(method).is_none(),
            "tick `{method}` declared twice on `{}`",
            std::any::type_name::<T>()
        );
        self.entries.push(DeclaredTick {
            method,
            spec,
            callback: Rc::new(callback),
        });
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

    pub(crate) fn entries(&self) -> &[DeclaredTick<T>] {
        &self.entries
    }

    pub(crate) fn find(&self, method: &str) -> Option<&DeclaredTick<T>> {
        self.entries.iter().find(|entry| entry.method == method)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::spec::TimeUnit;

    struct Clock;

    impl Ticking for Clock {
        fn ticks(table: &mut TickTable<Self>) {
            table
                .every("second", TickSpec::every(1, TimeUnit::Seconds), |_, _, _| Ok(()))
                .every("minute", TickSpec::every(1, TimeUnit::Minutes), |_, _, _| Ok(()));
        }
    }

    struct Twice;

    impl Ticking for Twice {
        fn ticks(table: &mut TickTable<Self>) {
            let spec = TickSpec::every_millis(10);
            table
                .every("beat", spec, |_, _, _| Ok(()))
                .every("beat", spec, |_, _, _| Ok(()));
        }
    }

    #[test]
    fn test_table_lookup() {
        let table = TickTable::<Clock>::build();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.find("minute").map(|tick| tick.spec.interval()),
            Some(Duration::from_secs(60))
        );
        assert!(table.find("hour").is_none());
    }

    #[test]
    #[should_panic(expected = "tick `beat` declared twice")]
    fn test_duplicate_method_panics() {
        let _ = TickTable::<Twice>::build();
    }

    #[test]
    fn test_since_last() {
        let now = Instant::now();
        let first = TickTime { now, last: None };
        assert_eq!(first.since_last(), None);

        let later = TickTime {
            now: now + Duration::from_millis(5),
            last: Some(now),
        };
        assert_eq!(later.since_last(), Some(Duration::from_millis(5)));
    }
}
