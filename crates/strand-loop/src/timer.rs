//! Deadline-ordered timer queue owned by a loop thread.
//!
//! Cancellation is lazy: a cancelled timer leaves a stale heap entry that is
//! skipped when it reaches the top. The heap is compacted once stale entries
//! outnumber live ones.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use rustc_hash::FxHashMap;

/// Identifies a scheduled timer on one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Heaps smaller than this are never compacted.
const COMPACT_THRESHOLD: usize = 64;

/// Timers keyed by deadline, ties broken by scheduling order.
pub(crate) struct TimerQueue<F> {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    pending: FxHashMap<TimerId, F>,
    next_id: u64,
}

impl<F> Default for TimerQueue<F> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: FxHashMap::default(),
            next_id: 0,
        }
    }
}

impl<F> TimerQueue<F> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, deadline: Instant, callback: F) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse((deadline, id)));
        self.pending.insert(id, callback);
        id
    }

    /// Returns `true` if the timer was still pending.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let cancelled = self.pending.remove(&id).is_some();
        if cancelled
            && self.heap.len() > COMPACT_THRESHOLD
            && self.heap.len() > 2 * self.pending.len()
        {
            let pending = &self.pending;
            self.heap.retain(|Reverse((_, id))| pending.contains_key(id));
        }
        cancelled
    }

    pub(crate) const fn next_id(&self) -> TimerId {
        TimerId(self.next_id)
    }

    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the earliest timer whose deadline is at or before `now`, provided
    /// it was scheduled before `before`. A later timer at the top blocks the
    /// rest until the next call with a higher bound.
    pub(crate) fn pop_due(&mut self, now: Instant, before: TimerId) -> Option<(TimerId, F)> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            if !self.pending.contains_key(&id) {
                self.heap.pop();
                continue;
            }
            if id >= before {
                return None;
            }
            self.heap.pop();
            return self.pending.remove(&id).map(|callback| (id, callback));
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const ANY: TimerId = TimerId(u64::MAX);

    #[test]
    fn test_pops_in_deadline_order() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(base + Duration::from_millis(30), "c");
        queue.schedule(base + Duration::from_millis(10), "a");
        queue.schedule(base + Duration::from_millis(20), "b");

        assert_eq!(queue.next_deadline(), Some(base + Duration::from_millis(10)));

        let now = base + Duration::from_millis(25);
        assert_eq!(queue.pop_due(now, ANY).map(|(_, v)| v), Some("a"));
        assert_eq!(queue.pop_due(now, ANY).map(|(_, v)| v), Some("b"));
        assert_eq!(queue.pop_due(now, ANY).map(|(_, v)| v), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_keep_schedule_order() {
        let at = Instant::now();
        let mut queue = TimerQueue::new();
        for label in ["first", "second", "third"] {
            queue.schedule(at, label);
        }
        let order: Vec<_> =
            std::iter::from_fn(|| queue.pop_due(at, ANY).map(|(_, v)| v)).collect();
        assert_eq!(order, ["first", "second", "third"]);
    }

    #[test]
    fn test_cancel_skips_stale_entries() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        let early = queue.schedule(base, 1);
        queue.schedule(base + Duration::from_millis(5), 2);

        assert!(queue.cancel(early));
        assert!(!queue.cancel(early));
        assert_eq!(queue.next_deadline(), Some(base + Duration::from_millis(5)));
        assert!(queue.pop_due(base, ANY).is_none());
        assert_eq!(
            queue
                .pop_due(base + Duration::from_millis(5), ANY)
                .map(|(_, v)| v),
            Some(2)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_timers_scheduled_after_bound_wait() {
        let at = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(at, "old");
        let bound = queue.next_id();
        queue.schedule(at, "new");

        assert_eq!(queue.pop_due(at, bound).map(|(_, v)| v), Some("old"));
        assert!(queue.pop_due(at, bound).is_none());
        let bound = queue.next_id();
        assert_eq!(queue.pop_due(at, bound).map(|(_, v)| v), Some("new"));
    }

    #[test]
    fn test_cancel_compacts_stale_entries() {
        let at = Instant::now() + Duration::from_secs(60);
        let mut queue = TimerQueue::new();
        let ids: Vec<_> = (0..1_000).map(|i| queue.schedule(at, i)).collect();

        for id in &ids[..990] {
            assert!(queue.cancel(*id));
        }
        assert_eq!(queue.len(), 10);
        assert!(queue.heap.len() <= COMPACT_THRESHOLD, "heap {}", queue.heap.len());
        assert_eq!(queue.next_deadline(), Some(at));
    }
}
