//! Task handles - the caller's side of a submitted task.
//!
//! A submission creates a [`Promise`]/[`TaskHandle`] pair sharing one slot.
//! The promise travels with the task to the loop thread; the handle stays
//! with the caller, who can block on it, block with a timeout, poll it, or
//! await it as a [`Future`].
//!
//! A promise that is dropped without completing (the task was discarded)
//! fills the slot with [`TaskError::Abandoned`], so a waiter never hangs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{TaskError, TaskResult};

struct SlotState<R> {
    outcome: Option<TaskResult<R>>,
    completed: bool,
    waker: Option<Waker>,
}

struct Slot<R> {
    state: Mutex<SlotState<R>>,
    ready: Condvar,
}

impl<R> Slot<R> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                outcome: None,
                completed: false,
                waker: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, outcome: TaskResult<R>) {
        let waker = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            state.outcome = Some(outcome);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Create a connected promise/handle pair.
pub(crate) fn pair<R>() -> (Promise<R>, TaskHandle<R>) {
    let slot = Arc::new(Slot::new());
    (
        Promise {
            slot: Some(Arc::clone(&slot)),
        },
        TaskHandle { slot },
    )
}

/// Completion side of a task, owned by the loop.
pub(crate) struct Promise<R> {
    slot: Option<Arc<Slot<R>>>,
}

impl<R> Promise<R> {
    pub(crate) fn complete(mut self, outcome: TaskResult<R>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(outcome);
        }
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(TaskError::Abandoned));
        }
    }
}

/// Handle to the eventual result of a task submitted to a loop.
///
/// Dropping the handle is fire-and-forget: the task still runs, its result
/// (or failure) is discarded.
pub struct TaskHandle<R> {
    slot: Arc<Slot<R>>,
}

impl<R> TaskHandle<R> {
    /// A handle that has already failed.
    pub(crate) fn failed(error: TaskError) -> Self {
        let (promise, handle) = pair();
        promise.complete(Err(error));
        handle
    }

    /// A handle that has already succeeded.
    pub fn ready(value: R) -> Self {
        let (promise, handle) = pair();
        promise.complete(Ok(value));
        handle
    }

    /// Whether the task has finished (successfully or not).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.state.lock().completed
    }

    /// Take the outcome if the task has finished, without blocking.
    pub fn try_take(&mut self) -> Option<TaskResult<R>> {
        self.slot.state.lock().outcome.take()
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Never call this from a loop thread on a task queued to the same loop:
    /// the loop is busy running the caller and the wait never ends. Prefer
    /// [`TaskHandle::wait_timeout`] for any wait that crosses loops.
    pub fn wait(self) -> TaskResult<R> {
        let mut state = self.slot.state.lock();
        while !state.completed {
            self.slot.ready.wait(&mut state);
        }
        state.outcome.take().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// On timeout the task is left alone; it still runs to completion.
    pub fn wait_timeout(self, timeout: Duration) -> TaskResult<R> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };

        let mut state = self.slot.state.lock();
        while !state.completed {
            if self.slot.ready.wait_until(&mut state, deadline).timed_out() && !state.completed {
                return Err(TaskError::Timeout(timeout));
            }
        }
        state.outcome.take().unwrap_or(Err(TaskError::Abandoned))
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = TaskResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();
        if state.completed {
            return Poll::Ready(state.outcome.take().unwrap_or(Err(TaskError::Abandoned)));
        }
        let stale = state
            .waker
            .as_ref()
            .is_none_or(|waker| !waker.will_wake(cx.waker()));
        if stale {
            state.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .finish()
    }
}
