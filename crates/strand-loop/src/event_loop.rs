//! The loop: a single worker thread draining a task queue.
//!
//! # Execution model
//!
//! ```text
//! any thread ──submit──► [ channel ] ──► worker thread
//!                                          ├─ sort into High / Normal / Low queues
//!                                          ├─ fire due timers
//!                                          ├─ run one task (highest class first)
//!                                          └─ block until next message or timer
//! ```
//!
//! Tasks submitted by one thread at one priority run in submission order.
//! `submit` never runs the task inline, even from the loop's own thread.
//!
//! # Shutdown
//!
//! `shutdown` flips the loop to closed under a write lock and enqueues a
//! marker, so no task can land behind the marker. The worker then either
//! drains everything queued ahead of it or drops it (failing those handles
//! with [`TaskError::Abandoned`]), depending on
//! [`LoopConfig::drain_on_shutdown`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::LoopConfig;
use crate::context::LoopContext;
use crate::error::{LoopError, TaskError, panic_message};
use crate::group::LoopGroupId;
use crate::task::{self, TaskHandle};
use crate::timer::TimerId;

/// Priority class of a submitted task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Hook run on the worker thread before the first task.
pub type StartHook = Arc<dyn Fn(&LoopContext) + Send + Sync>;

type Task = Box<dyn FnOnce(&LoopContext) + Send>;

enum Envelope {
    Task { priority: TaskPriority, task: Task },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    ShuttingDown,
}

struct Shared {
    id: String,
    owner: Option<LoopGroupId>,
    config: LoopConfig,
    sender: Sender<Envelope>,
    state: RwLock<RunState>,
    terminated: Mutex<bool>,
    terminated_signal: Condvar,
    thread_id: OnceLock<ThreadId>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

thread_local! {
    static CURRENT: RefCell<Option<WeakLoop>> = const { RefCell::new(None) };
}

/// Handle to a loop. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct Loop {
    shared: Arc<Shared>,
}

/// Non-owning handle to a loop.
///
/// The worker thread only holds these, so a loop whose every [`Loop`] handle
/// is dropped stops once its queue is empty.
#[derive(Clone)]
pub struct WeakLoop {
    shared: Weak<Shared>,
}

impl WeakLoop {
    /// The loop, if any [`Loop`] handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Loop> {
        self.shared.upgrade().map(|shared| Loop { shared })
    }
}

impl std::fmt::Debug for WeakLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.upgrade() {
            Some(handle) => f.debug_tuple("WeakLoop").field(&handle.id()).finish(),
            None => f.write_str("WeakLoop(<dropped>)"),
        }
    }
}

/// Builder for a standalone [`Loop`].
pub struct LoopBuilder {
    id: String,
    owner: Option<LoopGroupId>,
    config: LoopConfig,
    on_start: Option<StartHook>,
}

impl LoopBuilder {
    /// Start building a loop with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: None,
            config: LoopConfig::default(),
            on_start: None,
        }
    }

    /// Record the group that owns this loop.
    #[must_use]
    pub fn owner(mut self, owner: LoopGroupId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Use this configuration.
    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `hook` on the worker thread before any task.
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn(&LoopContext) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub(crate) fn on_start_shared(mut self, hook: Option<StartHook>) -> Self {
        self.on_start = hook;
        self
    }

    /// Start the worker thread.
    pub fn spawn(self) -> Result<Loop, LoopError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = Loop {
            shared: Arc::new(Shared {
                id: self.id,
                owner: self.owner,
                config: self.config,
                sender,
                state: RwLock::new(RunState::Running),
                terminated: Mutex::new(false),
                terminated_signal: Condvar::new(),
                thread_id: OnceLock::new(),
                worker: Mutex::new(None),
            }),
        };

        let worker = Worker {
            handle: handle.downgrade(),
            id: handle.id().to_string(),
            config: handle.config().clone(),
        };
        let on_start = self.on_start;
        let join = thread::Builder::new()
            .name(handle.id().to_string())
            .spawn(move || run_worker(worker, receiver, on_start))
            .map_err(|source| LoopError::Spawn {
                loop_id: handle.id().to_string(),
                source,
            })?;
        *handle.shared.worker.lock() = Some(join);

        debug!(loop_id = handle.id(), "loop started");
        Ok(handle)
    }
}

impl Loop {
    /// Spawn a loop with default configuration.
    pub fn spawn(id: impl Into<String>) -> Result<Self, LoopError> {
        LoopBuilder::new(id).spawn()
    }

    /// Start building a loop.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> LoopBuilder {
        LoopBuilder::new(id)
    }

    /// The loop running the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().as_ref().and_then(WeakLoop::upgrade))
    }

    /// A handle that does not keep the loop alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakLoop {
        WeakLoop {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// This loop's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The group that owns this loop, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&LoopGroupId> {
        self.shared.owner.as_ref()
    }

    /// This loop's configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.shared.config
    }

    /// True iff called from this loop's worker thread.
    #[must_use]
    pub fn in_loop(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Submit a task at normal priority.
    ///
    /// Never blocks and never runs `f` inline. After shutdown the returned
    /// handle has already failed with [`TaskError::Closed`].
    pub fn submit<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&LoopContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_with(TaskPriority::Normal, f)
    }

    /// Submit a task in the given priority class.
    pub fn submit_with<F, R>(&self, priority: TaskPriority, f: F) -> TaskHandle<R>
    where
        F: FnOnce(&LoopContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = self.shared.state.read();
        if *state != RunState::Running {
            return TaskHandle::failed(TaskError::Closed {
                loop_id: self.shared.id.clone(),
            });
        }

        let (promise, handle) = task::pair();
        let task: Task = Box::new(move |ctx: &LoopContext| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(ctx)))
                .map_err(|payload| TaskError::Panicked(panic_message(&*payload)));
            if let Err(err) = &outcome {
                warn!(loop_id = ctx.id(), error = %err, "task failed");
            }
            promise.complete(outcome);
        });

        // A failed send drops the envelope, which abandons the promise.
        let _ = self.shared.sender.send(Envelope::Task { priority, task });
        handle
    }

    /// Run `f` against the loop component `T`, if present.
    pub fn with_component<T, F, R>(&self, f: F) -> TaskHandle<Option<R>>
    where
        T: 'static,
        F: FnOnce(&T) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(move |ctx| ctx.component::<T>().map(|component| f(&component)))
    }

    /// Run `f` on this loop once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> TaskHandle<TimerId>
    where
        F: FnOnce(&LoopContext) + Send + 'static,
    {
        self.submit(move |ctx| ctx.schedule_after(delay, f))
    }

    /// Stop accepting tasks. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.write();
        if *state != RunState::Running {
            return;
        }
        *state = RunState::ShuttingDown;
        let _ = self.shared.sender.send(Envelope::Shutdown);
        info!(
            loop_id = self.id(),
            drain = self.shared.config.drain_on_shutdown,
            "loop shutting down"
        );
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shared.state.read() != RunState::Running
    }

    /// Whether the worker thread has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        *self.shared.terminated.lock()
    }

    /// Wait up to `timeout` for the worker to exit. Returns `true` if it did.
    ///
    /// Called from the loop's own thread this cannot succeed and returns the
    /// current state immediately.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if self.in_loop() {
            return self.is_terminated();
        }

        let deadline = Instant::now().checked_add(timeout);
        let finished = {
            let mut terminated = self.shared.terminated.lock();
            while !*terminated {
                match deadline {
                    Some(deadline) => {
                        if self
                            .shared
                            .terminated_signal
                            .wait_until(&mut terminated, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                    None => self.shared.terminated_signal.wait(&mut terminated),
                }
            }
            *terminated
        };

        if finished {
            if let Some(join) = self.shared.worker.lock().take() {
                let _ = join.join();
            }
        }
        finished
    }

    fn mark_terminated(&self) {
        *self.shared.terminated.lock() = true;
        self.shared.terminated_signal.notify_all();
    }
}

impl PartialEq for Loop {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Loop {}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("id", &self.shared.id)
            .field("owner", &self.shared.owner)
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Worker-side queue state.
struct Queues {
    classes: [VecDeque<Task>; TaskPriority::COUNT],
    shutting_down: bool,
    drain: bool,
}

impl Queues {
    fn new(drain: bool) -> Self {
        Self {
            classes: std::array::from_fn(|_| VecDeque::new()),
            shutting_down: false,
            drain,
        }
    }

    fn accept(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Task { priority, task } => self.classes[priority.index()].push_back(task),
            Envelope::Shutdown => {
                self.shutting_down = true;
                if !self.drain {
                    let discarded: usize = self.classes.iter().map(VecDeque::len).sum();
                    if discarded > 0 {
                        debug!(discarded, "abandoning queued tasks");
                    }
                    // Dropping the tasks abandons their promises.
                    self.classes.iter_mut().for_each(VecDeque::clear);
                }
            }
        }
    }

    fn drain_channel(&mut self, receiver: &Receiver<Envelope>) {
        loop {
            match receiver.try_recv() {
                Ok(envelope) => self.accept(envelope),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.shutting_down = true;
                    return;
                }
            }
        }
    }

    fn pop(&mut self) -> Option<Task> {
        self.classes.iter_mut().find_map(VecDeque::pop_front)
    }
}

/// What the worker thread knows about its loop without owning it.
struct Worker {
    handle: WeakLoop,
    id: String,
    config: LoopConfig,
}

fn run_worker(worker: Worker, receiver: Receiver<Envelope>, on_start: Option<StartHook>) {
    let Worker { handle, id, config } = worker;
    if let Some(owner) = handle.upgrade() {
        let _ = owner.shared.thread_id.set(thread::current().id());
    }
    CURRENT.with(|current| *current.borrow_mut() = Some(handle.clone()));

    let ctx = LoopContext::new(handle.clone(), id.clone(), config);
    if let Some(hook) = on_start {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&ctx))) {
            error!(
                loop_id = %id,
                panic = %panic_message(&*payload),
                "loop start hook panicked"
            );
        }
    }

    let mut queues = Queues::new(ctx.config().drain_on_shutdown);
    loop {
        queues.drain_channel(&receiver);

        // Only timers due now and scheduled before this pass; anything a
        // callback re-arms waits until a task has had its turn.
        let now = Instant::now();
        let watermark = ctx.next_timer_id();
        while let Some((timer, callback)) = ctx.pop_due_timer(now, watermark) {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&ctx))) {
                warn!(
                    loop_id = %id,
                    timer = timer.raw(),
                    panic = %panic_message(&*payload),
                    "timer callback panicked"
                );
            }
        }

        if let Some(task) = queues.pop() {
            task(&ctx);
            continue;
        }

        if queues.shutting_down {
            break;
        }

        let next = match ctx.next_timer_deadline() {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(envelope) => Some(envelope),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    queues.shutting_down = true;
                    None
                }
            },
            // Disconnected: every `Loop` handle is gone.
            None => receiver.recv().ok(),
        };
        match next {
            Some(envelope) => queues.accept(envelope),
            None if ctx.next_timer_deadline().is_none() => queues.shutting_down = true,
            None => {}
        }
    }

    let abandoned_timers = ctx.pending_timers();
    ctx.clear();
    drop(ctx);
    CURRENT.with(|current| current.borrow_mut().take());

    info!(loop_id = %id, abandoned_timers, "loop terminated");
    if let Some(owner) = handle.upgrade() {
        owner.mark_terminated();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn stop(event_loop: &Loop) {
        event_loop.shutdown();
        assert!(event_loop.await_termination(WAIT));
    }

    #[test]
    fn test_submit_returns_value() {
        let event_loop = Loop::spawn("submit").unwrap();
        let handle = event_loop.submit(|ctx| format!("hello from {}", ctx.id()));
        assert_eq!(handle.wait_timeout(WAIT).unwrap(), "hello from submit");
        stop(&event_loop);
    }

    #[test]
    fn test_runs_on_loop_thread() {
        let event_loop = Loop::spawn("affinity").unwrap();
        assert!(!event_loop.in_loop());

        let handle = event_loop.clone();
        let (in_loop, name, current) = event_loop
            .submit(move |_| {
                (
                    handle.in_loop(),
                    thread::current().name().map(str::to_string),
                    Loop::current().map(|l| l.id().to_string()),
                )
            })
            .wait_timeout(WAIT)
            .unwrap();

        assert!(in_loop);
        assert_eq!(name.as_deref(), Some("affinity"));
        assert_eq!(current.as_deref(), Some("affinity"));
        assert!(Loop::current().is_none());
        stop(&event_loop);
    }

    #[test]
    fn test_single_producer_order_is_preserved() {
        let event_loop = Loop::spawn("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let seen = Arc::clone(&seen);
                event_loop.submit(move |_| seen.lock().push(i))
            })
            .collect();
        for handle in handles {
            handle.wait_timeout(WAIT).unwrap();
        }

        assert_eq!(*seen.lock(), (0..200).collect::<Vec<_>>());
        stop(&event_loop);
    }

    #[test]
    fn test_submit_from_loop_thread_enqueues() {
        let event_loop = Loop::spawn("reentrant").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let outer_seen = Arc::clone(&seen);
        let inner = event_loop
            .submit(move |ctx| {
                let inner_seen = Arc::clone(&outer_seen);
                let inner = ctx.submit(move |_| inner_seen.lock().push("inner"));
                outer_seen.lock().push("outer");
                inner
            })
            .wait_timeout(WAIT)
            .unwrap();
        inner.wait_timeout(WAIT).unwrap();

        assert_eq!(*seen.lock(), ["outer", "inner"]);
        stop(&event_loop);
    }

    #[test]
    fn test_priority_classes() {
        let event_loop = Loop::spawn("priority").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        // Park the worker so the next submissions queue up together.
        let blocker = event_loop.submit(move |_| {
            let _ = release_rx.recv();
        });

        let mut handles = Vec::new();
        for (priority, label) in [
            (TaskPriority::Low, "low"),
            (TaskPriority::Normal, "normal"),
            (TaskPriority::High, "high-1"),
            (TaskPriority::High, "high-2"),
        ] {
            let seen = Arc::clone(&seen);
            handles.push(event_loop.submit_with(priority, move |_| seen.lock().push(label)));
        }
        release_tx.send(()).unwrap();

        blocker.wait_timeout(WAIT).unwrap();
        for handle in handles {
            handle.wait_timeout(WAIT).unwrap();
        }
        assert_eq!(*seen.lock(), ["high-1", "high-2", "normal", "low"]);
        stop(&event_loop);
    }

    #[test]
    fn test_panicking_task_does_not_kill_loop() {
        let event_loop = Loop::spawn("panics").unwrap();

        let failed = event_loop.submit(|_| -> u32 { panic!("boom") });
        let next = event_loop.submit(|_| 1_u32);

        assert_eq!(
            failed.wait_timeout(WAIT),
            Err(TaskError::Panicked("boom".to_string()))
        );
        assert_eq!(next.wait_timeout(WAIT), Ok(1));
        stop(&event_loop);
    }

    #[test]
    fn test_submit_after_shutdown_is_closed() {
        let event_loop = Loop::spawn("closed").unwrap();
        stop(&event_loop);
        assert!(event_loop.is_shutdown());
        assert!(event_loop.is_terminated());

        let handle = event_loop.submit(|_| ());
        assert!(handle.is_done());
        assert_eq!(
            handle.wait(),
            Err(TaskError::Closed {
                loop_id: "closed".to_string()
            })
        );

        // Idempotent.
        event_loop.shutdown();
        assert!(event_loop.await_termination(WAIT));
    }

    #[test]
    fn test_shutdown_drains_by_default() {
        let event_loop = Loop::spawn("drain").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ran = Arc::clone(&ran);
                event_loop.submit(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        stop(&event_loop);

        assert_eq!(ran.load(Ordering::SeqCst), 50);
        assert!(handles.into_iter().all(|h| h.wait().is_ok()));
    }

    #[test]
    fn test_shutdown_can_discard() {
        let event_loop = Loop::builder("discard")
            .config(LoopConfig::default().with_drain_on_shutdown(false))
            .spawn()
            .unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        let blocker = event_loop.submit(move |_| {
            let _ = release_rx.recv();
        });
        let queued = event_loop.submit(|_| 5);
        event_loop.shutdown();
        release_tx.send(()).unwrap();

        assert!(event_loop.await_termination(WAIT));
        assert_eq!(blocker.wait(), Ok(()));
        assert_eq!(queued.wait(), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_wait_timeout_does_not_cancel() {
        let event_loop = Loop::spawn("timeout").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_in_task = Arc::clone(&ran);
        let slow = event_loop.submit(move |_| {
            thread::sleep(Duration::from_millis(100));
            ran_in_task.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(
            slow.wait_timeout(Duration::from_millis(5)),
            Err(TaskError::Timeout(Duration::from_millis(5)))
        );

        stop(&event_loop);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_fires_on_loop() {
        let event_loop = Loop::spawn("timers").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let owner = event_loop.clone();
        let started = Instant::now();
        event_loop
            .schedule(Duration::from_millis(30), move |_| {
                let _ = tx.send(owner.in_loop());
            })
            .wait_timeout(WAIT)
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT), Ok(true));
        assert!(started.elapsed() >= Duration::from_millis(30));
        stop(&event_loop);
    }

    #[test]
    fn test_timer_callback_panic_is_contained() {
        let event_loop = Loop::spawn("timer-panic").unwrap();
        event_loop
            .schedule(Duration::ZERO, |_| panic!("timer boom"))
            .wait_timeout(WAIT)
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(event_loop.submit(|_| 2).wait_timeout(WAIT), Ok(2));
        stop(&event_loop);
    }

    #[test]
    fn test_start_hook_runs_first() {
        #[derive(Debug)]
        struct Marker(&'static str);

        let event_loop = Loop::builder("hooked")
            .on_start(|ctx| {
                ctx.insert_component(Marker("installed"));
            })
            .spawn()
            .unwrap();

        let marker = event_loop
            .with_component::<Marker, _, _>(|marker| marker.0)
            .wait_timeout(WAIT)
            .unwrap();
        assert_eq!(marker, Some("installed"));
        stop(&event_loop);
    }

    #[test]
    fn test_async_wait() {
        let event_loop = Loop::spawn("async").unwrap();
        let value = pollster::block_on(event_loop.submit(|_| 40 + 2));
        assert_eq!(value, Ok(42));
        stop(&event_loop);
    }

    #[test]
    fn test_many_producers() {
        let event_loop = Loop::spawn("producers").unwrap();
        let total = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let event_loop = event_loop.clone();
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    let handles: Vec<_> = (0..100)
                        .map(|_| {
                            let total = Arc::clone(&total);
                            event_loop.submit(move |_| total.fetch_add(1, Ordering::Relaxed))
                        })
                        .collect();
                    for handle in handles {
                        handle.wait_timeout(WAIT).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(total.load(Ordering::Relaxed), 400);
        stop(&event_loop);
    }

    #[test]
    fn test_rearming_timer_does_not_starve_tasks() {
        fn rearm(ctx: &LoopContext, hits: Arc<AtomicUsize>) {
            hits.fetch_add(1, Ordering::Relaxed);
            ctx.schedule_after(Duration::ZERO, move |ctx| rearm(ctx, hits));
        }

        let event_loop = Loop::spawn("rearm").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        event_loop
            .submit(move |ctx| rearm(ctx, counted))
            .wait_timeout(WAIT)
            .unwrap();

        for i in 0..10 {
            assert_eq!(event_loop.submit(move |_| i).wait_timeout(WAIT), Ok(i));
        }
        assert!(hits.load(Ordering::Relaxed) > 1);
        stop(&event_loop);
    }

    #[test]
    fn test_dropping_every_handle_stops_worker() {
        struct Sentinel(Sender<()>);

        impl Drop for Sentinel {
            fn drop(&mut self) {
                let _ = self.0.send(());
            }
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let event_loop = Loop::spawn("orphaned").unwrap();
        let weak = event_loop.downgrade();
        let attached = event_loop
            .submit(move |ctx| {
                ctx.insert_component(Sentinel(tx));
                ctx.handle().is_some()
            })
            .wait_timeout(WAIT);
        assert_eq!(attached, Ok(true));

        drop(event_loop);
        assert_eq!(rx.recv_timeout(WAIT), Ok(()));
        assert!(weak.upgrade().is_none());
    }
}
