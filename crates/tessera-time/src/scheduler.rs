//! Keyed timer queue with cancel-and-rearm (debounce) semantics
//!
//! Each timer lives under a [`TimerKey`]. Arming a key that already has a
//! pending timer replaces it, so repeated requests collapse into a single
//! deferred run carrying the latest task. Timers only run when the owner
//! drives the queue (`run_due`), which keeps everything on one logical
//! thread and lets tests control time through a [`ManualClock`].
//!
//! [`ManualClock`]: crate::ManualClock

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::{ActionType, SliceId};
use tokio::sync::oneshot;

use crate::{Clock, SystemClock};

/// Scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Delay applied to deferred dispatches
    pub dispatch_delay: Duration,
    /// Delay applied to subscriber notifications
    pub notify_delay: Duration,
    /// Upper bound on turns taken by `run_until_idle`
    pub max_rounds: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            dispatch_delay: Duration::from_millis(1),
            notify_delay: Duration::ZERO,
            max_rounds: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Everything fires on the next turn
    pub fn immediate() -> Self {
        SchedulerConfig {
            dispatch_delay: Duration::ZERO,
            notify_delay: Duration::ZERO,
            max_rounds: 1024,
        }
    }
}

/// Identity of a debounced timer
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Deferred dispatch of one action type
    Dispatch(ActionType),
    /// Subscriber notification for one slice
    Notify(SliceId),
    /// Free-form key for callers outside the slice machinery
    Named(String),
}

impl fmt::Debug for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKey::Dispatch(action) => write!(f, "dispatch:{}", action),
            TimerKey::Notify(slice) => write!(f, "notify:{}", slice),
            TimerKey::Named(name) => write!(f, "named:{}", name),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of an armed timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Not yet run
    Pending,
    /// The task ran
    Fired,
    /// The task ran and reported an error
    Failed,
    /// Cancelled or replaced before it could run
    Superseded,
}

/// Completion signal for one armed timer.
///
/// Poll it with [`Completion::status`] or `.await` it.
pub struct Completion {
    rx: Option<oneshot::Receiver<bool>>,
    resolved: CompletionStatus,
}

impl Completion {
    fn new(rx: oneshot::Receiver<bool>) -> Self {
        Completion {
            rx: Some(rx),
            resolved: CompletionStatus::Pending,
        }
    }

    /// A completion that has already fired
    pub fn fired() -> Self {
        Completion {
            rx: None,
            resolved: CompletionStatus::Fired,
        }
    }

    /// Current status, without blocking
    pub fn status(&mut self) -> CompletionStatus {
        if let Some(rx) = self.rx.as_mut() {
            match rx.try_recv() {
                Ok(ok) => self.resolve(ran(ok)),
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.resolve(CompletionStatus::Superseded)
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.resolved
    }

    pub fn is_fired(&mut self) -> bool {
        self.status() == CompletionStatus::Fired
    }

    fn resolve(&mut self, status: CompletionStatus) {
        self.resolved = status;
        self.rx = None;
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Future for Completion {
    type Output = CompletionStatus;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(this.resolved);
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(ok)) => {
                this.resolve(ran(ok));
                Poll::Ready(this.resolved)
            }
            Poll::Ready(Err(_)) => {
                this.resolve(CompletionStatus::Superseded);
                Poll::Ready(CompletionStatus::Superseded)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn ran(ok: bool) -> CompletionStatus {
    if ok {
        CompletionStatus::Fired
    } else {
        CompletionStatus::Failed
    }
}

/// Returns false when the task failed
type Task = Box<dyn FnOnce() -> bool + Send>;

/// (deadline, arming sequence) - orders timers by deadline, then FIFO
type Slot = (Duration, u64);

struct Timer {
    key: TimerKey,
    task: Task,
    done: oneshot::Sender<bool>,
}

#[derive(Default)]
struct Queue {
    timers: BTreeMap<Slot, Timer>,
    armed: HashMap<TimerKey, Slot>,
    seq: u64,
}

impl Queue {
    fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.armed.remove(key) {
            Some(slot) => self.timers.remove(&slot).is_some(),
            None => false,
        }
    }

    /// Earliest due timer armed before sequence `before`
    fn take_due(&mut self, now: Duration, before: u64) -> Option<Timer> {
        let slot = self
            .timers
            .keys()
            .take_while(|(deadline, _)| *deadline <= now)
            .find(|(_, seq)| *seq < before)
            .copied()?;
        let timer = self.timers.remove(&slot)?;
        self.armed.remove(&timer.key);
        Some(timer)
    }
}

/// Keyed, cancel-and-rearm timer queue
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    queue: Mutex<Queue>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler on the system clock with default configuration
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()), SchedulerConfig::default())
    }

    pub fn with_clock(clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Scheduler {
            clock,
            queue: Mutex::new(Queue::default()),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Arm `task` to run after `delay`, replacing any timer under `key`
    pub fn arm<F>(&self, key: TimerKey, delay: Duration, task: F) -> Completion
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(
            key,
            delay,
            Box::new(move || {
                task();
                true
            }),
        )
    }

    /// Like [`Scheduler::arm`] for a task that can fail. A failure is
    /// logged and resolves the completion as [`CompletionStatus::Failed`].
    pub fn arm_fallible<F, E>(&self, key: TimerKey, delay: Duration, task: F) -> Completion
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        let failed = key.clone();
        self.enqueue(
            key,
            delay,
            Box::new(move || match task() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(key = %failed, error = %e, "timer task failed");
                    false
                }
            }),
        )
    }

    fn enqueue(&self, key: TimerKey, delay: Duration, task: Task) -> Completion {
        let (done, rx) = oneshot::channel();
        let deadline = self.clock.now().saturating_add(delay);

        let mut queue = self.queue.lock();
        let replaced = queue.cancel(&key);
        queue.seq += 1;
        let slot = (deadline, queue.seq);
        queue.armed.insert(key.clone(), slot);
        queue.timers.insert(
            slot,
            Timer {
                key: key.clone(),
                task,
                done,
            },
        );
        drop(queue);

        tracing::trace!(%key, ?delay, replaced, "timer armed");
        Completion::new(rx)
    }

    /// Cancel the timer under `key`; true if one was pending
    pub fn cancel(&self, key: &TimerKey) -> bool {
        let cancelled = self.queue.lock().cancel(key);
        if cancelled {
            tracing::trace!(%key, "timer cancelled");
        }
        cancelled
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.queue.lock().armed.contains_key(key)
    }

    /// Number of pending timers
    pub fn pending(&self) -> usize {
        self.queue.lock().timers.len()
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.lock().timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Run one turn: every timer that is due and was armed before this call.
    ///
    /// Tasks run with the queue unlocked, so they may arm or cancel timers;
    /// anything they arm waits for a later turn. Returns the number run.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now();
        let before = self.queue.lock().seq + 1;
        let mut ran = 0;

        loop {
            let Some(timer) = self.queue.lock().take_due(now, before) else {
                break;
            };
            tracing::trace!(key = %timer.key, "timer fired");
            let ok = (timer.task)();
            let _ = timer.done.send(ok);
            ran += 1;
        }

        ran
    }

    /// Run turns until nothing is left, jumping a drivable clock forward to
    /// the next deadline when the queue is otherwise idle.
    ///
    /// Bounded by `max_rounds` so self-rearming timers cannot spin forever.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;

        for _ in 0..self.config.max_rounds {
            let ran = self.run_due();
            total += ran;
            if ran > 0 {
                continue;
            }
            match self.next_deadline() {
                Some(deadline) if self.clock.advance_to(deadline) => continue,
                _ => break,
            }
        }

        total
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
