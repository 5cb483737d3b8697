//! Deadline enforcement for whole calls and single attempts.
//!
//! One lazily started scheduler thread per [`ExecutionTimer`] fires expired tasks. Firing never
//! runs request work: it marks the task expired, cancels the call's
//! [`CancellationToken`] (which wakes backoff sleeps) and aborts the [`AbortSignal`] of the
//! attempt currently registered with the task.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::util::{lock_unpoisoned, wait_timeout_unpoisoned, wait_unpoisoned};

const PURGE_THRESHOLD: usize = 1024;

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        *cancelled = true;
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_unpoisoned(&self.inner.cancelled)
    }

    /// Clears a cancellation raised by an expired deadline once it has been reported.
    pub(crate) fn clear(&self) {
        *lock_unpoisoned(&self.inner.cancelled) = false;
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when woken by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        loop {
            if *cancelled {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    cancelled = wait_timeout_unpoisoned(&self.inner.condvar, cancelled, deadline - now);
                }
                None => cancelled = wait_unpoisoned(&self.inner.condvar, cancelled),
            }
        }
    }
}

type AbortHook = Box<dyn FnOnce() + Send>;

/// Abort handle for one in-flight transport attempt.
///
/// Transports register hooks that close the underlying connection; hooks registered after the
/// signal was aborted run immediately.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortState>,
}

#[derive(Default)]
struct AbortState {
    aborted: AtomicBool,
    hooks: Mutex<Vec<AbortHook>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn on_abort<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = lock_unpoisoned(&self.inner.hooks);
            if !self.inner.aborted.load(Ordering::SeqCst) {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    pub fn abort(&self) {
        let hooks = {
            let mut hooks = lock_unpoisoned(&self.inner.hooks);
            if self.inner.aborted.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook();
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

const TASK_PENDING: u8 = 0;
const TASK_EXPIRED: u8 = 1;
const TASK_CANCELLED: u8 = 2;

struct TaskInner {
    timeout: Duration,
    deadline: Instant,
    state: AtomicU8,
    token: Option<CancellationToken>,
    attempt: Mutex<Option<AbortSignal>>,
}

impl TaskInner {
    fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    /// Expiry and cancellation race through one compare-and-swap; the token is cancelled while
    /// the attempt lock is held so `cancel` never returns in between.
    fn fire(&self) {
        let attempt = {
            let attempt = lock_unpoisoned(&self.attempt);
            if self
                .state
                .compare_exchange(TASK_PENDING, TASK_EXPIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            if let Some(token) = &self.token {
                token.cancel();
            }
            attempt.clone()
        };
        tracing::debug!(
            timeout_ms = self.timeout.as_millis() as u64,
            "execution deadline reached"
        );
        if let Some(signal) = attempt {
            signal.abort();
        }
    }
}

/// Handle for one scheduled deadline. Dropping the task cancels it.
pub struct ExecutionTask {
    inner: Option<Arc<TaskInner>>,
}

impl ExecutionTask {
    fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.as_ref().map(|inner| inner.timeout)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .as_ref()
            .map(|inner| inner.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn has_expired(&self) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };
        match inner.state() {
            TASK_EXPIRED => true,
            TASK_PENDING => Instant::now() >= inner.deadline,
            _ => false,
        }
    }

    /// Registers the attempt the deadline should abort. The registration ends when the guard drops.
    pub fn register_current_attempt(&self, signal: AbortSignal) -> AttemptRegistration<'_> {
        if let Some(inner) = &self.inner {
            *lock_unpoisoned(&inner.attempt) = Some(signal.clone());
            if inner.state() == TASK_EXPIRED {
                signal.abort();
            }
        }
        AttemptRegistration { task: self }
    }

    pub fn unregister_current_attempt(&self) {
        if let Some(inner) = &self.inner {
            *lock_unpoisoned(&inner.attempt) = None;
        }
    }

    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            let mut attempt = lock_unpoisoned(&inner.attempt);
            let _ = inner.state.compare_exchange(
                TASK_PENDING,
                TASK_CANCELLED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            *attempt = None;
        }
    }
}

impl Drop for ExecutionTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for ExecutionTask {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExecutionTask")
            .field("timeout", &self.timeout())
            .field("expired", &self.has_expired())
            .finish()
    }
}

pub struct AttemptRegistration<'a> {
    task: &'a ExecutionTask,
}

impl Drop for AttemptRegistration<'_> {
    fn drop(&mut self) {
        self.task.unregister_current_attempt();
    }
}

struct Scheduled {
    deadline: Instant,
    sequence: u64,
    task: Weak<TaskInner>,
}

impl Scheduled {
    fn is_live(&self) -> bool {
        self.task
            .upgrade()
            .is_some_and(|task| task.state() == TASK_PENDING)
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Default)]
struct SchedulerState {
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_sequence: u64,
    worker_started: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Scheduler {
    state: Mutex<SchedulerState>,
    condvar: Condvar,
}

impl Scheduler {
    fn run(&self) {
        let mut state = lock_unpoisoned(&self.state);
        loop {
            if state.shutdown {
                return;
            }
            let next_deadline = state.queue.peek().map(|Reverse(next)| next.deadline);
            match next_deadline {
                None => state = wait_unpoisoned(&self.condvar, state),
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        state = wait_timeout_unpoisoned(&self.condvar, state, deadline - now);
                        continue;
                    }
                    let due = state.queue.pop();
                    drop(state);
                    if let Some(Reverse(entry)) = due
                        && let Some(task) = entry.task.upgrade()
                    {
                        task.fire();
                    }
                    state = lock_unpoisoned(&self.state);
                }
            }
        }
    }
}

/// Owns the scheduler thread that fires execution and attempt deadlines.
pub struct ExecutionTimer {
    scheduler: Arc<Scheduler>,
}

impl ExecutionTimer {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(Scheduler::default()),
        }
    }

    /// Schedules the call deadline. A zero timeout returns a disabled task that never expires.
    pub fn start(&self, timeout: Duration, token: &CancellationToken) -> ExecutionTask {
        self.schedule(timeout, Some(token.clone()), None)
    }

    pub(crate) fn start_attempt(&self, timeout: Duration, signal: &AbortSignal) -> ExecutionTask {
        self.schedule(timeout, None, Some(signal.clone()))
    }

    fn schedule(
        &self,
        timeout: Duration,
        token: Option<CancellationToken>,
        attempt: Option<AbortSignal>,
    ) -> ExecutionTask {
        if timeout.is_zero() {
            return ExecutionTask::disabled();
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return ExecutionTask::disabled();
        };

        let inner = Arc::new(TaskInner {
            timeout,
            deadline,
            state: AtomicU8::new(TASK_PENDING),
            token,
            attempt: Mutex::new(attempt),
        });

        let mut state = lock_unpoisoned(&self.scheduler.state);
        self.ensure_worker(&mut state);
        if state.queue.len() >= PURGE_THRESHOLD {
            state.queue.retain(|Reverse(entry)| entry.is_live());
        }
        let sequence = state.next_sequence;
        state.next_sequence = state.next_sequence.wrapping_add(1);
        state.queue.push(Reverse(Scheduled {
            deadline,
            sequence,
            task: Arc::downgrade(&inner),
        }));
        drop(state);
        self.scheduler.condvar.notify_all();

        ExecutionTask { inner: Some(inner) }
    }

    fn ensure_worker(&self, state: &mut SchedulerState) {
        if state.worker_started {
            return;
        }
        let scheduler = Arc::clone(&self.scheduler);
        match thread::Builder::new()
            .name("reqexec-timer".to_owned())
            .spawn(move || scheduler.run())
        {
            Ok(_) => state.worker_started = true,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "failed to start deadline scheduler; deadlines are checked between steps only"
                );
            }
        }
    }

    pub(crate) fn pending_tasks(&self) -> usize {
        lock_unpoisoned(&self.scheduler.state).queue.len()
    }
}

impl Default for ExecutionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionTimer {
    fn drop(&mut self) {
        lock_unpoisoned(&self.scheduler.state).shutdown = true;
        self.scheduler.condvar.notify_all();
    }
}

impl fmt::Debug for ExecutionTimer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExecutionTimer")
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}
