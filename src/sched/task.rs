//! # Scheduled-task model: modes, configuration, statistics.
//!
//! A task is an async body plus scheduling metadata. [`TaskConfig`]
//! bundles the knobs a caller may tune; [`TaskStats`] is the read-only
//! view the scheduler maintains per task.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::TaskError;

/// Identifier assigned to every scheduled task.
pub type TaskId = u64;

/// Boxed future produced by one task invocation.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// The task body: called once per dispatch, returns a fresh future.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Predicate gating a conditional task's body.
pub type ConditionFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// How a task is (re)dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run every interval, first at `now + interval`.
    Recurring,
    /// Run once after the delay, then remove.
    OneShot,
    /// Every check interval, run the body only when the condition holds.
    Conditional,
}

/// Tunable knobs for a scheduled task.
///
/// The `schedule_*` methods fill in name, mode, and condition; use the
/// `*_with_config` variants to override the rest.
#[derive(Clone)]
pub struct TaskConfig {
    /// Dispatch inhibited while false (stats preserved).
    pub enabled: bool,
    /// Per-execution timeout; an elapsed timeout counts as a failure.
    pub timeout: Option<Duration>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Per-task execution statistics.
#[derive(Clone, Debug)]
pub struct TaskStats {
    /// Task identifier.
    pub id: TaskId,
    /// Task name as scheduled.
    pub name: String,
    /// Completed executions of the body (failures included).
    pub executions: u64,
    /// Executions that returned an error, timed out, or panicked.
    pub failures: u64,
    /// Rolling average body duration.
    pub avg_duration: Duration,
    /// Start instant of the most recent execution.
    pub last_execution: Option<Instant>,
    /// When the task is next eligible to run.
    pub next_execution: Option<Instant>,
    /// Whether dispatch is currently enabled.
    pub enabled: bool,
}

/// Mutable scheduling state, guarded by the task's own lock.
pub(crate) struct TaskState {
    pub next_run: Instant,
    pub executions: u64,
    pub failures: u64,
    pub avg_duration: Duration,
    pub last_execution: Option<Instant>,
}

/// One entry in the scheduler's task set.
pub(crate) struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub mode: ExecutionMode,
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub condition: Option<ConditionFn>,
    pub function: TaskFn,
    pub enabled: AtomicBool,
    /// While true the task is in flight and ineligible for re-dispatch.
    pub running: AtomicBool,
    pub state: Mutex<TaskState>,
}

impl ScheduledTask {
    pub(crate) fn new(
        id: TaskId,
        name: String,
        mode: ExecutionMode,
        interval: Duration,
        config: TaskConfig,
        condition: Option<ConditionFn>,
        function: TaskFn,
    ) -> Self {
        Self {
            id,
            name,
            mode,
            interval,
            timeout: config.timeout,
            condition,
            function,
            enabled: AtomicBool::new(config.enabled),
            running: AtomicBool::new(false),
            state: Mutex::new(TaskState {
                next_run: Instant::now() + interval,
                executions: 0,
                failures: 0,
                avg_duration: Duration::ZERO,
                last_execution: None,
            }),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Eligible for dispatch: enabled, not in flight, and due.
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.is_enabled() && !self.is_running() && self.state.lock().next_run <= now
    }

    /// A finished one-shot awaiting removal by the dispatcher loop.
    pub(crate) fn is_spent(&self) -> bool {
        self.mode == ExecutionMode::OneShot
            && !self.is_running()
            && self.state.lock().executions >= 1
    }

    /// Records one finished execution and reschedules repeating modes.
    pub(crate) fn record_execution(&self, started: Instant, duration: Duration, failed: bool) {
        let mut state = self.state.lock();
        state.executions += 1;
        if failed {
            state.failures += 1;
        }
        state.last_execution = Some(started);
        state.avg_duration = if state.executions == 1 {
            duration
        } else {
            let total = state.avg_duration * (state.executions - 1) as u32 + duration;
            total / state.executions as u32
        };
        if self.mode != ExecutionMode::OneShot {
            state.next_run = Instant::now() + self.interval;
        }
    }

    /// Reschedules without recording an execution (condition was false).
    pub(crate) fn reschedule(&self) {
        self.state.lock().next_run = Instant::now() + self.interval;
    }

    pub(crate) fn stats(&self) -> TaskStats {
        let state = self.state.lock();
        TaskStats {
            id: self.id,
            name: self.name.clone(),
            executions: state.executions,
            failures: state.failures,
            avg_duration: state.avg_duration,
            last_execution: state.last_execution,
            next_execution: Some(state.next_run),
            enabled: self.is_enabled(),
        }
    }
}
