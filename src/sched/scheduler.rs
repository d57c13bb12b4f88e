//! # Scheduler: dispatcher loop over the shared worker pool.
//!
//! One dedicated dispatcher task owns the timing decisions; the task bodies
//! themselves run as jobs on the [`WorkerPool`](crate::pool::WorkerPool).
//!
//! ## Architecture
//! ```text
//! schedule_* ──► task set ──► dispatcher loop
//!                                │  due? ──► mark running ──► pool job:
//!                                │                              condition?
//!                                │                              run body (timeout)
//!                                │                              record stats
//!                                │                              clear running, wake loop
//!                                └─ sleep until min(next_run), woken by mutations
//! ```
//!
//! ## Rules
//! - A task never overlaps itself: the `running` flag gates re-dispatch.
//! - Two tasks due at the same instant may run in either order.
//! - One-shot tasks are removed on the dispatcher iteration after their
//!   single execution.
//! - Disabling inhibits dispatch but preserves statistics.
//! - The wake interval is clamped between 1 ms and 1 minute.
//! - `stop()` joins the dispatcher, then disables all tasks; bodies already
//!   handed to the pool still finish under the pool's own shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::TaskError;
use crate::pool::WorkerPool;
use crate::sched::task::{
    ConditionFn, ExecutionMode, ScheduledTask, TaskConfig, TaskFn, TaskFuture, TaskId, TaskStats,
};

/// Lower bound on the dispatcher's sleep.
const MIN_WAKE: Duration = Duration::from_millis(1);
/// Upper bound on the dispatcher's sleep (idle heartbeat).
const MAX_WAKE: Duration = Duration::from_secs(60);

/// Aggregate scheduler statistics.
#[derive(Clone, Debug)]
pub struct SchedulerStats {
    /// Tasks currently enabled.
    pub active_tasks: usize,
    /// Body executions across all tasks since construction.
    pub total_executions: u64,
    /// Failed executions across all tasks since construction.
    pub total_failures: u64,
    /// `total_failures / total_executions`, zero before the first run.
    pub failure_rate: f64,
    /// Time since the scheduler was created.
    pub uptime: Duration,
}

/// Periodic / one-shot / conditional task runner.
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    tasks: Mutex<Vec<Arc<ScheduledTask>>>,
    /// Wakes the dispatcher on schedule/cancel/enable/stop and when a body
    /// finishes (so one-shot cleanup and next-wake are recomputed).
    notify: Arc<Notify>,
    running: AtomicBool,
    next_id: AtomicU64,
    total_executions: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    started_at: Instant,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    /// Replaced on every start; cancelled by `stop` so the loop exits
    /// promptly even from a long idle sleep.
    stop_token: Mutex<CancellationToken>,
}

impl Scheduler {
    /// Creates a stopped scheduler bound to the shared worker pool.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            tasks: Mutex::new(Vec::new()),
            notify: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            total_executions: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            dispatcher: tokio::sync::Mutex::new(None),
            stop_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Starts the dispatcher loop. Calling `start` on a running scheduler
    /// is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("scheduler already running");
            return;
        }
        let token = CancellationToken::new();
        *self.stop_token.lock() = token.clone();
        let me = Arc::clone(self);
        let handle = tokio::spawn(async move { me.dispatcher_loop(token).await });
        *self.dispatcher.lock().await = Some(handle);
        debug!("scheduler started");
    }

    /// Stops the dispatcher and disables every task. Idempotent.
    ///
    /// Bodies already submitted to the worker pool keep running; they are
    /// awaited by the pool's own shutdown.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_token.lock().cancel();
        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
        for task in self.tasks.lock().iter() {
            task.enabled.store(false, Ordering::Release);
        }
        debug!("scheduler stopped");
    }

    /// Schedules a recurring task; first run at `now + interval`.
    pub fn schedule_interval<F, Fut>(&self, name: &str, interval: Duration, body: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_interval_with_config(name, interval, body, TaskConfig::default())
    }

    /// Schedules a recurring task with explicit configuration.
    pub fn schedule_interval_with_config<F, Fut>(
        &self,
        name: &str,
        interval: Duration,
        body: F,
        config: TaskConfig,
    ) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.add_task(name, ExecutionMode::Recurring, interval, config, None, box_fn(body))
    }

    /// Schedules a recurring task on a minute interval.
    pub fn schedule_every_minutes<F, Fut>(&self, name: &str, minutes: u64, body: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_interval(name, Duration::from_secs(minutes * 60), body)
    }

    /// Schedules a recurring task on an hour interval.
    pub fn schedule_every_hours<F, Fut>(&self, name: &str, hours: u64, body: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_interval(name, Duration::from_secs(hours * 3600), body)
    }

    /// Schedules a one-shot task to run once after `delay`, then be removed.
    pub fn schedule_once<F, Fut>(&self, name: &str, delay: Duration, body: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_once_with_config(name, delay, body, TaskConfig::default())
    }

    /// Schedules a one-shot task with explicit configuration.
    pub fn schedule_once_with_config<F, Fut>(
        &self,
        name: &str,
        delay: Duration,
        body: F,
        config: TaskConfig,
    ) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.add_task(name, ExecutionMode::OneShot, delay, config, None, box_fn(body))
    }

    /// Schedules a conditional task: every `check_interval` the predicate is
    /// evaluated and the body runs only when it returns true.
    pub fn schedule_conditional<C, F, Fut>(
        &self,
        name: &str,
        check_interval: Duration,
        condition: C,
        body: F,
    ) -> TaskId
    where
        C: Fn() -> bool + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_conditional_with_config(name, check_interval, condition, body, TaskConfig::default())
    }

    /// Schedules a conditional task with explicit configuration.
    pub fn schedule_conditional_with_config<C, F, Fut>(
        &self,
        name: &str,
        check_interval: Duration,
        condition: C,
        body: F,
        config: TaskConfig,
    ) -> TaskId
    where
        C: Fn() -> bool + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.add_task(
            name,
            ExecutionMode::Conditional,
            check_interval,
            config,
            Some(Arc::new(condition) as ConditionFn),
            box_fn(body),
        )
    }

    /// Schedules a metrics flush every 30 seconds.
    pub fn schedule_metrics_flush<F, Fut>(&self, flush: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_interval("metrics_flush", Duration::from_secs(30), flush)
    }

    /// Schedules a cache-cleanup sweep every 5 minutes.
    pub fn schedule_cache_cleanup<F, Fut>(&self, cleanup: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_every_minutes("cache_cleanup", 5, cleanup)
    }

    /// Schedules a health heartbeat every 10 seconds.
    pub fn schedule_health_heartbeat<F, Fut>(&self, heartbeat: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_interval("health_heartbeat", Duration::from_secs(10), heartbeat)
    }

    /// Schedules a backpressure monitor: every second, compare the sampled
    /// queue depth to `threshold` and run `alert` on breach.
    pub fn schedule_backpressure_monitor<Q, F, Fut>(
        &self,
        queue_size: Q,
        threshold: usize,
        alert: F,
    ) -> TaskId
    where
        Q: Fn() -> usize + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.schedule_conditional(
            "backpressure_monitor",
            Duration::from_secs(1),
            move || queue_size() > threshold,
            alert,
        )
    }

    /// Removes a task; returns whether it existed.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        let removed = tasks.len() < before;
        drop(tasks);
        if removed {
            self.notify.notify_one();
        }
        removed
    }

    /// Re-enables dispatch for a task; returns whether it exists.
    pub fn enable(&self, id: TaskId) -> bool {
        let found = self.with_task(id, |task| task.enabled.store(true, Ordering::Release));
        if found {
            self.notify.notify_one();
        }
        found
    }

    /// Inhibits dispatch for a task, preserving its statistics.
    pub fn disable(&self, id: TaskId) -> bool {
        self.with_task(id, |task| task.enabled.store(false, Ordering::Release))
    }

    /// Whether the task's body is currently in flight.
    pub fn is_running(&self, id: TaskId) -> bool {
        let tasks = self.tasks.lock();
        tasks.iter().any(|task| task.id == id && task.is_running())
    }

    /// Statistics for one task, if it still exists.
    pub fn task_stats(&self, id: TaskId) -> Option<TaskStats> {
        let tasks = self.tasks.lock();
        tasks.iter().find(|task| task.id == id).map(|task| task.stats())
    }

    /// Statistics for every task currently in the set.
    pub fn all_stats(&self) -> Vec<TaskStats> {
        self.tasks.lock().iter().map(|task| task.stats()).collect()
    }

    /// Aggregate scheduler statistics.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        let active_tasks = self.tasks.lock().iter().filter(|t| t.is_enabled()).count();
        let total_executions = self.total_executions.load(Ordering::Relaxed);
        let total_failures = self.total_failures.load(Ordering::Relaxed);
        SchedulerStats {
            active_tasks,
            total_executions,
            total_failures,
            failure_rate: if total_executions > 0 {
                total_failures as f64 / total_executions as f64
            } else {
                0.0
            },
            uptime: self.started_at.elapsed(),
        }
    }

    fn add_task(
        &self,
        name: &str,
        mode: ExecutionMode,
        interval: Duration,
        config: TaskConfig,
        condition: Option<ConditionFn>,
        function: TaskFn,
    ) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(ScheduledTask::new(
            id,
            name.to_string(),
            mode,
            interval,
            config,
            condition,
            function,
        ));
        self.tasks.lock().push(task);
        debug!(task = name, ?mode, ?interval, "scheduled task");
        self.notify.notify_one();
        id
    }

    fn with_task(&self, id: TaskId, f: impl FnOnce(&ScheduledTask)) -> bool {
        let tasks = self.tasks.lock();
        match tasks.iter().find(|task| task.id == id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    async fn dispatcher_loop(self: Arc<Self>, stop: CancellationToken) {
        debug!("scheduler loop started");
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();

            let due: Vec<Arc<ScheduledTask>> = {
                let tasks = self.tasks.lock();
                tasks.iter().filter(|task| task.is_due(now)).cloned().collect()
            };
            for task in due {
                self.dispatch(task);
            }

            // One-shots that have run are removed here, not in the body,
            // so a stats reader never observes a half-removed task.
            self.tasks.lock().retain(|task| !task.is_spent());

            let wake = self.next_wake(Instant::now());
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wake) => {}
                _ = stop.cancelled() => break,
            }
        }
        debug!("scheduler loop stopped");
    }

    /// Sleep until the earliest enabled `next_run`, clamped to
    /// [`MIN_WAKE`, `MAX_WAKE`].
    fn next_wake(&self, now: Instant) -> Duration {
        let tasks = self.tasks.lock();
        let earliest = tasks
            .iter()
            .filter(|task| task.is_enabled() && !task.is_running())
            .map(|task| task.state.lock().next_run)
            .min();
        match earliest {
            Some(at) => at.saturating_duration_since(now).clamp(MIN_WAKE, MAX_WAKE),
            None => MAX_WAKE,
        }
    }

    /// Marks the task in flight and hands its body to the worker pool.
    fn dispatch(&self, task: Arc<ScheduledTask>) {
        task.running.store(true, Ordering::Release);

        let notify = Arc::clone(&self.notify);
        let total_executions = Arc::clone(&self.total_executions);
        let total_failures = Arc::clone(&self.total_failures);
        let job_task = Arc::clone(&task);

        let accepted = self.pool.submit(async move {
            let task = job_task;
            if let Some(condition) = &task.condition {
                if !condition() {
                    task.reschedule();
                    task.running.store(false, Ordering::Release);
                    notify.notify_one();
                    return;
                }
            }

            let started = Instant::now();
            let body = std::panic::AssertUnwindSafe((task.function)()).catch_unwind();
            let caught = match task.timeout {
                Some(limit) => match tokio::time::timeout(limit, body).await {
                    Ok(caught) => caught,
                    Err(_) => Ok(Err(TaskError::Timeout { timeout: limit })),
                },
                None => body.await,
            };
            let failed = match caught {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    error!(task = %task.name, error = %e, "scheduled task failed");
                    true
                }
                Err(_panic) => {
                    error!(task = %task.name, "scheduled task panicked");
                    true
                }
            };

            let duration = started.elapsed();
            task.record_execution(started, duration, failed);
            total_executions.fetch_add(1, Ordering::Relaxed);
            if failed {
                total_failures.fetch_add(1, Ordering::Relaxed);
            }

            task.running.store(false, Ordering::Release);
            notify.notify_one();
        });

        if !accepted {
            // Pool is shutting down; leave the task dispatchable for a
            // future start rather than wedged on `running`.
            task.running.store(false, Ordering::Release);
        }
    }
}

/// Adapts a typed async closure into the erased task function.
fn box_fn<F, Fut>(body: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(move || -> TaskFuture { Box::pin(body()) })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn fixture() -> (Arc<WorkerPool>, Arc<Scheduler>) {
        let pool = Arc::new(WorkerPool::new(2));
        let sched = Arc::new(Scheduler::new(Arc::clone(&pool)));
        (pool, sched)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recurring_and_one_shot_timing() {
        let (pool, sched) = fixture();
        sched.start().await;

        let recurring = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&recurring);
        let r_id = sched.schedule_interval("recurring", Duration::from_millis(100), move || {
            let r = Arc::clone(&r);
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let once = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&once);
        let o_id = sched.schedule_once("once", Duration::from_millis(250), move || {
            let o = Arc::clone(&o);
            async move {
                o.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(520)).await;

        let recurring_runs = recurring.load(Ordering::SeqCst);
        assert!((3..=6).contains(&recurring_runs), "got {recurring_runs}");
        assert_eq!(once.load(Ordering::SeqCst), 1);

        // The spent one-shot was removed by the dispatcher loop.
        assert!(sched.task_stats(o_id).is_none());
        assert!(!sched.all_stats().iter().any(|s| s.id == o_id));
        assert!(sched.task_stats(r_id).is_some());

        sched.stop().await;
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conditional_false_never_runs_body() {
        let (pool, sched) = fixture();
        sched.start().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_body = Arc::clone(&ran);
        let id = sched.schedule_conditional(
            "never",
            Duration::from_millis(20),
            || false,
            move || {
                let ran = Arc::clone(&ran_body);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let stats = sched.task_stats(id).unwrap();
        assert_eq!(stats.executions, 0);

        sched.stop().await;
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conditional_true_runs_and_counts() {
        let (pool, sched) = fixture();
        sched.start().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_body = Arc::clone(&ran);
        sched.schedule_conditional(
            "always",
            Duration::from_millis(30),
            || true,
            move || {
                let ran = Arc::clone(&ran_body);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ran.load(Ordering::SeqCst) >= 2);

        sched.stop().await;
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn disable_inhibits_dispatch_but_keeps_stats() {
        let (pool, sched) = fixture();
        sched.start().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_body = Arc::clone(&ran);
        let id = sched.schedule_interval("ticker", Duration::from_millis(30), move || {
            let ran = Arc::clone(&ran_body);
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sched.disable(id));
        // Let any body dispatched before the disable finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_disable = sched.task_stats(id).unwrap().executions;
        assert!(after_disable >= 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sched.task_stats(id).unwrap().executions, after_disable);
        assert!(!sched.task_stats(id).unwrap().enabled);

        assert!(sched.enable(id));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sched.task_stats(id).unwrap().executions > after_disable);

        sched.stop().await;
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_removes_task() {
        let (pool, sched) = fixture();
        sched.start().await;

        let id = sched.schedule_interval("gone", Duration::from_secs(10), || async { Ok(()) });
        assert!(sched.cancel(id));
        assert!(!sched.cancel(id));
        assert!(sched.task_stats(id).is_none());

        sched.stop().await;
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_and_totals_are_counted() {
        let (pool, sched) = fixture();
        sched.start().await;

        let id = sched.schedule_once("failing", Duration::from_millis(20), || async {
            Err(TaskError::fail("intentional"))
        });

        tokio::time::sleep(Duration::from_millis(120)).await;

        // Removed as a spent one-shot; aggregate counters keep the record.
        assert!(sched.task_stats(id).is_none());
        let stats = sched.scheduler_stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.total_failures, 1);
        assert!(stats.failure_rate > 0.99);

        sched.stop().await;
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_task_does_not_overlap_itself() {
        let (pool, sched) = fixture();
        sched.start().await;

        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (Arc::clone(&concurrent), Arc::clone(&peak));
        let config = TaskConfig {
            enabled: true,
            timeout: None,
        };
        sched.schedule_interval_with_config(
            "slow",
            Duration::from_millis(10),
            move || {
                let (c, p) = (Arc::clone(&c), Arc::clone(&p));
                async move {
                    let in_flight = c.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(in_flight, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            config,
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        sched.stop().await;
        pool.shutdown().await;
    }
}
