//! # Worker pool: fixed set of workers draining a shared FIFO queue.
//!
//! [`WorkerPool`] executes every unit of deferred work in the runtime:
//! message-handler invocations, scheduler callbacks, and anything user code
//! submits directly.
//!
//! ## Architecture
//! ```text
//! submit(job) ──► FIFO queue ──► worker 0 ┐
//!                   (unbounded)  worker 1 ├──► job runs to completion,
//!                                  ...    │    panics contained
//!                                worker N ┘
//! ```
//!
//! ## Rules
//! - Pool size is fixed at construction (`max(1, configured)`).
//! - `submit` never blocks on queue capacity; it fails (returns `false`)
//!   only once shutdown has begun.
//! - FIFO order is preserved per submitting context; workers dequeue
//!   concurrently, so execution order across workers is unspecified.
//! - A panicking job is caught and logged at WARN; the worker survives.
//! - `shutdown` is idempotent, rejects further submissions, and waits for
//!   every previously accepted job to finish before returning.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A queued unit of work: an opaque nullary future.
///
/// Owned by the queue until dequeued; its lifetime ends when the worker
/// finishes polling it.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// State shared between the handle and the workers.
struct Shared {
    /// FIFO of pending jobs. The lock is never held across an await.
    queue: parking_lot::Mutex<VecDeque<Job>>,
    /// Wakes idle workers on submit and on shutdown.
    notify: Notify,
    /// Set once shutdown begins; checked under the queue lock.
    done: AtomicBool,
    /// Cancels idle waits during shutdown.
    stop: CancellationToken,
}

/// What a worker found when it consulted the queue.
enum Next {
    Job(Job),
    Wait,
    Exit,
}

/// Fixed-size pool of workers servicing one shared queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: tokio::sync::Mutex<Option<JoinSet<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers (clamped to at least one).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            queue: parking_lot::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            done: AtomicBool::new(false),
            stop: CancellationToken::new(),
        });

        let mut set = JoinSet::new();
        for _ in 0..size {
            let shared = Arc::clone(&shared);
            set.spawn(worker_loop(shared));
        }

        Self {
            shared,
            workers: tokio::sync::Mutex::new(Some(set)),
            size,
        }
    }

    /// Enqueues a job for execution.
    ///
    /// Returns `false` iff the pool is already shutting down; the job is
    /// dropped in that case. Never waits for queue capacity.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut queue = self.shared.queue.lock();
            if self.shared.done.load(Ordering::Acquire) {
                return false;
            }
            queue.push_back(Box::pin(job));
        }
        self.shared.notify.notify_one();
        true
    }

    /// Current queue depth (jobs accepted but not yet dequeued).
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true once shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Stops the pool: rejects new submissions, wakes all workers, and
    /// waits until every already-accepted job has run to completion.
    ///
    /// Idempotent; concurrent callers after the first return once the
    /// workers are gone.
    pub async fn shutdown(&self) {
        {
            // Taken under the queue lock so no submit can slip a job past
            // the rejection point.
            let _queue = self.shared.queue.lock();
            self.shared.done.store(true, Ordering::Release);
        }
        self.shared.stop.cancel();
        self.shared.notify.notify_waiters();

        if let Some(mut set) = self.workers.lock().await.take() {
            while set.join_next().await.is_some() {}
        }
    }
}

/// Worker body: drain jobs; once shutdown is flagged, exit when the queue
/// runs dry so accepted work is never abandoned.
async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            match queue.pop_front() {
                Some(job) => Next::Job(job),
                None if shared.done.load(Ordering::Acquire) => Next::Exit,
                None => Next::Wait,
            }
        };

        match next {
            Next::Job(job) => {
                if let Err(panic) = std::panic::AssertUnwindSafe(job).catch_unwind().await {
                    warn!(panic = ?panic_message(&panic), "worker job panicked, worker continues");
                }
            }
            Next::Wait => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = shared.stop.cancelled() => {}
                }
            }
            Next::Exit => break,
        }
    }
}

/// Best-effort extraction of a panic payload message.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn size_is_clamped_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn accepted_jobs_run_exactly_once_before_shutdown_returns() {
        let pool = WorkerPool::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let ran = Arc::clone(&ran);
            assert!(pool.submit(async move {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        pool.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_after_shutdown_returns_false() {
        let pool = WorkerPool::new(1);
        pool.shutdown().await;
        assert!(!pool.submit(async {}));
        assert!(pool.is_shutdown());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_is_idempotent() {
        let pool = WorkerPool::new(2);
        pool.submit(async {});
        pool.shutdown().await;
        pool.shutdown().await;
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(async { panic!("boom") });
        let ran_after = Arc::clone(&ran);
        pool.submit(async move {
            ran_after.fetch_add(1, Ordering::SeqCst);
        });

        pool.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pending_reports_queue_depth() {
        let pool = WorkerPool::new(1);

        // Park the single worker so follow-up jobs stay queued.
        let gate = Arc::new(Notify::new());
        let gate_job = Arc::clone(&gate);
        pool.submit(async move {
            gate_job.notified().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.submit(async {});
        pool.submit(async {});
        assert_eq!(pool.pending(), 2);

        gate.notify_one();
        pool.shutdown().await;
        assert_eq!(pool.pending(), 0);
    }
}
