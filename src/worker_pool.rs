//! Bounded worker pool.
//!
//! A fixed number of long-lived worker tasks consume jobs from a bounded queue.
//! Submission never blocks: when every worker is busy and the queue is full,
//! `submit` returns `false` (or `QueryError::PoolSaturated`) immediately so the
//! HTTP task can answer "service busy".
//!
//! Capacity is accounted with a semaphore of `workers + queue_capacity`
//! permits. A permit is taken at submission and released when the job finishes
//! (or is skipped), which makes saturation deterministic.
//!
//! Panics inside a job are caught at the job boundary; the worker survives.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextDone, RequestContext};
use crate::error_handling::QueryError;

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedJob {
    job: BoxedJob,
    /// Checked before the job starts; a finished request skips its job
    context: Option<RequestContext>,
    _permit: OwnedSemaphorePermit,
}

/// Counters exposed on `/status`.
#[derive(Debug, Default)]
struct PoolCounters {
    in_flight: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    panicked: AtomicUsize,
    rejected: AtomicUsize,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub workers: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub queued_or_running: usize,
    pub completed: usize,
    pub skipped: usize,
    pub panicked: usize,
    pub rejected: usize,
}

pub struct WorkerPool {
    sender: mpsc::Sender<QueuedJob>,
    slots: Arc<Semaphore>,
    workers: usize,
    capacity: usize,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Starts `workers` worker tasks with room for `queue_capacity` waiting jobs.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = workers + queue_capacity;
        let (sender, receiver) = mpsc::channel::<QueuedJob>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(PoolCounters::default());
        let shutdown = CancellationToken::new();

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&counters),
                    shutdown.clone(),
                ))
            })
            .collect();

        log::info!("Worker pool started: {workers} workers, capacity {capacity}");

        WorkerPool {
            sender,
            slots: Arc::new(Semaphore::new(capacity)),
            workers,
            capacity,
            counters,
            shutdown,
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Submits a unit of work. Returns `false` immediately when saturated.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(Box::pin(job), None)
    }

    /// Like [`submit`](Self::submit), but the job is skipped without running
    /// if `ctx` is already done when a worker picks it up.
    pub fn submit_with_context<F>(&self, ctx: &RequestContext, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(Box::pin(job), Some(ctx.clone()))
    }

    /// Submits a job whose output is delivered through a [`JobHandle`].
    ///
    /// The result slot holds exactly one value; if the caller stops waiting the
    /// job still runs to completion and its send simply goes nowhere.
    pub fn spawn<T, F>(&self, ctx: &RequestContext, job: F) -> Result<JobHandle<T>, QueryError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped = async move {
            let result = job.await;
            // Receiver gone means the caller already answered; nothing to do
            let _ = tx.send(result);
        };
        if self.submit_with_context(ctx, wrapped) {
            Ok(JobHandle { rx })
        } else {
            Err(QueryError::PoolSaturated)
        }
    }

    fn enqueue(&self, job: BoxedJob, context: Option<RequestContext>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("Worker pool saturated, rejecting job");
                return false;
            }
        };
        match self.sender.try_send(QueuedJob {
            job,
            context,
            _permit: permit,
        }) {
            Ok(()) => true,
            Err(err) => {
                // Only reachable after shutdown: the channel has a slot per permit
                log::warn!("Worker pool queue refused job: {err}");
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            workers: self.workers,
            capacity: self.capacity,
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            queued_or_running: self.capacity - self.slots.available_permits(),
            completed: self.counters.completed.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops accepting jobs, lets running jobs finish and joins the workers.
    /// Jobs still queued are dropped.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("Worker task ended abnormally: {e}");
            }
        }
        log::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
) {
    loop {
        // The receiver lock is released before the job runs
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(queued) = next else {
            log::debug!("Worker {id} shutting down");
            break;
        };

        if queued.context.as_ref().is_some_and(RequestContext::is_done) {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Worker {id}: skipping job for a finished request");
            continue;
        }

        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = AssertUnwindSafe(queued.job).catch_unwind().await;
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                log::error!("Worker {id}: job panicked: {}", panic_message(&panic));
            }
        }
        // `queued._permit` drops here, freeing the slot
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Promise for a job submitted with [`WorkerPool::spawn`].
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, QueryError>>,
}

impl<T> JobHandle<T> {
    /// Waits for the job's result, the context's cancellation, or its deadline,
    /// whichever comes first. Exactly one of the three is consumed.
    pub async fn wait(self, ctx: &RequestContext) -> Result<T, QueryError> {
        tokio::select! {
            result = self.rx => match result {
                Ok(result) => result,
                // Sender dropped without a value: the job panicked or was skipped
                Err(_) => Err(QueryError::JobFailed(
                    "job ended without producing a result".to_string(),
                )),
            },
            done = ctx.done() => match done {
                ContextDone::Cancelled => Err(QueryError::Cancelled),
                ContextDone::DeadlineExceeded => Err(QueryError::Timeout(ctx.budget())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn blocking_job(gate: Arc<tokio::sync::Notify>, started: Arc<AtomicUsize>) -> impl Future<Output = ()> + Send {
        async move {
            started.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_when_saturated() {
        let pool = WorkerPool::new(2, 1);
        let gate = Arc::new(tokio::sync::Notify::new());
        let started = Arc::new(AtomicUsize::new(0));

        for _ in 0..pool.capacity() {
            assert!(pool.submit(blocking_job(Arc::clone(&gate), Arc::clone(&started))));
        }

        let before = std::time::Instant::now();
        assert!(!pool.submit(async {}));
        assert!(before.elapsed() < Duration::from_millis(50));
        assert_eq!(pool.snapshot().rejected, 1);

        gate.notify_waiters();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_slot_freed_after_job_completes() {
        let pool = WorkerPool::new(1, 0);
        let (tx, rx) = oneshot::channel::<()>();
        assert!(pool.submit(async move {
            let _ = rx.await;
        }));
        assert!(!pool.submit(async {}));

        tx.send(()).unwrap();
        // Wait for the first job to finish and free its slot
        for _ in 0..100 {
            if pool.snapshot().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(pool.submit(async {}));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_survives_panic() {
        let pool = WorkerPool::new(1, 4);
        assert!(pool.submit(async {
            panic!("job blew up");
        }));

        let ctx = RequestContext::new("test", Duration::from_secs(5));
        let handle = pool.spawn(&ctx, async { Ok(42u32) }).unwrap();
        assert_eq!(handle.wait(&ctx).await.unwrap(), 42);
        assert_eq!(pool.snapshot().panicked, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_spawned_job_reports_failure() {
        let pool = WorkerPool::new(1, 1);
        let ctx = RequestContext::new("test", Duration::from_secs(5));
        let handle = pool
            .spawn::<u32, _>(&ctx, async { panic!("bad job") })
            .unwrap();
        assert!(matches!(handle.wait(&ctx).await, Err(QueryError::JobFailed(_))));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_times_out_but_job_finishes() {
        let pool = WorkerPool::new(1, 1);
        let ctx = RequestContext::new("test", Duration::from_millis(20));
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_clone = Arc::clone(&finished);

        let handle = pool
            .spawn(&ctx, async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                finished_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(matches!(handle.wait(&ctx).await, Err(QueryError::Timeout(_))));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_job_for_cancelled_context_is_skipped() {
        let pool = WorkerPool::new(1, 2);
        let (tx, rx) = oneshot::channel::<()>();
        assert!(pool.submit(async move {
            let _ = rx.await;
        }));

        let ctx = RequestContext::new("test", Duration::from_secs(5));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        assert!(pool.submit_with_context(&ctx, async move {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        ctx.cancel();
        tx.send(()).unwrap();

        for _ in 0..100 {
            if pool.snapshot().skipped == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.snapshot().skipped, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let pool = WorkerPool::new(2, 2);
        pool.shutdown().await;
        assert!(!pool.submit(async {}));
    }
}
