//! Render worker pool for parallel job execution.
//!
//! A fixed set of threads pulls jobs from the [`JobScheduler`], skips the ones
//! already cancelled, and hands the rest to a shared executor callback.

use crate::{CancellationToken, Job, JobScheduler};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Callback run by a worker for every job it takes.
///
/// Long-running executors should check `token.is_cancelled()` and return
/// early once it is set.
pub type JobExecutor = Arc<dyn Fn(&Job, &CancellationToken) + Send + Sync>;

/// Configuration for the render worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Longest a worker blocks waiting for a job before rechecking shutdown.
    /// Default: 50ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `num_workers` threads (at least one).
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Fixed-size pool of render worker threads
///
/// # Example
///
/// ```
/// use gridthumb_render::PixelTarget;
/// use gridthumb_scheduler::{CancellationToken, Job, JobPriority, JobScheduler, WorkerPool, WorkerPoolConfig};
/// use std::sync::Arc;
///
/// let scheduler = Arc::new(JobScheduler::new());
/// let executor = Arc::new(|job: &Job, token: &CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     println!("rendering cell {} at {:?}", job.index, job.target);
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));
/// scheduler.submit(JobPriority::Visible, 0, PixelTarget::new(96, 128));
///
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    scheduler: Arc<JobScheduler>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    pub fn new(scheduler: Arc<JobScheduler>, executor: JobExecutor, config: WorkerPoolConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers = (0..config.num_workers)
            .map(|id| {
                Worker::new(
                    id,
                    scheduler.clone(),
                    executor.clone(),
                    shutdown.clone(),
                    config.poll_interval,
                )
            })
            .collect();

        debug!(workers = config.num_workers, "started render worker pool");

        Self {
            workers,
            scheduler,
            shutdown,
        }
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Jobs already running are finished; queued jobs are left in the
    /// scheduler.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.wake_workers();

        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(
        id: usize,
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(format!("gridthumb-render-{}", id))
            .spawn(move || {
                Self::run(scheduler, executor, shutdown, poll_interval);
            })
            .expect("Failed to spawn worker thread");

        Self {
            id,
            thread: Some(thread),
        }
    }

    /// Main worker loop.
    fn run(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            let Some(job) = scheduler.wait_for_job(poll_interval) else {
                continue;
            };

            let token = scheduler.get_cancellation_token(job.id).unwrap_or_default();
            if token.is_cancelled() {
                debug!(job_id = job.id, index = job.index, "skipping cancelled job");
            } else {
                executor(&job, &token);
            }

            scheduler.complete_job(job.id);
        }
    }

    /// Wait for the worker thread to finish.
    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = self.id, "render worker panicked");
            }
        }
    }
}

/// Number of logical CPU cores, used as the default worker count.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobPriority;
    use gridthumb_render::PixelTarget;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn target() -> PixelTarget {
        PixelTarget::new(96, 128)
    }

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(5));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(5));

        assert_eq!(WorkerPoolConfig::new(0).num_workers, 1);
    }

    #[test]
    fn test_worker_pool_creation() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor = Arc::new(|_job: &Job, _token: &CancellationToken| {});

        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(2));
        assert_eq!(pool.num_workers(), 2);

        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_executes_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();

        let executor = Arc::new(move |_job: &Job, _token: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));

        for index in 0..5 {
            scheduler.submit(JobPriority::Visible, index, target());
        }

        assert!(wait_until(Duration::from_secs(5), || executed.load(Ordering::SeqCst) == 5));
        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().jobs_completed == 5));

        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_skips_cancelled_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let gate = Arc::new(AtomicBool::new(false));
        let release = gate.clone();

        let executor = Arc::new(move |_job: &Job, _token: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        });

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));

        let ids: Vec<_> = (0..3)
            .map(|index| scheduler.submit(JobPriority::Visible, index, target()).0)
            .collect();

        // The single worker is parked inside the first job
        assert!(wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst) == 1));
        for id in &ids[1..] {
            assert!(scheduler.cancel_job(*id));
        }
        gate.store(true, Ordering::SeqCst);

        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().jobs_completed == 1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().jobs_cancelled, 2);

        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_priority_ordering() {
        let scheduler = Arc::new(JobScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorded = order.clone();

        // Queue everything before the single worker starts
        scheduler.submit(JobPriority::Prefetch, 3, target());
        scheduler.submit(JobPriority::Visible, 1, target());
        scheduler.submit(JobPriority::Prefetch, 4, target());
        scheduler.submit(JobPriority::Visible, 2, target());

        let executor = Arc::new(move |job: &Job, _token: &CancellationToken| {
            recorded.lock().push(job.index);
        });
        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));

        assert!(wait_until(Duration::from_secs(5), || order.lock().len() == 4));
        assert_eq!(*order.lock(), vec![1, 2, 3, 4]);

        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_shutdown_is_prompt() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor = Arc::new(|_job: &Job, _token: &CancellationToken| {});
        let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(200));
        let pool = WorkerPool::new(scheduler, executor, config);

        let start = Instant::now();
        pool.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_num_cpus() {
        let cpus = num_cpus();
        assert!(cpus > 0);
        assert!(cpus <= 1024);
    }
}
