//! Job scheduler implementation
//!
//! Ties the priority queue to the cancellation registry and keeps lifecycle
//! statistics for submitted render jobs.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, PriorityQueue};
use gridthumb_render::PixelTarget;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::trace;

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed (including ones that found their token cancelled)
    pub jobs_completed: u64,

    /// Total jobs cancelled while still queued
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither completed nor cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed)
            .saturating_sub(self.jobs_cancelled)
    }
}

/// Thread-safe render job scheduler
///
/// # Example
///
/// ```
/// use gridthumb_render::PixelTarget;
/// use gridthumb_scheduler::{JobPriority, JobScheduler};
///
/// let scheduler = JobScheduler::new();
/// let (job_id, token) = scheduler.submit(JobPriority::Visible, 42, PixelTarget::new(288, 384));
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.index, 42);
///     if !token.is_cancelled() {
///         // ... render ...
///     }
///     scheduler.complete_job(job.id);
/// }
/// # let _ = job_id;
/// ```
pub struct JobScheduler {
    queue: PriorityQueue,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Queue a render of `index` at `target`.
    ///
    /// Returns the job ID and a token the submitter can use to observe or
    /// trigger cancellation.
    pub fn submit(
        &self,
        priority: JobPriority,
        index: usize,
        target: PixelTarget,
    ) -> (JobId, CancellationToken) {
        // Register before pushing so a worker never sees a job without a token
        let mut token = None;
        let job_id = self.queue.push_with(priority, index, target, |id| {
            token = Some(self.cancellation.register(id));
        });
        let token = token.unwrap_or_default();

        self.stats.lock().jobs_submitted += 1;
        trace!(job_id, index, ?priority, "submitted render job");

        (job_id, token)
    }

    /// Take the next job, or `None` if the queue is empty
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    /// Take the next job, waiting up to `timeout` for one
    pub fn wait_for_job(&self, timeout: Duration) -> Option<Job> {
        self.queue.pop_timeout(timeout)
    }

    /// Wake all workers blocked in [`wait_for_job`](Self::wait_for_job)
    pub fn wake_workers(&self) {
        self.queue.wake_all();
    }

    /// Mark a job taken from the queue as finished
    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel a job by ID.
    ///
    /// A queued job is removed; a running job only has its token cancelled.
    /// Returns `true` if the job was found in either state.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_cancelled = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed.is_empty() {
            token_cancelled
        } else {
            self.stats.lock().jobs_cancelled += removed.len() as u64;
            self.cancellation.unregister(job_id);
            true
        }
    }

    /// Cancel a job only if no worker has taken it yet.
    ///
    /// Returns `true` if the job was removed from the queue.
    pub fn cancel_if_queued(&self, job_id: JobId) -> bool {
        !self.cancel_jobs_if(|job| job.id == job_id).is_empty()
    }

    /// Cancel and dequeue every queued job matching a predicate.
    ///
    /// Returns the cancelled jobs.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let removed = self.queue.remove_if(predicate);
        if removed.is_empty() {
            return removed;
        }

        let ids: Vec<JobId> = removed.iter().map(|job| job.id).collect();
        self.cancellation.cancel_many(&ids);
        for id in &ids {
            self.cancellation.unregister(*id);
        }
        self.stats.lock().jobs_cancelled += removed.len() as u64;

        removed
    }

    /// Number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if any job is queued
    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Cancel everything, queued or running
    pub fn clear(&self) {
        // Jobs a worker pops concurrently are counted when they complete
        let cancelled = self.queue.remove_if(|_| true).len();
        self.cancellation.cancel_all();
        self.cancellation.clear();

        if cancelled > 0 {
            self.stats.lock().jobs_cancelled += cancelled as u64;
        }
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().clone();
        stats.queue_size = self.queue.len();
        stats
    }

    /// All queued jobs, in arbitrary order
    pub fn pending_jobs_list(&self) -> Vec<Job> {
        self.queue.jobs()
    }

    /// Token for a job that has not yet completed
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> PixelTarget {
        PixelTarget::new(288, 384)
    }

    #[test]
    fn test_scheduler_basic() {
        let scheduler = JobScheduler::new();
        assert!(!scheduler.has_pending_jobs());

        let (job_id, token) = scheduler.submit(JobPriority::Visible, 42, target());
        assert_eq!(scheduler.pending_jobs(), 1);
        assert!(!token.is_cancelled());

        let job = scheduler.next_job().unwrap();
        assert_eq!(job.id, job_id);
        assert!(scheduler.get_cancellation_token(job_id).is_some());

        scheduler.complete_job(job_id);
        assert!(scheduler.get_cancellation_token(job_id).is_none());

        let stats = scheduler.stats();
        assert_eq!(stats.jobs_submitted, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_cancelled, 0);
        assert_eq!(stats.pending_jobs(), 0);
    }

    #[test]
    fn test_scheduler_priority_ordering() {
        let scheduler = JobScheduler::new();
        scheduler.submit(JobPriority::Prefetch, 1, target());
        scheduler.submit(JobPriority::Visible, 2, target());

        assert_eq!(scheduler.next_job().unwrap().index, 2);
        assert_eq!(scheduler.next_job().unwrap().index, 1);
    }

    #[test]
    fn test_cancel_queued_job() {
        let scheduler = JobScheduler::new();
        let (job_id, token) = scheduler.submit(JobPriority::Visible, 7, target());

        assert!(scheduler.cancel_job(job_id));
        assert!(token.is_cancelled());
        assert_eq!(scheduler.pending_jobs(), 0);
        assert_eq!(scheduler.stats().jobs_cancelled, 1);

        // Already gone
        assert!(!scheduler.cancel_job(job_id));
    }

    #[test]
    fn test_cancel_running_job() {
        let scheduler = JobScheduler::new();
        let (job_id, token) = scheduler.submit(JobPriority::Visible, 7, target());

        let job = scheduler.next_job().unwrap();
        assert!(scheduler.cancel_job(job.id));
        assert!(token.is_cancelled());

        // Running jobs are still completed by their worker
        assert_eq!(scheduler.stats().jobs_cancelled, 0);
        scheduler.complete_job(job_id);
        assert_eq!(scheduler.stats().jobs_completed, 1);
    }

    #[test]
    fn test_cancel_if_queued() {
        let scheduler = JobScheduler::new();
        let (running, running_token) = scheduler.submit(JobPriority::Visible, 1, target());
        let (waiting, waiting_token) = scheduler.submit(JobPriority::Visible, 2, target());

        // A worker takes the first job; the second stays queued
        assert_eq!(scheduler.next_job().unwrap().id, running);

        assert!(!scheduler.cancel_if_queued(running));
        assert!(!running_token.is_cancelled());

        assert!(scheduler.cancel_if_queued(waiting));
        assert!(waiting_token.is_cancelled());
        assert!(!scheduler.has_pending_jobs());
    }

    #[test]
    fn test_cancel_jobs_if() {
        let scheduler = JobScheduler::new();
        let tokens: Vec<_> = (0..6)
            .map(|index| scheduler.submit(JobPriority::Visible, index, target()).1)
            .collect();

        let cancelled = scheduler.cancel_jobs_if(|job| job.index >= 3);
        assert_eq!(cancelled.len(), 3);
        assert_eq!(scheduler.pending_jobs(), 3);

        for (index, token) in tokens.iter().enumerate() {
            assert_eq!(token.is_cancelled(), index >= 3);
        }
        assert_eq!(scheduler.stats().jobs_cancelled, 3);
    }

    #[test]
    fn test_cancel_jobs_for_old_target() {
        let scheduler = JobScheduler::new();
        let (_, stale) = scheduler.submit(JobPriority::Visible, 0, PixelTarget::new(10, 10));
        scheduler.submit(JobPriority::Visible, 1, target());

        let cancelled = scheduler.cancel_jobs_if(|job| job.target != target());
        assert!(stale.is_cancelled());
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].index, 0);
        assert_eq!(scheduler.next_job().unwrap().index, 1);
    }

    #[test]
    fn test_clear_counts_only_queued_jobs() {
        let scheduler = JobScheduler::new();
        let (_, running_token) = scheduler.submit(JobPriority::Visible, 0, target());
        scheduler.submit(JobPriority::Visible, 1, target());
        let running = scheduler.next_job().unwrap();

        scheduler.clear();
        assert!(running_token.is_cancelled());
        scheduler.complete_job(running.id);

        let stats = scheduler.stats();
        assert_eq!(stats.jobs_submitted, 2);
        assert_eq!(stats.jobs_cancelled, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.pending_jobs(), 0);
    }

    #[test]
    fn test_pending_jobs_never_underflows() {
        let stats = SchedulerStats {
            jobs_submitted: 1,
            jobs_completed: 1,
            jobs_cancelled: 1,
            queue_size: 0,
        };
        assert_eq!(stats.pending_jobs(), 0);
    }

    #[test]
    fn test_clear() {
        let scheduler = JobScheduler::new();
        let (_, first) = scheduler.submit(JobPriority::Visible, 0, target());
        let (_, second) = scheduler.submit(JobPriority::Prefetch, 1, target());

        scheduler.clear();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(!scheduler.has_pending_jobs());
        assert_eq!(scheduler.stats().jobs_cancelled, 2);
    }

    #[test]
    fn test_pending_jobs_list() {
        let scheduler = JobScheduler::new();
        scheduler.submit(JobPriority::Visible, 4, target());
        scheduler.submit(JobPriority::Visible, 5, target());

        let mut indices: Vec<_> = scheduler
            .pending_jobs_list()
            .into_iter()
            .map(|job| job.index)
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![4, 5]);
    }
}
