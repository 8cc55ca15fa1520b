//! Priority queue of render jobs
//!
//! Visible cells render before prefetched ones; within one priority level
//! jobs run in submission order. Workers can block on the queue until a job
//! arrives instead of polling it.

use gridthumb_render::PixelTarget;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Job priority levels
///
/// Higher values are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Cell expected to scroll into view soon
    Prefetch = 0,

    /// Cell that is about to be displayed
    Visible = 1,
}

/// Unique job identifier
pub type JobId = u64;

/// One queued thumbnail render
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// Grid index the thumbnail is rendered for
    pub index: usize,

    /// Pixel size to render at
    pub target: PixelTarget,

    /// Insertion order (FIFO within a priority level)
    insertion_order: u64,
}

impl Job {
    /// Create a new job
    pub fn new(
        id: JobId,
        priority: JobPriority,
        index: usize,
        target: PixelTarget,
        insertion_order: u64,
    ) -> Self {
        Self {
            id,
            priority,
            index,
            target,
            insertion_order,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

/// Thread-safe priority queue of jobs
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl PriorityQueue {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Push a job, running `on_assigned` with its ID before any consumer can
    /// pop it
    pub fn push_with<F>(
        &self,
        priority: JobPriority,
        index: usize,
        target: PixelTarget,
        on_assigned: F,
    ) -> JobId
    where
        F: FnOnce(JobId),
    {
        let mut state = self.state.lock();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        on_assigned(job_id);
        state
            .heap
            .push(Job::new(job_id, priority, index, target, insertion_order));
        drop(state);

        self.available.notify_one();
        job_id
    }

    /// Pop the highest priority job, or `None` if the queue is empty
    pub fn pop(&self) -> Option<Job> {
        self.state.lock().heap.pop()
    }

    /// Pop the highest priority job, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let mut state = self.state.lock();
        if state.heap.is_empty() {
            self.available.wait_for(&mut state, timeout);
        }
        state.heap.pop()
    }

    /// Wake every thread blocked in [`pop_timeout`](Self::pop_timeout)
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Returns true if no job is queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Remove all jobs matching a predicate, returning the removed jobs
    pub fn remove_if<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock();
        let (removed, kept): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut state.heap).into_iter().partition(|job| predicate(job));
        state.heap = kept.into();
        removed
    }

    /// All queued jobs, in arbitrary order
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl PriorityQueue {
        fn push(&self, priority: JobPriority, index: usize, target: PixelTarget) -> JobId {
            self.push_with(priority, index, target, |_| {})
        }
    }
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn target() -> PixelTarget {
        PixelTarget::new(96, 128)
    }

    #[test]
    fn test_job_priority_ordering() {
        assert!(JobPriority::Visible > JobPriority::Prefetch);
    }

    #[test]
    fn test_priority_queue_basic() {
        let queue = PriorityQueue::new();
        assert!(queue.is_empty());

        let id = queue.push(JobPriority::Visible, 42, target());
        assert_eq!(queue.len(), 1);

        let job = queue.pop().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.index, 42);
        assert_eq!(job.target, target());
        assert_eq!(job.priority, JobPriority::Visible);

        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_visible_before_prefetch() {
        let queue = PriorityQueue::new();

        queue.push(JobPriority::Prefetch, 1, target());
        queue.push(JobPriority::Visible, 2, target());
        queue.push(JobPriority::Prefetch, 3, target());

        assert_eq!(queue.pop().unwrap().index, 2);
        assert_eq!(queue.pop().unwrap().index, 1);
        assert_eq!(queue.pop().unwrap().index, 3);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = PriorityQueue::new();
        for index in 0..5 {
            queue.push(JobPriority::Visible, index, target());
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|job| job.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_unique_job_ids() {
        let queue = PriorityQueue::new();
        let first = queue.push(JobPriority::Visible, 0, target());
        let second = queue.push(JobPriority::Visible, 0, target());
        assert_ne!(first, second);
    }

    #[test]
    fn test_remove_if() {
        let queue = PriorityQueue::new();
        for index in 0..6 {
            queue.push(JobPriority::Visible, index, target());
        }

        let removed = queue.remove_if(|job| job.index % 2 == 0);
        assert_eq!(removed.len(), 3);
        assert_eq!(queue.len(), 3);
        assert!(queue.jobs().iter().all(|job| job.index % 2 == 1));

        // Order of what is left is preserved
        assert_eq!(queue.pop().unwrap().index, 1);
    }

    #[test]
    fn test_remove_everything() {
        let queue = PriorityQueue::new();
        queue.push(JobPriority::Visible, 0, target());
        queue.push(JobPriority::Prefetch, 1, target());

        assert_eq!(queue.remove_if(|_| true).len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let queue = PriorityQueue::new();
        let start = Instant::now();

        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(PriorityQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(JobPriority::Visible, 3, target());

        let job = consumer.join().unwrap().expect("consumer should receive the job");
        assert_eq!(job.index, 3);
    }
}
