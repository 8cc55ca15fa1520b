//! Single-threaded executor for presentation work
//!
//! Render workers never touch cells directly. They post closures through a
//! [`PresentationHandle`], and the presentation thread runs them, one at a
//! time and in posting order, whenever it drains its [`PresentationQueue`].

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// A unit of work that must run on the presentation thread
pub type PresentationTask = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable sender side, handed to worker threads
#[derive(Clone)]
pub struct PresentationHandle {
    sender: Sender<PresentationTask>,
}

impl PresentationHandle {
    /// Post a task. Returns `false` if the queue no longer exists.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(task)).is_ok()
    }
}

/// Receiving side, owned and drained by the presentation thread
pub struct PresentationQueue {
    sender: Sender<PresentationTask>,
    receiver: Receiver<PresentationTask>,
}

impl PresentationQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Handle for posting tasks from other threads
    pub fn handle(&self) -> PresentationHandle {
        PresentationHandle {
            sender: self.sender.clone(),
        }
    }

    /// Number of tasks waiting to run
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if no task is waiting
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Run every task already posted, without blocking.
    ///
    /// Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for at least one task, then run everything posted.
    ///
    /// Returns the number of tasks run.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Run tasks as they arrive until none has been posted for `idle`.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self, idle: Duration) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.recv_timeout(idle) {
            task();
            ran += 1;
        }
        ran
    }

    /// Keep running tasks until `done` returns true or `timeout` elapses.
    ///
    /// Returns `true` if `done` was satisfied.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.run_for(remaining.min(Duration::from_millis(10)));
        }
    }
}

impl Default for PresentationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_tasks_run_on_draining_thread() {
        let queue = PresentationQueue::new();
        let handle = queue.handle();
        let ran_on = Arc::new(Mutex::new(None));

        let recorded = ran_on.clone();
        thread::spawn(move || {
            handle.post(move || {
                *recorded.lock().unwrap() = Some(thread::current().id());
            });
        })
        .join()
        .unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));
    }

    #[test]
    fn test_tasks_run_in_posting_order() {
        let queue = PresentationQueue::new();
        let handle = queue.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            handle.post(move || order.lock().unwrap().push(i));
        }

        queue.run_pending();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_run_pending_never_blocks() {
        let queue = PresentationQueue::new();
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_run_for_waits_for_worker() {
        let queue = PresentationQueue::new();
        let handle = queue.handle();
        let count = Arc::new(AtomicUsize::new(0));

        let posted = count.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.post(move || {
                posted.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(queue.run_for(Duration::from_secs(5)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn test_run_until_idle_drains_bursts() {
        let queue = PresentationQueue::new();
        let handle = queue.handle();
        let count = Arc::new(AtomicUsize::new(0));

        let posted = count.clone();
        let worker = thread::spawn(move || {
            for _ in 0..3 {
                let posted = posted.clone();
                handle.post(move || {
                    posted.fetch_add(1, Ordering::SeqCst);
                });
                thread::sleep(Duration::from_millis(5));
            }
        });

        worker.join().unwrap();
        assert_eq!(queue.run_until_idle(Duration::from_millis(20)), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_run_until_times_out() {
        let queue = PresentationQueue::new();
        let polls = Cell::new(0);

        let satisfied = queue.run_until(Duration::from_millis(30), || {
            polls.set(polls.get() + 1);
            false
        });

        assert!(!satisfied);
        assert!(polls.get() >= 1);
    }

    #[test]
    fn test_post_after_queue_dropped() {
        let queue = PresentationQueue::new();
        let handle = queue.handle();
        drop(queue);

        assert!(!handle.post(|| {}));
    }
}
