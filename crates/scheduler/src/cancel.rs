//! Cancellation token system for render jobs
//!
//! Provides cancellation tokens that allow queued or running jobs to be
//! cancelled cooperatively. Workers check the token before drawing and
//! before publishing a result.

use crate::priority::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative job cancellation
///
/// Clones share the same underlying state.
///
/// # Example
///
/// ```
/// use gridthumb_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and all of its clones. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if `cancel()` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry mapping live job IDs to their cancellation tokens
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return its token
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(job_id, token.clone());
        token
    }

    /// Cancel a job by ID. Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel several jobs, returning how many were registered
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        let tokens = self.tokens.lock();
        job_ids
            .iter()
            .filter_map(|job_id| tokens.get(job_id))
            .inspect(|token| token.cancel())
            .count()
    }

    /// Cancel every registered job, returning how many there were
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Forget a job once it has completed or left the queue
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.tokens.lock().remove(&job_id).is_some()
    }

    /// Token for a registered job
    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().get(&job_id).cloned()
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Returns true if no job is registered
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    /// Forget every token without cancelling it
    pub fn clear(&self) {
        self.tokens.lock().clear();
    }
}
