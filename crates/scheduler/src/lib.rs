//! Grid Thumbnail Scheduler Library
//!
//! Render job scheduling for the thumbnail grid.
//!
//! Jobs are queued by priority (visible cells before prefetched ones), run on
//! a fixed pool of worker threads, and can be cancelled cooperatively while
//! queued or running. Results travel back to the presentation thread through
//! a [`PresentationQueue`], which runs every cell update on the one thread
//! that drains it.
//!
//! # Example
//!
//! ```
//! use gridthumb_render::PixelTarget;
//! use gridthumb_scheduler::{JobPriority, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//! let (job_id, token) = scheduler.submit(JobPriority::Visible, 42, PixelTarget::new(288, 384));
//!
//! // The cell scrolled away before a worker picked the job up
//! scheduler.cancel_job(job_id);
//! assert!(token.is_cancelled());
//! assert!(scheduler.next_job().is_none());
//! ```

mod cancel;
mod presentation;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use presentation::{PresentationHandle, PresentationQueue, PresentationTask};
pub use priority::{Job, JobId, JobPriority};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
