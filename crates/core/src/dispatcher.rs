//! Visibility dispatcher
//!
//! Called by the grid for every cell about to appear. A cell whose thumbnail
//! is cached is filled on the spot; otherwise one render job per index is
//! queued, and when it finishes the result is cached and handed to every cell
//! still waiting for it, on the presentation thread.
//!
//! Render workers only hold a weak reference to the dispatcher, so tearing the
//! dispatcher down turns outstanding work into stale completions instead of
//! keeping the pipeline alive.

use crate::cell::GridCell;
use crate::error::{DispatchError, DispatchResult};
use crate::layout::{GridLayout, LayoutChange};
use gridthumb_cache::{GridIndex, ThumbnailCache};
use gridthumb_render::{PixelTarget, RenderError, SourceImage, Thumbnail, ThumbnailRender};
use gridthumb_scheduler::{
    CancellationToken, Job, JobExecutor, JobId, JobPriority, JobScheduler, PresentationHandle,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// How a cell-display event was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayOutcome {
    /// Bound synchronously from the cache
    CacheHit,

    /// A new render job was queued
    Scheduled(JobId),

    /// The cell joined a render already in flight for its index
    Joined(JobId),
}

/// Counters for dispatcher activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Display events served from the cache
    pub cache_hits: u64,

    /// Render jobs queued (visible and prefetch)
    pub renders_scheduled: u64,

    /// Display events that attached to a render already in flight
    pub requests_joined: u64,

    /// Renders that produced a thumbnail
    pub renders_succeeded: u64,

    /// Renders that failed
    pub renders_failed: u64,

    /// Renders cancelled before they produced a result
    pub renders_cancelled: u64,

    /// Cells that received a rendered thumbnail
    pub cells_bound: u64,

    /// Results dropped because their cell had been recycled
    pub stale_completions: u64,
}

/// Result of a viewport width update
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportUpdate {
    /// Effect on the tile geometry
    pub change: LayoutChange,

    /// Jobs dropped because they rendered at the previous size
    pub cancelled: usize,

    /// Jobs re-queued at the new size because cells were waiting on them
    pub resubmitted: usize,
}

#[derive(Debug)]
struct Waiter {
    cell: GridCell,
    generation: u64,
}

#[derive(Debug)]
struct InFlight {
    job_id: JobId,
    priority: JobPriority,
    target: PixelTarget,
    waiters: Vec<Waiter>,
}

impl InFlight {
    fn attach(&mut self, cell: &GridCell, generation: u64) {
        match self.waiters.iter_mut().find(|waiter| waiter.cell.same_cell(cell)) {
            Some(waiter) => waiter.generation = generation,
            None => self.waiters.push(Waiter {
                cell: cell.clone(),
                generation,
            }),
        }
    }
}

struct DispatchState {
    source: Arc<SourceImage>,
    renderer: Arc<dyn ThumbnailRender>,
    cache: Arc<ThumbnailCache>,
    scheduler: Arc<JobScheduler>,
    presentation: PresentationHandle,
    // Lock order: in_flight before layout
    layout: RwLock<GridLayout>,
    in_flight: Mutex<HashMap<GridIndex, InFlight>>,
    stats: Mutex<DispatchStats>,
}

impl DispatchState {
    /// Cached thumbnail for `index`, if it was rendered at `target`
    fn lookup(&self, index: GridIndex, target: PixelTarget) -> Option<Thumbnail> {
        let thumbnail = self.cache.get(index)?;
        if thumbnail.matches_target(target) {
            Some(thumbnail)
        } else {
            trace!(index, "cached thumbnail has a stale size");
            None
        }
    }

    fn submit(&self, priority: JobPriority, index: GridIndex, target: PixelTarget) -> JobId {
        let (job_id, _token) = self.scheduler.submit(priority, index, target);
        self.stats.lock().renders_scheduled += 1;
        job_id
    }

    /// Move a queued prefetch ahead of other prefetches
    fn promote(&self, index: GridIndex, entry: &mut InFlight) {
        if entry.priority == JobPriority::Visible {
            return;
        }
        if self.scheduler.cancel_if_queued(entry.job_id) {
            entry.job_id = self.submit(JobPriority::Visible, index, entry.target);
            debug!(index, job_id = entry.job_id, "promoted prefetch to visible");
        }
        entry.priority = JobPriority::Visible;
    }

    /// Worker side: render one job and publish the result
    fn run(self: &Arc<Self>, job: &Job, token: &CancellationToken) {
        let device_scale = self.layout.read().device_scale();
        let result = self.renderer.render(&self.source, job.target, device_scale);

        if token.is_cancelled() {
            trace!(index = job.index, job_id = job.id, "render cancelled, discarding result");
            return;
        }

        match result {
            Ok(thumbnail) => self.complete(job, thumbnail),
            Err(error) => self.fail(job, error),
        }
    }

    fn complete(self: &Arc<Self>, job: &Job, thumbnail: Thumbnail) {
        self.cache.put(job.index, thumbnail.clone());

        let mut in_flight = self.in_flight.lock();
        let waiters = take_entry(&mut in_flight, job)
            .map(|entry| entry.waiters)
            .unwrap_or_default();
        self.stats.lock().renders_succeeded += 1;
        debug!(index = job.index, job_id = job.id, waiters = waiters.len(), "thumbnail rendered");

        if waiters.is_empty() {
            return;
        }

        // Posted while in_flight is held so an idle check never sees the
        // entry gone before its completion is queued
        let state = Arc::downgrade(self);
        let index = job.index;
        let posted = self.presentation.post(move || {
            if let Err(error) = deliver(&state, index, thumbnail, waiters) {
                trace!(%error, "dropping completion");
            }
        });
        if !posted {
            trace!(index, "presentation queue closed, dropping completion");
        }
    }

    fn fail(&self, job: &Job, error: RenderError) {
        warn!(index = job.index, job_id = job.id, %error, "thumbnail render failed");

        let mut in_flight = self.in_flight.lock();
        take_entry(&mut in_flight, job);
        self.stats.lock().renders_failed += 1;
    }
}

/// Remove the in-flight entry for `job`, unless a newer job replaced it
fn take_entry(in_flight: &mut HashMap<GridIndex, InFlight>, job: &Job) -> Option<InFlight> {
    match in_flight.get(&job.index) {
        Some(entry) if entry.job_id == job.id => in_flight.remove(&job.index),
        _ => None,
    }
}

fn run_job(state: &Weak<DispatchState>, job: &Job, token: &CancellationToken) {
    match state.upgrade() {
        Some(state) => state.run(job, token),
        None => trace!(index = job.index, job_id = job.id, "pipeline torn down, dropping render"),
    }
}

/// Presentation side: bind a finished thumbnail to the cells that asked for it
fn deliver(
    state: &Weak<DispatchState>,
    index: GridIndex,
    thumbnail: Thumbnail,
    waiters: Vec<Waiter>,
) -> DispatchResult<usize> {
    let state = state
        .upgrade()
        .ok_or(DispatchError::StaleCompletion { index })?;

    let requested = waiters.len();
    let bound = waiters
        .into_iter()
        .filter(|waiter| waiter.cell.bind(index, waiter.generation, thumbnail.clone()))
        .count();

    let mut stats = state.stats.lock();
    stats.cells_bound += bound as u64;
    stats.stale_completions += (requested - bound) as u64;

    if bound == 0 {
        Err(DispatchError::StaleCompletion { index })
    } else {
        Ok(bound)
    }
}

/// Routes cell-display events to the cache or the render queue
pub struct VisibilityDispatcher {
    state: Arc<DispatchState>,
}

impl VisibilityDispatcher {
    /// Create a dispatcher.
    ///
    /// Nothing renders until [`executor`](Self::executor) is handed to a
    /// worker pool draining `scheduler`, and completions only reach cells
    /// when the queue behind `presentation` is run.
    pub fn new(
        source: Arc<SourceImage>,
        renderer: Arc<dyn ThumbnailRender>,
        cache: Arc<ThumbnailCache>,
        scheduler: Arc<JobScheduler>,
        layout: GridLayout,
        presentation: PresentationHandle,
    ) -> Self {
        Self {
            state: Arc::new(DispatchState {
                source,
                renderer,
                cache,
                scheduler,
                presentation,
                layout: RwLock::new(layout),
                in_flight: Mutex::new(HashMap::new()),
                stats: Mutex::new(DispatchStats::default()),
            }),
        }
    }

    /// Job executor for the worker pool. Holds the dispatcher weakly.
    pub fn executor(&self) -> JobExecutor {
        let state = Arc::downgrade(&self.state);
        Arc::new(move |job: &Job, token: &CancellationToken| run_job(&state, job, token))
    }

    /// Recompute tile geometry for a new viewport width.
    ///
    /// If thumbnails now render at a different size, every job for the old
    /// size is cancelled and the ones cells are still waiting on are queued
    /// again at the new size. If the width is unusable, all outstanding jobs
    /// are cancelled.
    pub fn viewport_did_change(&self, viewport_width: f64) -> DispatchResult<ViewportUpdate> {
        let mut in_flight = self.state.in_flight.lock();
        let change = self.state.layout.write().viewport_did_change(viewport_width);

        let change = match change {
            Ok(change) => change,
            Err(error) => {
                let cancelled = in_flight.len();
                for (_, entry) in in_flight.drain() {
                    self.state.scheduler.cancel_job(entry.job_id);
                }
                self.state.stats.lock().renders_cancelled += cancelled as u64;
                warn!(viewport_width, %error, cancelled, "viewport too small for the grid");
                return Err(error.into());
            }
        };

        let target = change.geometry().pixel_target;
        let outdated: Vec<GridIndex> = in_flight
            .iter()
            .filter(|(_, entry)| entry.target != target)
            .map(|(index, _)| *index)
            .collect();

        let mut cancelled = 0;
        let mut resubmitted = 0;
        for index in outdated {
            let Some(entry) = in_flight.remove(&index) else {
                continue;
            };
            self.state.scheduler.cancel_job(entry.job_id);
            cancelled += 1;

            if entry.waiters.is_empty() {
                continue;
            }
            let job_id = self.state.submit(entry.priority, index, target);
            in_flight.insert(
                index,
                InFlight {
                    job_id,
                    target,
                    ..entry
                },
            );
            resubmitted += 1;
        }

        self.state.stats.lock().renders_cancelled += cancelled as u64;
        if cancelled > 0 {
            debug!(cancelled, resubmitted, "re-queued renders for the new tile size");
        }

        Ok(ViewportUpdate {
            change,
            cancelled,
            resubmitted,
        })
    }

    /// The grid is about to show `cell` for `index`.
    ///
    /// Binds a cached thumbnail immediately, or makes sure a render for the
    /// index is queued and that its result will reach this cell.
    pub fn on_cell_will_display(
        &self,
        index: GridIndex,
        cell: &GridCell,
    ) -> DispatchResult<DisplayOutcome> {
        let mut in_flight = self.state.in_flight.lock();
        let (target, item_count) = {
            let layout = self.state.layout.read();
            (layout.pixel_target(), layout.item_count())
        };

        if index >= item_count {
            return Err(DispatchError::IndexOutOfRange { index, item_count });
        }
        let target = target.ok_or(DispatchError::NotReady)?;
        let generation = cell.assign(index);

        if let Some(thumbnail) = self.state.lookup(index, target) {
            drop(in_flight);
            let bound = cell.bind(index, generation, thumbnail);
            let mut stats = self.state.stats.lock();
            stats.cache_hits += 1;
            if bound {
                stats.cells_bound += 1;
            }
            debug!(index, "thumbnail cache hit");
            return Ok(DisplayOutcome::CacheHit);
        }

        if let Some(entry) = in_flight.get_mut(&index) {
            entry.attach(cell, generation);
            self.state.promote(index, entry);
            self.state.stats.lock().requests_joined += 1;
            trace!(index, job_id = entry.job_id, "joined render in flight");
            return Ok(DisplayOutcome::Joined(entry.job_id));
        }

        let job_id = self.state.submit(JobPriority::Visible, index, target);
        in_flight.insert(
            index,
            InFlight {
                job_id,
                priority: JobPriority::Visible,
                target,
                waiters: vec![Waiter {
                    cell: cell.clone(),
                    generation,
                }],
            },
        );
        debug!(index, job_id, "thumbnail cache miss, render queued");

        Ok(DisplayOutcome::Scheduled(job_id))
    }

    /// The grid stopped showing `cell` for `index`.
    ///
    /// Once no cell waits for the index, a render that has not started yet is
    /// cancelled. A render already running is left to finish into the cache.
    /// Returns `true` if a job was cancelled.
    pub fn on_cell_did_end_display(&self, index: GridIndex, cell: &GridCell) -> bool {
        let mut in_flight = self.state.in_flight.lock();
        let Some(entry) = in_flight.get_mut(&index) else {
            return false;
        };

        entry.waiters.retain(|waiter| !waiter.cell.same_cell(cell));
        if !entry.waiters.is_empty() || !self.state.scheduler.cancel_if_queued(entry.job_id) {
            return false;
        }

        let job_id = entry.job_id;
        in_flight.remove(&index);
        self.state.stats.lock().renders_cancelled += 1;
        debug!(index, job_id, "cell left the screen, render cancelled");
        true
    }

    /// Queue low-priority renders for indices about to scroll into view.
    ///
    /// Indices already cached, already in flight, or outside the grid are
    /// skipped. Returns the number of jobs queued.
    pub fn prefetch<I>(&self, indices: I) -> DispatchResult<usize>
    where
        I: IntoIterator<Item = GridIndex>,
    {
        let mut in_flight = self.state.in_flight.lock();
        let (target, item_count) = {
            let layout = self.state.layout.read();
            (layout.pixel_target(), layout.item_count())
        };
        let target = target.ok_or(DispatchError::NotReady)?;

        let mut scheduled = 0;
        for index in indices {
            if index >= item_count
                || in_flight.contains_key(&index)
                || self.state.lookup(index, target).is_some()
            {
                continue;
            }

            let job_id = self.state.submit(JobPriority::Prefetch, index, target);
            in_flight.insert(
                index,
                InFlight {
                    job_id,
                    priority: JobPriority::Prefetch,
                    target,
                    waiters: Vec::new(),
                },
            );
            scheduled += 1;
        }

        if scheduled > 0 {
            debug!(scheduled, "prefetch queued");
        }
        Ok(scheduled)
    }

    /// Cancel prefetches that have not started and that no cell waits for.
    ///
    /// Returns the number of jobs cancelled.
    pub fn cancel_prefetch<I>(&self, indices: I) -> usize
    where
        I: IntoIterator<Item = GridIndex>,
    {
        let mut in_flight = self.state.in_flight.lock();
        let mut cancelled = 0;

        for index in indices {
            let cancellable = in_flight.get(&index).is_some_and(|entry| {
                entry.priority == JobPriority::Prefetch
                    && entry.waiters.is_empty()
                    && self.state.scheduler.cancel_if_queued(entry.job_id)
            });
            if cancellable {
                in_flight.remove(&index);
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            self.state.stats.lock().renders_cancelled += cancelled as u64;
            debug!(cancelled, "prefetch cancelled");
        }
        cancelled
    }

    /// Snapshot of the grid layout
    pub fn layout(&self) -> GridLayout {
        self.state.layout.read().clone()
    }

    /// Size thumbnails are currently rendered at
    pub fn pixel_target(&self) -> Option<PixelTarget> {
        self.state.layout.read().pixel_target()
    }

    /// Shared thumbnail cache
    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.state.cache
    }

    /// Shared job scheduler
    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.state.scheduler
    }

    /// Number of indices with a render queued or running
    pub fn in_flight_count(&self) -> usize {
        self.state.in_flight.lock().len()
    }

    /// Returns true if a render for `index` is queued or running
    pub fn is_in_flight(&self, index: GridIndex) -> bool {
        self.state.in_flight.lock().contains_key(&index)
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatchStats {
        self.state.stats.lock().clone()
    }
}
