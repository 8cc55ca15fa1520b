//! Thumbnail pipeline
//!
//! Wires the shared source image, the cache, the job scheduler, the render
//! worker pool and the presentation queue behind one handle. The thread that
//! owns the pipeline is the presentation thread: it reports visibility events
//! and drains completions with [`ThumbnailPipeline::run_pending`].

use crate::cell::GridCell;
use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchStats, DisplayOutcome, ViewportUpdate, VisibilityDispatcher};
use crate::error::DispatchResult;
use crate::layout::GridLayout;
use gridthumb_cache::{CacheStats, GridIndex, MemoryPressure, ThumbnailCache};
use gridthumb_render::{ImageThumbnailRenderer, PixelTarget, SourceImage, ThumbnailRender};
use gridthumb_scheduler::{JobScheduler, PresentationQueue, SchedulerStats, WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot of every pipeline counter
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub dispatch: DispatchStats,
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
}

/// A running thumbnail pipeline
pub struct ThumbnailPipeline {
    dispatcher: VisibilityDispatcher,
    presentation: PresentationQueue,
    pool: Option<WorkerPool>,
}

impl ThumbnailPipeline {
    /// Start a pipeline rendering `source` with the crop-and-scale renderer
    pub fn new(source: Arc<SourceImage>, config: &PipelineConfig) -> Self {
        let renderer =
            ImageThumbnailRenderer::new().with_max_surface_pixels(config.max_surface_pixels);
        Self::with_renderer(source, Arc::new(renderer), config)
    }

    /// Start a pipeline with a custom renderer
    pub fn with_renderer(
        source: Arc<SourceImage>,
        renderer: Arc<dyn ThumbnailRender>,
        config: &PipelineConfig,
    ) -> Self {
        let cache = Arc::new(ThumbnailCache::new(config.cache_bytes()));
        let scheduler = Arc::new(JobScheduler::new());
        let presentation = PresentationQueue::new();
        let layout = GridLayout::from_config(config, source.aspect_ratio());

        let dispatcher = VisibilityDispatcher::new(
            source,
            renderer,
            cache,
            scheduler.clone(),
            layout,
            presentation.handle(),
        );

        let pool_config = config
            .workers
            .map(WorkerPoolConfig::new)
            .unwrap_or_default();
        let workers = pool_config.num_workers;
        let pool = WorkerPool::new(scheduler, dispatcher.executor(), pool_config);

        info!(
            workers,
            columns = config.column_count,
            items = config.item_count,
            cache_mb = config.cache_mb,
            "thumbnail pipeline started"
        );

        Self {
            dispatcher,
            presentation,
            pool: Some(pool),
        }
    }

    /// Report a new viewport width. Must be called before the first cell is shown.
    pub fn viewport_did_change(&self, viewport_width: f64) -> DispatchResult<ViewportUpdate> {
        self.dispatcher.viewport_did_change(viewport_width)
    }

    /// A cell is about to show `index`
    pub fn on_cell_will_display(
        &self,
        index: GridIndex,
        cell: &GridCell,
    ) -> DispatchResult<DisplayOutcome> {
        self.dispatcher.on_cell_will_display(index, cell)
    }

    /// A cell stopped showing `index`
    pub fn on_cell_did_end_display(&self, index: GridIndex, cell: &GridCell) -> bool {
        self.dispatcher.on_cell_did_end_display(index, cell)
    }

    /// Render indices ahead of time without binding them
    pub fn prefetch<I>(&self, indices: I) -> DispatchResult<usize>
    where
        I: IntoIterator<Item = GridIndex>,
    {
        self.dispatcher.prefetch(indices)
    }

    /// Cancel prefetches that have not started
    pub fn cancel_prefetch<I>(&self, indices: I) -> usize
    where
        I: IntoIterator<Item = GridIndex>,
    {
        self.dispatcher.cancel_prefetch(indices)
    }

    /// Run every completion posted so far. Never blocks.
    pub fn run_pending(&self) -> usize {
        self.presentation.run_pending()
    }

    /// Run completions until no render is outstanding or `timeout` elapses.
    ///
    /// Returns `true` if the pipeline went idle.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        self.presentation.run_until(timeout, || self.is_idle())
    }

    /// Returns true if no render is outstanding and no completion is waiting
    pub fn is_idle(&self) -> bool {
        // Completions are posted before their in-flight entry disappears,
        // so check the entries first
        self.dispatcher.in_flight_count() == 0 && self.presentation.is_empty()
    }

    /// Forward an environment memory warning to the cache.
    ///
    /// Returns the number of thumbnails evicted.
    pub fn handle_memory_pressure(&self, level: MemoryPressure) -> usize {
        self.dispatcher.cache().handle_memory_pressure(level)
    }

    pub fn dispatcher(&self) -> &VisibilityDispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        self.dispatcher.cache()
    }

    /// Size thumbnails are currently rendered at
    pub fn pixel_target(&self) -> Option<PixelTarget> {
        self.dispatcher.pixel_target()
    }

    /// Number of render worker threads
    pub fn num_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::num_workers)
    }

    /// Get pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            dispatch: self.dispatcher.stats(),
            cache: self.dispatcher.cache().stats(),
            scheduler: self.dispatcher.scheduler().stats(),
        }
    }

    /// Cancel outstanding renders and stop the worker pool.
    ///
    /// Completions that have not been run are dropped.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        self.dispatcher.scheduler().clear();
        pool.shutdown();
        debug!("thumbnail pipeline stopped");
    }
}

impl Drop for ThumbnailPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn source() -> Arc<SourceImage> {
        let image = RgbImage::from_fn(120, 160, |x, y| Rgb([x as u8, y as u8, 64]));
        Arc::new(SourceImage::new(DynamicImage::ImageRgb8(image)).unwrap())
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_workers(2)
            .with_item_count(200)
            .with_cache_mb(16)
    }

    #[test]
    fn test_pipeline_renders_visible_cells() {
        let pipeline = ThumbnailPipeline::new(source(), &config());
        pipeline.viewport_did_change(390.0).unwrap();
        assert_eq!(pipeline.num_workers(), 2);

        let cells: Vec<_> = (0..8).map(|_| GridCell::new()).collect();
        for (index, cell) in cells.iter().enumerate() {
            pipeline.on_cell_will_display(index, cell).unwrap();
        }

        assert!(pipeline.run_until_idle(Duration::from_secs(10)));
        assert!(cells.iter().all(GridCell::is_filled));

        let target = pipeline.pixel_target().unwrap();
        assert_eq!(target, PixelTarget::new(96, 128));
        assert!(cells[0].thumbnail().unwrap().matches_target(target));

        let stats = pipeline.stats();
        assert_eq!(stats.dispatch.renders_succeeded, 8);
        assert_eq!(stats.cache.entry_count, 8);

        pipeline.shutdown();
    }

    #[test]
    fn test_aspect_ratio_from_source() {
        let pipeline = ThumbnailPipeline::new(source(), &config());
        assert_eq!(pipeline.dispatcher().layout().aspect_ratio(), 0.75);
    }

    #[test]
    fn test_memory_pressure_empties_cache() {
        let pipeline = ThumbnailPipeline::new(source(), &config());
        pipeline.viewport_did_change(390.0).unwrap();
        pipeline.prefetch(0..4).unwrap();
        assert!(pipeline.run_until_idle(Duration::from_secs(10)));
        assert_eq!(pipeline.cache().len(), 4);

        assert_eq!(pipeline.handle_memory_pressure(MemoryPressure::Critical), 4);
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn test_idle_pipeline() {
        let pipeline = ThumbnailPipeline::new(source(), &config());
        assert!(pipeline.is_idle());
        assert_eq!(pipeline.run_pending(), 0);
    }
}
