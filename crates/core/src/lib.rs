//! Grid Thumbnail Core Library
//!
//! Connects a virtualized grid to the thumbnail cache and the render workers.
//!
//! The grid reports viewport widths and cell visibility; the pipeline answers
//! from the cache when it can, renders off the presentation thread when it
//! cannot, and binds every finished thumbnail to the cell that asked for it,
//! provided the cell still shows the same index.
//!
//! # Example
//!
//! ```no_run
//! use gridthumb_core::{GridCell, PipelineConfig, ThumbnailPipeline};
//! use gridthumb_render::SourceImage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(SourceImage::open("photo.jpg")?);
//! let config = PipelineConfig::load(None)?.with_device_scale(3.0);
//! let pipeline = ThumbnailPipeline::new(source, &config);
//!
//! pipeline.viewport_did_change(390.0)?;
//!
//! let cell = GridCell::new();
//! pipeline.on_cell_will_display(42, &cell)?;
//! pipeline.run_until_idle(Duration::from_secs(5));
//! assert!(cell.is_filled());
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod layout;
pub mod pipeline;

pub use cell::GridCell;
pub use config::{ConfigError, PipelineConfig};
pub use dispatcher::{DispatchStats, DisplayOutcome, ViewportUpdate, VisibilityDispatcher};
pub use error::{DispatchError, DispatchResult};
pub use layout::{GridLayout, LayoutChange};
pub use pipeline::{PipelineStats, ThumbnailPipeline};
