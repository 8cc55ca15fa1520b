//! Grid layout state
//!
//! Holds the fixed layout parameters (columns, spacing, device scale, source
//! aspect ratio, item count) and the tile geometry derived from the most
//! recent viewport width. No thumbnail may be requested until the first
//! width has been reported.

use crate::config::PipelineConfig;
use gridthumb_render::{GeometryError, PixelTarget, TileGeometry};
use tracing::debug;

/// What a viewport width update did to the tile geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayoutChange {
    /// First geometry for this grid
    Initial(TileGeometry),

    /// Width changed but every thumbnail keeps its pixel size
    Unchanged(TileGeometry),

    /// Thumbnails now render at a different pixel size
    Resized {
        previous: TileGeometry,
        current: TileGeometry,
    },
}

impl LayoutChange {
    /// Geometry now in effect
    pub fn geometry(&self) -> TileGeometry {
        match self {
            Self::Initial(geometry) | Self::Unchanged(geometry) => *geometry,
            Self::Resized { current, .. } => *current,
        }
    }

    /// Returns true if thumbnails rendered before the change no longer fit
    pub fn target_changed(&self) -> bool {
        matches!(self, Self::Resized { .. })
    }
}

/// Layout of a fixed-column thumbnail grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    column_count: u32,
    spacing: f64,
    device_scale: f64,
    aspect_ratio: f64,
    item_count: usize,
    geometry: Option<TileGeometry>,
}

impl GridLayout {
    /// Create a layout with no geometry yet
    pub fn new(
        column_count: u32,
        spacing: f64,
        device_scale: f64,
        aspect_ratio: f64,
        item_count: usize,
    ) -> Self {
        Self {
            column_count,
            spacing,
            device_scale,
            aspect_ratio,
            item_count,
            geometry: None,
        }
    }

    /// Layout for `config`, using `source_aspect_ratio` when the config does
    /// not fix one
    pub fn from_config(config: &PipelineConfig, source_aspect_ratio: f64) -> Self {
        Self::new(
            config.column_count,
            config.spacing,
            config.device_scale,
            config.aspect_ratio.unwrap_or(source_aspect_ratio),
            config.item_count,
        )
    }

    /// Recompute the tile geometry for a new viewport width.
    ///
    /// On failure the previous geometry is discarded, so no thumbnail is
    /// rendered until a usable width arrives.
    pub fn viewport_did_change(
        &mut self,
        viewport_width: f64,
    ) -> Result<LayoutChange, GeometryError> {
        let computed = TileGeometry::compute(
            viewport_width,
            self.column_count,
            self.spacing,
            self.device_scale,
            self.aspect_ratio,
        );

        let current = match computed {
            Ok(geometry) => geometry,
            Err(error) => {
                self.geometry = None;
                return Err(error);
            }
        };

        let change = match self.geometry.replace(current) {
            None => LayoutChange::Initial(current),
            Some(previous) if previous.pixel_target == current.pixel_target => {
                LayoutChange::Unchanged(current)
            }
            Some(previous) => LayoutChange::Resized { previous, current },
        };

        debug!(
            viewport_width,
            tile_side = current.tile_side,
            width = current.pixel_target.width,
            height = current.pixel_target.height,
            "tile geometry updated"
        );
        Ok(change)
    }

    /// Current geometry, if a viewport width has been reported
    pub fn geometry(&self) -> Option<TileGeometry> {
        self.geometry
    }

    /// Size every thumbnail is currently rendered at
    pub fn pixel_target(&self) -> Option<PixelTarget> {
        self.geometry.map(|geometry| geometry.pixel_target)
    }

    pub fn column_count(&self) -> u32 {
        self.column_count
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn device_scale(&self) -> f64 {
        self.device_scale
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }
}
