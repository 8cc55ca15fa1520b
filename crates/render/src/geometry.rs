//! Tile geometry for the thumbnail grid
//!
//! Divides the viewport width into square tiles separated by a fixed spacing,
//! and converts a tile side (in points) into the exact pixel size a thumbnail
//! must be rendered at for the current device scale and source aspect ratio.

use thiserror::Error;

/// Slack allowed when checking that a row of tiles fits the viewport.
const FIT_EPSILON: f64 = 1e-6;

/// Invalid grid geometry. A request that hits one of these is rejected
/// before any surface is allocated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("column count must be at least 1")]
    NoColumns,

    #[error("spacing must be finite and non-negative, got {0}")]
    InvalidSpacing(f64),

    #[error(
        "viewport width {viewport_width} leaves no room for {column_count} columns \
         with spacing {spacing}"
    )]
    ViewportTooNarrow {
        viewport_width: f64,
        column_count: u32,
        spacing: f64,
    },

    #[error("device scale must be finite and positive, got {0}")]
    InvalidScale(f64),

    #[error("aspect ratio must be finite and positive, got {0}")]
    InvalidAspectRatio(f64),

    #[error("tile side must be at least one point")]
    EmptyTile,

    #[error("pixel target {width}x{height} does not fit in 32 bits")]
    TargetTooLarge { width: f64, height: f64 },
}

/// Exact size, in device pixels, of a rendered thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelTarget {
    pub width: u32,
    pub height: u32,
}

impl PixelTarget {
    /// Create a pixel target
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in the target surface
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// The same target with width and height exchanged
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// Compute the side length, in points, of one square tile.
///
/// `round((viewport_width - spacing * (column_count - 1)) / column_count)`,
/// except that a rounded-up side which would make the row overflow the
/// viewport is taken down by one point.
pub fn compute_tile_side(
    viewport_width: f64,
    column_count: u32,
    spacing: f64,
) -> Result<u32, GeometryError> {
    if column_count == 0 {
        return Err(GeometryError::NoColumns);
    }
    if !spacing.is_finite() || spacing < 0.0 {
        return Err(GeometryError::InvalidSpacing(spacing));
    }

    let too_narrow = || GeometryError::ViewportTooNarrow {
        viewport_width,
        column_count,
        spacing,
    };

    let columns = f64::from(column_count);
    let available = viewport_width - spacing * (columns - 1.0);
    if !available.is_finite() || available <= 0.0 {
        return Err(too_narrow());
    }

    let mut side = (available / columns).round();
    if side * columns > available + FIT_EPSILON {
        side -= 1.0;
    }
    if side < 1.0 || side > f64::from(u32::MAX) {
        return Err(too_narrow());
    }

    Ok(side as u32)
}

/// Compute the pixel size of a thumbnail for a tile.
///
/// `width = round(tile_side * device_scale)` and
/// `height = round(round(tile_side / aspect_ratio) * device_scale)`: the height
/// is snapped to whole points before it is scaled. Both are at least one
/// pixel. `aspect_ratio` is the displayed width / height of the source image.
pub fn compute_pixel_target(
    tile_side: u32,
    device_scale: f64,
    aspect_ratio: f64,
) -> Result<PixelTarget, GeometryError> {
    if tile_side == 0 {
        return Err(GeometryError::EmptyTile);
    }
    if !device_scale.is_finite() || device_scale <= 0.0 {
        return Err(GeometryError::InvalidScale(device_scale));
    }
    if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
        return Err(GeometryError::InvalidAspectRatio(aspect_ratio));
    }

    let side = f64::from(tile_side);
    let height_points = (side / aspect_ratio).round().max(1.0);
    let width = (side * device_scale).round().max(1.0);
    let height = (height_points * device_scale).round().max(1.0);

    let max = f64::from(u32::MAX);
    if width > max || height > max {
        return Err(GeometryError::TargetTooLarge { width, height });
    }

    Ok(PixelTarget::new(width as u32, height as u32))
}

/// Tile side and pixel target valid for one viewport size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGeometry {
    /// Viewport width the geometry was computed for (points)
    pub viewport_width: f64,

    /// Side of one square tile (points)
    pub tile_side: u32,

    /// Size every thumbnail is rendered at (device pixels)
    pub pixel_target: PixelTarget,
}

impl TileGeometry {
    /// Compute the full geometry for a viewport width
    pub fn compute(
        viewport_width: f64,
        column_count: u32,
        spacing: f64,
        device_scale: f64,
        aspect_ratio: f64,
    ) -> Result<Self, GeometryError> {
        let tile_side = compute_tile_side(viewport_width, column_count, spacing)?;
        let pixel_target = compute_pixel_target(tile_side, device_scale, aspect_ratio)?;
        Ok(Self {
            viewport_width,
            tile_side,
            pixel_target,
        })
    }
}
