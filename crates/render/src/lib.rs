//! Grid Thumbnail Render Library
//!
//! Tile geometry for the thumbnail grid and the crop-and-scale renderer that
//! turns the shared source image into one thumbnail per grid cell.

pub mod geometry;
pub mod source;
pub mod thumbnail;

pub use geometry::{compute_pixel_target, compute_tile_side, GeometryError, PixelTarget, TileGeometry};
pub use source::{SourceError, SourceImage};
pub use thumbnail::{
    ImageThumbnailRenderer, RenderError, RenderResult, Thumbnail, ThumbnailRender,
    DEFAULT_MAX_SURFACE_PIXELS,
};

/// Orientation metadata carried from the source image to every thumbnail.
pub use image::metadata::Orientation;
