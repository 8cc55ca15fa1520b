//! Thumbnail rendering
//!
//! Crops the source image to the aspect ratio of a pixel target and scales it
//! into a freshly allocated surface of exactly that size, in the source's own
//! pixel format. The resulting [`Thumbnail`] is immutable and cheap to clone,
//! so the same bitmap can sit in the cache and be bound to a cell at once.

use crate::geometry::PixelTarget;
use crate::source::{swaps_axes, SourceImage};
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{ColorType, DynamicImage, ImageBuffer, Pixel};
use std::sync::Arc;
use thiserror::Error;

/// Default cap on the surface size: 8192 x 8192 pixels.
pub const DEFAULT_MAX_SURFACE_PIXELS: u64 = 8192 * 8192;

/// A render job that could not produce a bitmap
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("cannot allocate a {width}x{height} surface")]
    InvalidTarget { width: u32, height: u32 },

    #[error("a {width}x{height} surface exceeds the limit of {limit} pixels")]
    SurfaceTooLarge { width: u32, height: u32, limit: u64 },

    #[error("unsupported pixel format {0:?}")]
    UnsupportedPixelFormat(ColorType),

    #[error("render failed: {0}")]
    Draw(String),
}

/// Result type for rendering
pub type RenderResult<T> = Result<T, RenderError>;

/// A rendered, immutable thumbnail bitmap
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pixels: Arc<DynamicImage>,
    scale: f64,
    orientation: Orientation,
}

impl Thumbnail {
    /// Wrap rendered pixels with their display metadata
    pub fn new(pixels: DynamicImage, scale: f64, orientation: Orientation) -> Self {
        Self {
            pixels: Arc::new(pixels),
            scale,
            orientation,
        }
    }

    /// Stored pixels (not yet rotated for display)
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Device scale the thumbnail was rendered for
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Orientation inherited from the source image
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Stored (width, height) in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    /// (width, height) in pixels as displayed
    pub fn display_size(&self) -> PixelTarget {
        let (width, height) = self.dimensions();
        if swaps_axes(self.orientation) {
            PixelTarget::new(height, width)
        } else {
            PixelTarget::new(width, height)
        }
    }

    /// Returns true if this thumbnail was rendered for `target`
    pub fn matches_target(&self, target: PixelTarget) -> bool {
        self.display_size() == target
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.as_bytes().len()
    }

    /// Returns true if both handles share the same pixel buffer
    pub fn ptr_eq(&self, other: &Thumbnail) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Pixels rotated/flipped for display, as 8-bit RGBA
    pub fn to_display_rgba8(&self) -> image::RgbaImage {
        let mut pixels = (*self.pixels).clone();
        pixels.apply_orientation(self.orientation);
        pixels.into_rgba8()
    }
}

/// Something that turns the source image into thumbnails.
///
/// Implementations are called concurrently from every render worker and must
/// not mutate the source.
pub trait ThumbnailRender: Send + Sync {
    /// Render one thumbnail whose displayed size is exactly `target`.
    fn render(
        &self,
        source: &SourceImage,
        target: PixelTarget,
        device_scale: f64,
    ) -> RenderResult<Thumbnail>;
}

/// Crop-and-scale renderer backed by `image::imageops`
#[derive(Debug, Clone)]
pub struct ImageThumbnailRenderer {
    filter: FilterType,
    max_surface_pixels: u64,
}

impl ImageThumbnailRenderer {
    /// Create a renderer with a bilinear filter and the default surface cap
    pub fn new() -> Self {
        Self {
            filter: FilterType::Triangle,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
        }
    }

    /// Set the resampling filter
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Set the largest surface, in pixels, a job may allocate
    pub fn with_max_surface_pixels(mut self, max_surface_pixels: u64) -> Self {
        self.max_surface_pixels = max_surface_pixels;
        self
    }

    /// Largest surface, in pixels, a job may allocate
    pub fn max_surface_pixels(&self) -> u64 {
        self.max_surface_pixels
    }

    /// Check that a surface of `surface` pixels in `color` can be allocated
    fn check_surface(&self, surface: PixelTarget, color: ColorType) -> RenderResult<()> {
        if surface.width == 0 || surface.height == 0 {
            return Err(RenderError::InvalidTarget {
                width: surface.width,
                height: surface.height,
            });
        }
        if surface.pixel_count() > self.max_surface_pixels {
            return Err(RenderError::SurfaceTooLarge {
                width: surface.width,
                height: surface.height,
                limit: self.max_surface_pixels,
            });
        }
        if !is_supported(color) {
            return Err(RenderError::UnsupportedPixelFormat(color));
        }
        Ok(())
    }
}

impl Default for ImageThumbnailRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbnailRender for ImageThumbnailRenderer {
    fn render(
        &self,
        source: &SourceImage,
        target: PixelTarget,
        device_scale: f64,
    ) -> RenderResult<Thumbnail> {
        // Draw in storage orientation; the tag rotates it back for display
        let surface = if swaps_axes(source.orientation()) {
            target.transposed()
        } else {
            target
        };
        self.check_surface(surface, source.color())?;

        let crop = aspect_fill_crop(source.dimensions(), surface);
        let filter = self.filter;
        let drawn = match source.pixels() {
            DynamicImage::ImageLuma8(buffer) => {
                DynamicImage::ImageLuma8(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageLumaA8(buffer) => {
                DynamicImage::ImageLumaA8(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageRgb8(buffer) => {
                DynamicImage::ImageRgb8(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageRgba8(buffer) => {
                DynamicImage::ImageRgba8(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageLuma16(buffer) => {
                DynamicImage::ImageLuma16(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageLumaA16(buffer) => {
                DynamicImage::ImageLumaA16(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageRgb16(buffer) => {
                DynamicImage::ImageRgb16(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageRgba16(buffer) => {
                DynamicImage::ImageRgba16(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageRgb32F(buffer) => {
                DynamicImage::ImageRgb32F(crop_and_scale(buffer, crop, surface, filter))
            }
            DynamicImage::ImageRgba32F(buffer) => {
                DynamicImage::ImageRgba32F(crop_and_scale(buffer, crop, surface, filter))
            }
            other => return Err(RenderError::UnsupportedPixelFormat(other.color())),
        };

        if drawn.width() != surface.width || drawn.height() != surface.height {
            return Err(RenderError::Draw(format!(
                "drew {}x{} into a {}x{} surface",
                drawn.width(),
                drawn.height(),
                surface.width,
                surface.height
            )));
        }

        Ok(Thumbnail::new(drawn, device_scale, source.orientation()))
    }
}

fn is_supported(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8
            | ColorType::La8
            | ColorType::Rgb8
            | ColorType::Rgba8
            | ColorType::L16
            | ColorType::La16
            | ColorType::Rgb16
            | ColorType::Rgba16
            | ColorType::Rgb32F
            | ColorType::Rgba32F
    )
}

/// Scale the `crop` region of `buffer` to `surface` without copying the region first
fn crop_and_scale<P>(
    buffer: &ImageBuffer<P, Vec<P::Subpixel>>,
    crop: (u32, u32, u32, u32),
    surface: PixelTarget,
    filter: FilterType,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (x, y, width, height) = crop;
    let view = imageops::crop_imm(buffer, x, y, width, height);
    imageops::resize(&*view, surface.width, surface.height, filter)
}

/// Centered crop of a `source`-sized image that has the aspect ratio of `surface`.
///
/// Returns (x, y, width, height) in source pixels.
fn aspect_fill_crop(source: (u32, u32), surface: PixelTarget) -> (u32, u32, u32, u32) {
    let (src_w, src_h) = source;
    let src_w_f = f64::from(src_w);
    let src_h_f = f64::from(src_h);
    let surface_aspect = f64::from(surface.width) / f64::from(surface.height);
    let source_aspect = src_w_f / src_h_f;

    if source_aspect > surface_aspect {
        // Source is wider; trim left and right
        let crop_w = (src_h_f * surface_aspect).round().clamp(1.0, src_w_f) as u32;
        ((src_w - crop_w) / 2, 0, crop_w, src_h)
    } else {
        // Source is taller; trim top and bottom
        let crop_h = (src_w_f / surface_aspect).round().clamp(1.0, src_h_f) as u32;
        (0, (src_h - crop_h) / 2, src_w, crop_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Luma, Rgb, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> SourceImage {
        let pixels = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        });
        SourceImage::new(DynamicImage::ImageRgba8(pixels)).unwrap()
    }

    #[test]
    fn test_render_matches_target() {
        let source = gradient(600, 800);
        let renderer = ImageThumbnailRenderer::new();

        let thumbnail = renderer
            .render(&source, PixelTarget::new(288, 384), 3.0)
            .unwrap();

        assert_eq!(thumbnail.dimensions(), (288, 384));
        assert!(thumbnail.matches_target(PixelTarget::new(288, 384)));
        assert_eq!(thumbnail.scale(), 3.0);
        assert_eq!(thumbnail.orientation(), Orientation::NoTransforms);
        assert_eq!(thumbnail.byte_size(), 288 * 384 * 4);
    }

    #[test]
    fn test_render_keeps_pixel_format() {
        let gray = ImageBuffer::from_fn(64, 64, |x, _| Luma([x as u16 * 1000]));
        let source = SourceImage::new(DynamicImage::ImageLuma16(gray)).unwrap();

        let thumbnail = ImageThumbnailRenderer::new()
            .render(&source, PixelTarget::new(16, 16), 1.0)
            .unwrap();

        assert_eq!(thumbnail.pixels().color(), ColorType::L16);

        let rgb = ImageBuffer::from_pixel(32, 32, Rgb([1u8, 2, 3]));
        let source = SourceImage::new(DynamicImage::ImageRgb8(rgb)).unwrap();
        let thumbnail = ImageThumbnailRenderer::new()
            .render(&source, PixelTarget::new(8, 8), 1.0)
            .unwrap();
        assert_eq!(thumbnail.pixels().color(), ColorType::Rgb8);
    }

    #[test]
    fn test_render_scales_crop_in_place() {
        let pixels = ImageBuffer::from_fn(300, 200, |x, y| {
            Rgb([x as u16 * 200, y as u16 * 300, (x + y) as u16 * 100])
        });
        let source = SourceImage::new(DynamicImage::ImageRgb16(pixels)).unwrap();
        let target = PixelTarget::new(40, 40);

        let thumbnail = ImageThumbnailRenderer::new()
            .render(&source, target, 1.0)
            .unwrap();

        // Same result as copying the crop out and resizing the copy
        let (x, y, width, height) = aspect_fill_crop(source.dimensions(), target);
        let copied = source
            .pixels()
            .crop_imm(x, y, width, height)
            .resize_exact(40, 40, FilterType::Triangle);
        assert_eq!(thumbnail.pixels().color(), ColorType::Rgb16);
        assert_eq!(thumbnail.pixels().as_bytes(), copied.as_bytes());
    }

    #[test]
    fn test_render_is_deterministic() {
        let source = gradient(500, 700);
        let renderer = ImageThumbnailRenderer::new();
        let target = PixelTarget::new(96, 128);

        let first = renderer.render(&source, target, 1.0).unwrap();
        let second = renderer.render(&source, target, 1.0).unwrap();

        assert_eq!(first.dimensions(), second.dimensions());
        assert_eq!(first.pixels().as_bytes(), second.pixels().as_bytes());
        assert!(!first.ptr_eq(&second));
    }

    #[test]
    fn test_render_rotated_source_draws_transposed_surface() {
        // Stored landscape, displayed portrait
        let source = gradient(400, 300).with_orientation(Orientation::Rotate90);
        let target = PixelTarget::new(96, 128);

        let thumbnail = ImageThumbnailRenderer::new()
            .render(&source, target, 2.0)
            .unwrap();

        assert_eq!(thumbnail.dimensions(), (128, 96));
        assert_eq!(thumbnail.display_size(), target);
        assert_eq!(thumbnail.orientation(), Orientation::Rotate90);
        assert_eq!(thumbnail.to_display_rgba8().dimensions(), (96, 128));
    }

    #[test]
    fn test_render_rejects_empty_target() {
        let source = gradient(10, 10);
        let result = ImageThumbnailRenderer::new().render(&source, PixelTarget::new(0, 5), 1.0);
        assert_eq!(
            result.unwrap_err(),
            RenderError::InvalidTarget {
                width: 0,
                height: 5
            }
        );
    }

    #[test]
    fn test_render_rejects_oversized_surface() {
        let source = gradient(10, 10);
        let renderer = ImageThumbnailRenderer::new().with_max_surface_pixels(100);

        let result = renderer.render(&source, PixelTarget::new(20, 20), 1.0);
        assert!(matches!(
            result,
            Err(RenderError::SurfaceTooLarge { limit: 100, .. })
        ));
    }

    #[test]
    fn test_source_never_mutated() {
        let source = gradient(120, 90);
        let before = source.pixels().as_bytes().to_vec();

        ImageThumbnailRenderer::new()
            .render(&source, PixelTarget::new(30, 40), 1.0)
            .unwrap();

        assert_eq!(source.pixels().as_bytes(), before.as_slice());
    }

    #[test]
    fn test_aspect_fill_crop_centers() {
        // 4:3 source into a square surface trims the sides
        assert_eq!(
            aspect_fill_crop((400, 300), PixelTarget::new(10, 10)),
            (50, 0, 300, 300)
        );
        // 3:4 source into a square surface trims top and bottom
        assert_eq!(
            aspect_fill_crop((300, 400), PixelTarget::new(10, 10)),
            (0, 50, 300, 300)
        );
        // matching aspect keeps everything
        assert_eq!(
            aspect_fill_crop((300, 400), PixelTarget::new(3, 4)),
            (0, 0, 300, 400)
        );
    }

    #[test]
    fn test_crop_keeps_center_content() {
        // Left and right thirds red, middle third green
        let pixels = RgbaImage::from_fn(300, 100, |x, _| {
            if (100..200).contains(&x) {
                Rgba([0, 255, 0, 255])
            } else {
                Rgba([255, 0, 0, 255])
            }
        });
        let source = SourceImage::new(DynamicImage::ImageRgba8(pixels)).unwrap();

        let thumbnail = ImageThumbnailRenderer::new()
            .with_filter(FilterType::Nearest)
            .render(&source, PixelTarget::new(10, 10), 1.0)
            .unwrap();

        assert_eq!(thumbnail.pixels().get_pixel(5, 5), Rgba([0, 255, 0, 255]));
    }
}
