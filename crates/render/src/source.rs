//! The shared source image
//!
//! One immutable bitmap, loaded once and read concurrently by every render
//! worker. Pixels are stored as decoded; the orientation tag says how they
//! are meant to be displayed.

use image::metadata::Orientation;
use image::{ColorType, DynamicImage, ImageDecoder, ImageReader};
use std::path::Path;
use thiserror::Error;

/// Errors loading the source image
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("source image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Returns true if displaying with this orientation exchanges width and height.
pub(crate) fn swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

/// Immutable source bitmap shared by all render workers
#[derive(Debug)]
pub struct SourceImage {
    pixels: DynamicImage,
    orientation: Orientation,
}

impl SourceImage {
    /// Wrap decoded pixels. Rejects images with a zero dimension.
    pub fn new(pixels: DynamicImage) -> Result<Self, SourceError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(SourceError::Empty {
                width: pixels.width(),
                height: pixels.height(),
            });
        }

        Ok(Self {
            pixels,
            orientation: Orientation::NoTransforms,
        })
    }

    /// Set the display orientation
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Decode an image file, keeping its pixel format and EXIF orientation.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let mut decoder = ImageReader::open(path.as_ref())?
            .with_guessed_format()?
            .into_decoder()?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let pixels = DynamicImage::from_decoder(decoder)?;

        tracing::debug!(
            path = %path.as_ref().display(),
            width = pixels.width(),
            height = pixels.height(),
            color = ?pixels.color(),
            ?orientation,
            "loaded source image"
        );

        Ok(Self::new(pixels)?.with_orientation(orientation))
    }

    /// Decoded pixels
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Display orientation
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Pixel format of the stored pixels
    pub fn color(&self) -> ColorType {
        self.pixels.color()
    }

    /// Stored (width, height) in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    /// (width, height) as displayed, after applying the orientation
    pub fn display_dimensions(&self) -> (u32, u32) {
        let (width, height) = self.dimensions();
        if swaps_axes(self.orientation) {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Displayed width / height
    pub fn aspect_ratio(&self) -> f64 {
        let (width, height) = self.display_dimensions();
        f64::from(width) / f64::from(height)
    }
}
