//! Pipeline configuration
//!
//! Settings are layered, later sources overriding earlier ones:
//! built-in defaults, then a TOML file, then `GRIDTHUMB_*` environment
//! variables. Command-line flags are applied on top by the binary.

use gridthumb_render::DEFAULT_MAX_SURFACE_PIXELS;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable overriding [`PipelineConfig::column_count`]
pub const ENV_COLUMNS: &str = "GRIDTHUMB_COLUMNS";
/// Environment variable overriding [`PipelineConfig::spacing`]
pub const ENV_SPACING: &str = "GRIDTHUMB_SPACING";
/// Environment variable overriding [`PipelineConfig::device_scale`]
pub const ENV_SCALE: &str = "GRIDTHUMB_SCALE";
/// Environment variable overriding [`PipelineConfig::cache_mb`]
pub const ENV_CACHE_MB: &str = "GRIDTHUMB_CACHE_MB";
/// Environment variable overriding [`PipelineConfig::workers`]
pub const ENV_WORKERS: &str = "GRIDTHUMB_WORKERS";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment variable could not be parsed
    #[error("{key} has an invalid value {value:?}")]
    InvalidValue { key: String, value: String },

    /// A setting is out of range
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for a thumbnail pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Number of grid columns
    pub column_count: u32,

    /// Gap between adjacent tiles, in points
    pub spacing: f64,

    /// Physical pixels per point
    pub device_scale: f64,

    /// Width / height of the source image as displayed.
    /// `None` derives it from the source image.
    pub aspect_ratio: Option<f64>,

    /// Number of cells in the grid
    pub item_count: usize,

    /// Render worker threads. `None` uses one per logical core.
    pub workers: Option<usize>,

    /// Soft memory limit of the thumbnail cache, in megabytes
    pub cache_mb: usize,

    /// Largest surface a single render may allocate, in pixels
    pub max_surface_pixels: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            column_count: 4,
            spacing: 2.0,
            device_scale: 1.0,
            aspect_ratio: None,
            item_count: 10_000,
            workers: None,
            cache_mb: 128,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overridden by `path` (if given) and then by the environment.
    ///
    /// The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file. Missing keys keep their defaults.
    ///
    /// ```toml
    /// column_count = 4
    /// spacing = 2.0
    /// device_scale = 3.0
    /// cache_mb = 64
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `GRIDTHUMB_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(columns) = parse_override(&lookup, ENV_COLUMNS)? {
            self.column_count = columns;
        }
        if let Some(spacing) = parse_override(&lookup, ENV_SPACING)? {
            self.spacing = spacing;
        }
        if let Some(scale) = parse_override(&lookup, ENV_SCALE)? {
            self.device_scale = scale;
        }
        if let Some(cache_mb) = parse_override(&lookup, ENV_CACHE_MB)? {
            self.cache_mb = cache_mb;
        }
        if let Some(workers) = parse_override(&lookup, ENV_WORKERS)? {
            self.workers = Some(workers);
        }
        Ok(())
    }

    /// Reject settings no grid can be laid out with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.column_count == 0 {
            return Err(invalid("column_count", "must be at least 1"));
        }
        if !self.spacing.is_finite() || self.spacing < 0.0 {
            return Err(invalid(
                "spacing",
                format!("must be non-negative, got {}", self.spacing),
            ));
        }
        if !self.device_scale.is_finite() || self.device_scale < 1.0 {
            return Err(invalid(
                "device_scale",
                format!("must be at least 1, got {}", self.device_scale),
            ));
        }
        if let Some(aspect) = self.aspect_ratio {
            if !aspect.is_finite() || aspect <= 0.0 {
                return Err(invalid(
                    "aspect_ratio",
                    format!("must be positive, got {aspect}"),
                ));
            }
        }
        if self.workers == Some(0) {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.max_surface_pixels == 0 {
            return Err(invalid("max_surface_pixels", "must be positive"));
        }
        Ok(())
    }

    /// Cache limit in bytes
    pub fn cache_bytes(&self) -> usize {
        self.cache_mb.saturating_mul(1024 * 1024)
    }

    /// Set the column count
    pub fn with_columns(mut self, column_count: u32) -> Self {
        self.column_count = column_count;
        self
    }

    /// Set the tile spacing
    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    /// Set the device scale
    pub fn with_device_scale(mut self, device_scale: f64) -> Self {
        self.device_scale = device_scale;
        self
    }

    /// Fix the source aspect ratio instead of deriving it from the image
    pub fn with_aspect_ratio(mut self, aspect_ratio: f64) -> Self {
        self.aspect_ratio = Some(aspect_ratio);
        self
    }

    /// Set the number of grid cells
    pub fn with_item_count(mut self, item_count: usize) -> Self {
        self.item_count = item_count;
        self
    }

    /// Set the number of render workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the cache limit in megabytes
    pub fn with_cache_mb(mut self, cache_mb: usize) -> Self {
        self.cache_mb = cache_mb;
        self
    }

    /// Set the largest surface a render may allocate
    pub fn with_max_surface_pixels(mut self, max_surface_pixels: u64) -> Self {
        self.max_surface_pixels = max_surface_pixels;
        self
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        })
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
