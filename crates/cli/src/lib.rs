use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gridthumb_core::{GridCell, PipelineConfig, ThumbnailPipeline};
use gridthumb_render::{PixelTarget, SourceImage, TileGeometry};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "gridthumb")]
#[command(about = "Thumbnail grid renderer")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show a range of grid cells and render their thumbnails.
    Render {
        #[arg(long, value_name = "IMAGE")]
        source: PathBuf,
        #[arg(long)]
        viewport_width: f64,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Number of grid cells.
        #[arg(long)]
        items: Option<usize>,
        /// Cells that become visible, as `start..end`.
        #[arg(long, value_parser = parse_range, default_value = "0..24")]
        visible: Range<usize>,
        /// Cells after the visible range to prefetch.
        #[arg(long, default_value_t = 0)]
        prefetch: usize,
        /// Directory to write PNG thumbnails into.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Print tile side and pixel target for a viewport.
    Geometry {
        #[arg(long)]
        viewport_width: f64,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Source width / height.
        #[arg(long)]
        aspect: Option<f64>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct LayoutArgs {
    #[arg(long)]
    columns: Option<u32>,
    #[arg(long)]
    spacing: Option<f64>,
    /// Device pixels per point.
    #[arg(long)]
    scale: Option<f64>,
    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl LayoutArgs {
    /// File and environment settings with these flags on top
    fn load(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;

        if let Some(columns) = self.columns {
            config.column_count = columns;
        }
        if let Some(spacing) = self.spacing {
            config.spacing = spacing;
        }
        if let Some(scale) = self.scale {
            config.device_scale = scale;
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct GeometryOutput {
    viewport_width: f64,
    columns: u32,
    spacing: f64,
    device_scale: f64,
    aspect_ratio: f64,
    tile_side: u32,
    pixel_target: TargetOutput,
}

#[derive(Debug, Serialize)]
struct TargetOutput {
    width: u32,
    height: u32,
}

impl From<PixelTarget> for TargetOutput {
    fn from(target: PixelTarget) -> Self {
        Self {
            width: target.width,
            height: target.height,
        }
    }
}

#[derive(Debug, Serialize)]
struct RenderOutput {
    source: String,
    geometry: GeometryOutput,
    requested: usize,
    bound: usize,
    failed: usize,
    prefetched: usize,
    written: usize,
    cache: CacheOutput,
}

#[derive(Debug, Serialize)]
struct CacheOutput {
    entries: usize,
    memory_used: usize,
    memory_limit: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    hit_rate: f64,
    pressure: String,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Render {
            source,
            viewport_width,
            layout,
            items,
            visible,
            prefetch,
            output,
            timeout_secs,
        } => {
            let mut config = layout.load()?;
            if let Some(items) = items {
                config.item_count = items;
            }
            let options = RenderOptions {
                viewport_width,
                visible,
                prefetch,
                output,
                timeout: Duration::from_secs(timeout_secs),
            };
            run_render(&source, config, &options)
        }
        Commands::Geometry {
            viewport_width,
            layout,
            aspect,
        } => {
            let mut config = layout.load()?;
            if aspect.is_some() {
                config.aspect_ratio = aspect;
            }
            run_geometry(viewport_width, &config)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

struct RenderOptions {
    viewport_width: f64,
    visible: Range<usize>,
    prefetch: usize,
    output: Option<PathBuf>,
    timeout: Duration,
}

fn run_geometry(viewport_width: f64, config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    let aspect_ratio = config.aspect_ratio.unwrap_or(1.0);

    let geometry = TileGeometry::compute(
        viewport_width,
        config.column_count,
        config.spacing,
        config.device_scale,
        aspect_ratio,
    )
    .context("invalid grid geometry")?;

    print_json(&geometry_output(&geometry, config, aspect_ratio))
}

fn run_render(source_path: &Path, config: PipelineConfig, options: &RenderOptions) -> Result<()> {
    config.validate()?;
    ensure_file_exists(source_path)?;

    let source = SourceImage::open(source_path)
        .with_context(|| format!("failed to load {}", source_path.display()))?;
    let aspect_ratio = config.aspect_ratio.unwrap_or_else(|| source.aspect_ratio());

    let pipeline = ThumbnailPipeline::new(Arc::new(source), &config);
    let update = pipeline
        .viewport_did_change(options.viewport_width)
        .context("invalid grid geometry")?;

    let visible = options.visible.start..options.visible.end.min(config.item_count);
    let cells: Vec<(usize, GridCell)> = visible.clone().map(|index| (index, GridCell::new())).collect();
    for (index, cell) in &cells {
        pipeline
            .on_cell_will_display(*index, cell)
            .with_context(|| format!("failed to request thumbnail {index}"))?;
    }

    let prefetch_end = visible.end.saturating_add(options.prefetch);
    let prefetched = pipeline.prefetch(visible.end..prefetch_end)?;

    if !pipeline.run_until_idle(options.timeout) {
        anyhow::bail!("timed out after {:?} waiting for thumbnails", options.timeout);
    }

    let bound = cells.iter().filter(|(_, cell)| cell.is_filled()).count();
    let failed = cells.len() - bound;
    if failed > 0 {
        warn!(failed, "some thumbnails could not be rendered");
    }

    let written = match &options.output {
        Some(dir) => write_thumbnails(dir, &cells)?,
        None => 0,
    };

    let stats = pipeline.stats().cache;
    let payload = RenderOutput {
        source: source_path.display().to_string(),
        geometry: geometry_output(&update.change.geometry(), &config, aspect_ratio),
        requested: cells.len(),
        bound,
        failed,
        prefetched,
        written,
        cache: CacheOutput {
            entries: stats.entry_count,
            memory_used: stats.memory_used,
            memory_limit: stats.memory_limit,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            hit_rate: stats.hit_rate(),
            pressure: format!("{:?}", stats.pressure).to_lowercase(),
        },
    };

    pipeline.shutdown();
    print_json(&payload)
}

fn write_thumbnails(dir: &Path, cells: &[(usize, GridCell)]) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut written = 0;
    for (index, cell) in cells {
        let Some(thumbnail) = cell.thumbnail() else {
            continue;
        };
        let path = dir.join(format!("thumb-{index:05}.png"));
        thumbnail
            .to_display_rgba8()
            .save(&path)
            .with_context(|| format!("failed to write image to {}", path.display()))?;
        debug!(path = %path.display(), "wrote thumbnail");
        written += 1;
    }
    Ok(written)
}

fn geometry_output(
    geometry: &TileGeometry,
    config: &PipelineConfig,
    aspect_ratio: f64,
) -> GeometryOutput {
    GeometryOutput {
        viewport_width: geometry.viewport_width,
        columns: config.column_count,
        spacing: config.spacing,
        device_scale: config.device_scale,
        aspect_ratio,
        tile_side: geometry.tile_side,
        pixel_target: geometry.pixel_target.into(),
    }
}

fn print_json<T: Serialize>(payload: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    println!("{json}");
    Ok(())
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn parse_range(value: &str) -> Result<Range<usize>, String> {
    let (start, end) = value
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {value:?}"))?;
    let start: usize = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid range start {start:?}"))?;
    let end: usize = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid range end {end:?}"))?;
    if end < start {
        return Err(format!("range end {end} is before start {start}"));
    }
    Ok(start..end)
}
