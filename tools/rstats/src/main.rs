//! rstats CLI: raster statistics queries against a JSON raster registry.
//!
//! Every query prints one JSON document on stdout. Logs go to stderr and are
//! filtered with `RUST_LOG` (default `info`).
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rstats_core::query::{ClipRequest, ValueRangeRequest};
use rstats_core::raster::write_geotiff;
use rstats_core::{
    CompareRequest, Crs, EngineConfig, ErrorKind, FileRegistry, Geometry, GeometryStatsRequest,
    Reducer, StatsError, WindowStatsRequest,
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rstats", about = "Windowed raster statistics and raster comparison", long_about = None)]
struct Cli {
    /// Raster registry JSON (`{"layers": {id: {file_path, nodata, units, crs}}}`)
    #[arg(short, long, global = true, default_value = "rasters.json")]
    registry: PathBuf,

    /// Engine configuration JSON; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered raster ids
    List,

    /// Statistics of a square window or bounding box around a point
    Window {
        #[arg(long)]
        raster: String,
        #[arg(long, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, allow_negative_numbers = true)]
        y: f64,
        /// CRS of the point and bbox
        #[arg(long, default_value = "EPSG:4326")]
        crs: Crs,
        /// Half-size of the square window in pixels
        #[arg(long, conflicts_with = "bbox")]
        radius: Option<usize>,
        /// Bounding box min_x,min_y,max_x,max_y
        #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true)]
        bbox: Option<Vec<f64>>,
        /// Histogram bin count
        #[arg(long)]
        bins: Option<usize>,
        /// Histogram range lo,hi
        #[arg(long, value_delimiter = ',', num_args = 2, allow_negative_numbers = true)]
        range: Option<Vec<f64>>,
    },

    /// Statistics of the pixels covered by a GeoJSON geometry
    Geometry {
        #[arg(long)]
        raster: String,
        /// GeoJSON geometry, inline or a file path
        #[arg(long)]
        geometry: String,
        #[arg(long, default_value = "EPSG:4326")]
        crs: Crs,
        /// mean | median | min | max | sum | std | count | histogram
        #[arg(long, default_value = "mean")]
        reducer: Reducer,
        /// Fixed histogram bin count instead of the adaptive rule
        #[arg(long)]
        bins: Option<usize>,
        /// Include every pixel the geometry touches
        #[arg(long)]
        all_touched: bool,
    },

    /// Pixel-paired comparison of two rasters inside a geometry
    Compare {
        /// Reference raster; pairs live on its grid
        #[arg(long)]
        a: String,
        #[arg(long)]
        b: String,
        #[arg(long)]
        geometry: String,
        #[arg(long, default_value = "EPSG:4326")]
        crs: Crs,
        /// Cap on the plotting sample
        #[arg(long)]
        max_points: Option<usize>,
        #[arg(long)]
        all_touched: bool,
    },

    /// Approximate display range from random sub-windows
    Range {
        #[arg(long)]
        raster: String,
        #[arg(long)]
        samples: Option<usize>,
        /// Sub-window size as a fraction of the raster, in (0, 1]
        #[arg(long)]
        frac: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write the pixels covered by a geometry to a GeoTIFF
    Clip {
        #[arg(long)]
        raster: String,
        #[arg(long)]
        geometry: String,
        #[arg(long, default_value = "EPSG:4326")]
        crs: Crs,
        #[arg(long)]
        all_touched: bool,
        /// Output GeoTIFF path
        #[arg(short, long)]
        output: PathBuf,
    },
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 2 bad query, 3 unknown raster, 4 unreadable data, 1 anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<StatsError>().map(StatsError::kind) {
        Some(ErrorKind::ClientInput) => 2,
        Some(ErrorKind::NotFound) => 3,
        Some(ErrorKind::DataError) => 4,
        Some(ErrorKind::Internal) | None => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let registry = FileRegistry::from_file(&cli.registry)?;

    match cli.command {
        Commands::List => print_json(&rstats_core::list_rasters(&registry)),

        Commands::Window { raster, x, y, crs, radius, bbox, bins, range } => {
            let mut req = WindowStatsRequest::new(raster, x, y);
            req.crs = crs;
            req.radius_pixels = radius;
            req.bbox = bbox.map(|b| [b[0], b[1], b[2], b[3]]);
            req.histogram_bins = bins;
            req.histogram_range = range.map(|r| (r[0], r[1]));
            print_json(&rstats_core::window_stats(&registry, &req, &config)?)
        }

        Commands::Geometry { raster, geometry, crs, reducer, bins, all_touched } => {
            let mut req = GeometryStatsRequest::new(raster, load_geometry(&geometry)?);
            req.crs = crs;
            req.reducer = reducer;
            req.histogram_bins = bins;
            req.all_touched = all_touched.then_some(true);
            print_json(&rstats_core::geometry_stats(&registry, &req, &config)?)
        }

        Commands::Compare { a, b, geometry, crs, max_points, all_touched } => {
            let mut req = CompareRequest::new(a, b, load_geometry(&geometry)?);
            req.crs = crs;
            req.max_points = max_points;
            req.all_touched = all_touched.then_some(true);
            print_json(&rstats_core::compare(&registry, &req, &config)?)
        }

        Commands::Range { raster, samples, frac, seed } => {
            let req = ValueRangeRequest { raster_id: raster, samples, frac, seed };
            print_json(&rstats_core::value_range(&registry, &req, &config)?)
        }

        Commands::Clip { raster, geometry, crs, all_touched, output } => {
            let req = ClipRequest {
                raster_id: raster,
                geometry: load_geometry(&geometry)?,
                crs,
                all_touched: all_touched.then_some(true),
            };
            let clipped = rstats_core::clip(&registry, &req, &config)?;
            let summary = ClipSummary {
                raster_id: clipped.raster_id.clone(),
                output: output.display().to_string(),
                width: clipped.window.width,
                height: clipped.window.height,
                valid_pixels: clipped.valid_pixels,
            };
            write_clip(clipped.into_raster()?, &output)?;
            print_json(&summary)
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ClipSummary {
    raster_id: String,
    output: String,
    width: usize,
    height: usize,
    valid_pixels: usize,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value).context("Failed to serialize response")?;
    writeln!(out)?;
    Ok(())
}

/// Inline GeoJSON when the argument looks like an object, else a file path.
fn load_geometry(arg: &str) -> Result<Geometry> {
    let text = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("Failed to read geometry {arg}"))?
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("Geometry is not valid JSON")?;
    // Accept a bare geometry, a Feature, or a single-feature FeatureCollection.
    let geometry = match value.get("type").and_then(|t| t.as_str()) {
        Some("Feature") => value.get("geometry").cloned(),
        Some("FeatureCollection") => value
            .get("features")
            .and_then(|f| f.get(0))
            .and_then(|f| f.get("geometry"))
            .cloned(),
        _ => Some(value),
    }
    .context("GeoJSON has no geometry")?;
    serde_json::from_value(geometry)
        .map_err(|e| StatsError::InvalidArgument(format!("invalid geometry: {e}")).into())
}

/// Write through a temp file in the destination directory so a failed write
/// never leaves a partial GeoTIFF behind.
fn write_clip(raster: rstats_core::MemoryRaster, output: &Path) -> Result<()> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    write_geotiff(tmp.as_file_mut(), &raster, None)?;
    tmp.persist(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!(path = %output.display(), "clip written");
    Ok(())
}
