//! Query operations: request in, result out. No transport concerns; binding
//! layers serialize the responses and map `StatsError::kind()` to statuses.
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::align::{CrossRasterAligner, PairedStats, PlotSample};
use crate::config::EngineConfig;
use crate::crs::{CoordinateProjector, Crs};
use crate::error::{Result, StatsError};
use crate::geometry::{Bounds, Geometry};
use crate::geotransform::GeoTransform;
use crate::mask::{PixelInclusion, ValidityMask};
use crate::raster::{MemoryRaster, RasterHandle};
use crate::registry::RasterRegistry;
use crate::sampler::{PercentileSampler, SampledRange, StyleRange};
use crate::stats::{HistogramSpec, Reducer, ReducerValue, StatisticsReducer, StatsResult};
use crate::window::{ResolvedWindow, Window, WindowStrategy};

fn default_crs() -> Crs {
    Crs::wgs84()
}

fn inclusion(all_touched: Option<bool>, config: &EngineConfig) -> PixelInclusion {
    all_touched.map_or(config.pixel_inclusion, PixelInclusion::from_all_touched)
}

/// Geometry from the request CRS into the raster's CRS.
fn to_raster_crs(geometry: &Geometry, from: &Crs, raster: &RasterHandle) -> Result<Geometry> {
    CoordinateProjector::new(from, raster.crs())?.project_geometry(geometry)
}

// ── Window statistics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStatsRequest {
    pub raster_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_crs")]
    pub crs: Crs,
    /// Square window of this many pixels around the centre pixel.
    #[serde(default)]
    pub radius_pixels: Option<usize>,
    /// `[min_x, min_y, max_x, max_y]` in `crs`; takes precedence over the radius.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub histogram_bins: Option<usize>,
    #[serde(default)]
    pub histogram_range: Option<(f64, f64)>,
}

impl WindowStatsRequest {
    pub fn new(raster_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            raster_id: raster_id.into(),
            x,
            y,
            crs: Crs::wgs84(),
            radius_pixels: None,
            bbox: None,
            histogram_bins: None,
            histogram_range: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelIndex {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStatsResponse {
    pub raster_id: String,
    pub window: Window,
    pub center_pixel: PixelIndex,
    pub nodata: Option<f64>,
    pub units: Option<String>,
    pub stats: StatsResult,
}

/// Statistics of a pixel window around a point.
pub fn window_stats(
    registry: &dyn RasterRegistry,
    req: &WindowStatsRequest,
    config: &EngineConfig,
) -> Result<WindowStatsResponse> {
    let mut raster = registry.open(&req.raster_id)?;
    let bins = req
        .histogram_bins
        .unwrap_or(config.default_histogram_bins)
        .min(config.max_histogram_bins);
    let reducer = StatisticsReducer::fixed(bins, req.histogram_range)?;
    let projector = CoordinateProjector::new(&req.crs, raster.crs())?;

    let (x, y) = projector.project_point(req.x, req.y)?;
    let (width, height) = (raster.width(), raster.height());
    let (row, col) = raster
        .transform()
        .world_to_pixel(x, y)
        .filter(|&(r, c)| r >= 0 && c >= 0 && (r as usize) < height && (c as usize) < width)
        .ok_or(StatsError::PointOutOfBounds { x: req.x, y: req.y })?;
    let center = PixelIndex { row: row as usize, col: col as usize };

    let resolver = raster.resolver();
    let window = match req.bbox {
        Some(bbox) => {
            let bounds = projector.project_bbox(&Bounds::from_array(bbox), config.bbox_densify_points)?;
            resolver.resolve_bbox(&bounds)?
        }
        None => resolver.resolve_radius(center.row, center.col, req.radius_pixels)?,
    };

    let sample = raster.read(&window)?;
    let nodata = raster.nodata();
    let mask = ValidityMask::build(&sample, nodata, None, config.pixel_inclusion);
    let stats = reducer.reduce_masked(
        &sample.values,
        &mask,
        raster.pixel_area(config.suppress_geographic_area),
    );

    tracing::info!(
        raster_id = %req.raster_id,
        ?window,
        count = stats.summary.count,
        "window stats computed"
    );
    Ok(WindowStatsResponse {
        raster_id: req.raster_id.clone(),
        window,
        center_pixel: center,
        nodata,
        units: raster.units().map(str::to_string),
        stats,
    })
}

// ── Geometry statistics ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryStatsRequest {
    pub raster_id: String,
    pub geometry: Geometry,
    #[serde(default = "default_crs", alias = "from_crs")]
    pub crs: Crs,
    #[serde(default)]
    pub reducer: Reducer,
    /// Fixed bin count; the adaptive rule is used when absent.
    #[serde(default)]
    pub histogram_bins: Option<usize>,
    #[serde(default)]
    pub histogram_range: Option<(f64, f64)>,
    /// Overrides the configured pixel inclusion rule.
    #[serde(default)]
    pub all_touched: Option<bool>,
}

impl GeometryStatsRequest {
    pub fn new(raster_id: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            raster_id: raster_id.into(),
            geometry,
            crs: Crs::wgs84(),
            reducer: Reducer::default(),
            histogram_bins: None,
            histogram_range: None,
            all_touched: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryStatsResponse {
    pub raster_id: String,
    pub reducer: Reducer,
    pub value: ReducerValue,
    pub window: Window,
    pub window_strategy: WindowStrategy,
    pub nodata: Option<f64>,
    pub units: Option<String>,
    pub stats: StatsResult,
    /// The query geometry as received.
    pub geometry: Geometry,
}

/// Zonal statistics of the pixels inside a geometry.
pub fn geometry_stats(
    registry: &dyn RasterRegistry,
    req: &GeometryStatsRequest,
    config: &EngineConfig,
) -> Result<GeometryStatsResponse> {
    let mut raster = registry.open(&req.raster_id)?;
    let reducer = match req.histogram_bins {
        Some(bins) => StatisticsReducer::fixed(bins.min(config.max_histogram_bins), req.histogram_range)?,
        None => StatisticsReducer::new(HistogramSpec::Adaptive { max_bins: config.max_histogram_bins })?,
    };
    let geometry = to_raster_crs(&req.geometry, &req.crs, &raster)?;

    let rule = inclusion(req.all_touched, config);
    let ResolvedWindow { window, strategy } = raster.resolver().resolve(&geometry, rule)?;
    let sample = raster.read(&window)?;
    let nodata = raster.nodata();
    let polygon = geometry.is_areal().then(|| geometry.areal_parts());
    let mask = ValidityMask::build(&sample, nodata, polygon.as_ref(), rule);
    // Area in squared CRS units, also for geographic rasters.
    let stats = reducer.reduce_masked(&sample.values, &mask, raster.transform().pixel_area());

    tracing::info!(
        raster_id = %req.raster_id,
        geometry = %req.geometry.digest(),
        ?window,
        ?strategy,
        count = stats.summary.count,
        "geometry stats computed"
    );
    Ok(GeometryStatsResponse {
        raster_id: req.raster_id.clone(),
        reducer: req.reducer,
        value: req.reducer.select(&stats),
        window,
        window_strategy: strategy,
        nodata,
        units: raster.units().map(str::to_string),
        stats,
        geometry: req.geometry.clone(),
    })
}

// ── Two-raster comparison ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareRequest {
    /// Reference raster; pairs live on its grid.
    pub raster_a: String,
    pub raster_b: String,
    pub geometry: Geometry,
    #[serde(default = "default_crs", alias = "from_crs")]
    pub crs: Crs,
    #[serde(default)]
    pub max_points: Option<usize>,
    #[serde(default)]
    pub all_touched: Option<bool>,
}

impl CompareRequest {
    pub fn new(raster_a: impl Into<String>, raster_b: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            raster_a: raster_a.into(),
            raster_b: raster_b.into(),
            geometry,
            crs: Crs::wgs84(),
            max_points: None,
            all_touched: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResponse {
    pub raster_a: String,
    pub raster_b: String,
    pub units_a: Option<String>,
    pub units_b: Option<String>,
    pub window: Option<Window>,
    pub masked_pixels: usize,
    pub coverage_ratio: f64,
    /// Over the full paired sample.
    pub stats: PairedStats,
    /// Capped at `max_points` for plotting.
    pub sample: PlotSample,
}

/// Co-variation of two rasters over a geometry.
pub fn compare(
    registry: &dyn RasterRegistry,
    req: &CompareRequest,
    config: &EngineConfig,
) -> Result<CompareResponse> {
    let max_points = req.max_points.unwrap_or(config.max_points);
    if max_points == 0 {
        return Err(StatsError::InvalidArgument("max_points must be at least 1".into()));
    }
    let mut a = registry.open(&req.raster_a)?;
    let mut b = registry.open(&req.raster_b)?;
    let geometry = to_raster_crs(&req.geometry, &req.crs, &a)?;

    let aligner = CrossRasterAligner::new(inclusion(req.all_touched, config), config.bbox_densify_points);
    let paired = aligner.align(&mut a, &mut b, &geometry)?;
    let stats = PairedStats::compute(&paired, config.joint_histogram_bins);
    let sample = paired.subsample(max_points, config.subsample_seed);

    tracing::info!(
        raster_a = %req.raster_a,
        raster_b = %req.raster_b,
        geometry = %req.geometry.digest(),
        n = stats.n,
        subsampled = sample.subsampled,
        "comparison computed"
    );
    Ok(CompareResponse {
        raster_a: req.raster_a.clone(),
        raster_b: req.raster_b.clone(),
        units_a: a.units().map(str::to_string),
        units_b: b.units().map(str::to_string),
        window: paired.window,
        masked_pixels: paired.masked_pixels,
        coverage_ratio: paired.coverage_ratio(),
        stats,
        sample,
    })
}

// ── Value range ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueRangeRequest {
    pub raster_id: String,
    #[serde(default)]
    pub samples: Option<usize>,
    #[serde(default)]
    pub frac: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueRangeResponse {
    pub raster_id: String,
    pub units: Option<String>,
    pub sampled: SampledRange,
    pub style: StyleRange,
}

/// Approximate 5th–95th percentile range for styling.
pub fn value_range(
    registry: &dyn RasterRegistry,
    req: &ValueRangeRequest,
    config: &EngineConfig,
) -> Result<ValueRangeResponse> {
    let sampler = PercentileSampler::new(
        req.samples.unwrap_or(config.percentile_samples),
        req.frac.unwrap_or(config.percentile_fraction),
    )?;
    let mut raster = registry.open(&req.raster_id)?;
    let mut rng = StdRng::seed_from_u64(req.seed.unwrap_or(config.subsample_seed));
    let sampled = sampler.sample(&mut raster, &mut rng)?;
    let style = StyleRange::from_sampled(&sampled);
    tracing::info!(raster_id = %req.raster_id, min = style.min, max = style.max, "value range sampled");
    Ok(ValueRangeResponse {
        raster_id: req.raster_id.clone(),
        units: raster.units().map(str::to_string),
        sampled,
        style,
    })
}

/// Registered raster ids.
pub fn list_rasters(registry: &dyn RasterRegistry) -> Vec<String> {
    registry.ids()
}

// ── Clip ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipRequest {
    pub raster_id: String,
    pub geometry: Geometry,
    #[serde(default = "default_crs", alias = "from_crs")]
    pub crs: Crs,
    #[serde(default)]
    pub all_touched: Option<bool>,
}

/// Window subset of a raster with pixels outside the geometry (or invalid)
/// set to nodata, or NaN when the raster has none.
#[derive(Debug, Clone)]
pub struct ClipResult {
    pub raster_id: String,
    pub window: Window,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
    pub values: Vec<f64>,
    pub valid_pixels: usize,
}

impl ClipResult {
    pub fn into_raster(self) -> Result<MemoryRaster> {
        Ok(MemoryRaster::new(
            self.window.width,
            self.window.height,
            self.values,
            self.transform,
            self.crs,
        )?
        .with_nodata(self.nodata))
    }
}

pub fn clip(registry: &dyn RasterRegistry, req: &ClipRequest, config: &EngineConfig) -> Result<ClipResult> {
    let mut raster = registry.open(&req.raster_id)?;
    let geometry = to_raster_crs(&req.geometry, &req.crs, &raster)?;
    let rule = inclusion(req.all_touched, config);
    let ResolvedWindow { window, .. } = raster.resolver().resolve(&geometry, rule)?;
    let sample = raster.read(&window)?;
    let nodata = raster.nodata();
    let polygon = geometry.is_areal().then(|| geometry.areal_parts());
    let mask = ValidityMask::build(&sample, nodata, polygon.as_ref(), rule);

    tracing::info!(raster_id = %req.raster_id, ?window, valid = mask.valid_count(), "clip prepared");
    Ok(ClipResult {
        raster_id: req.raster_id.clone(),
        window,
        transform: sample.transform,
        crs: raster.crs().clone(),
        nodata,
        values: mask.apply(&sample.values, nodata.unwrap_or(f64::NAN)),
        valid_pixels: mask.valid_count(),
    })
}
