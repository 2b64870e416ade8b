//! Windowed raster statistics and cross-raster alignment.
//!
//! A query (geometry + CRS + raster ids) is projected into each raster's CRS,
//! resolved to a pixel window, read, masked for nodata and geometry, and
//! reduced to summary statistics or, for two rasters, a paired sample.
pub mod align;
pub mod config;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod geotransform;
pub mod mask;
mod par;
pub mod query;
pub mod raster;
pub mod registry;
pub mod sampler;
pub mod stats;
pub mod window;

pub use align::{CrossRasterAligner, PairedSample, PairedStats, PlotSample};
pub use config::EngineConfig;
pub use crs::{CoordinateProjector, Crs};
pub use error::{ErrorKind, Result, StatsError};
pub use geometry::{Bounds, Geometry, Position};
pub use geotransform::GeoTransform;
pub use mask::{PixelInclusion, SampleArray, ValidityMask};
pub use query::{
    clip, compare, geometry_stats, list_rasters, value_range, window_stats, ClipRequest,
    ClipResult, CompareRequest, CompareResponse, GeometryStatsRequest, GeometryStatsResponse,
    ValueRangeRequest, ValueRangeResponse, WindowStatsRequest, WindowStatsResponse,
};
pub use raster::{GeoTiffRaster, MemoryRaster, RasterHandle, RasterSource};
pub use registry::{FileRegistry, MemoryRegistry, RasterMetadata, RasterRegistry};
pub use sampler::{PercentileSampler, SampledRange, StyleRange};
pub use stats::{Histogram, Reducer, StatisticsReducer, StatsResult, SummaryStats};
pub use window::{Window, WindowResolver};
