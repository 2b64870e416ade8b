//! Raster storage backends and the per-query raster handle.
pub mod geotiff;
pub mod memory;

pub use geotiff::{write_geotiff, GeoTiffRaster};
pub use memory::MemoryRaster;

use crate::crs::Crs;
use crate::error::{Result, StatsError};
use crate::geometry::Bounds;
use crate::geotransform::GeoTransform;
use crate::mask::SampleArray;
use crate::registry::RasterMetadata;
use crate::window::{Window, WindowResolver};

/// Minimal contract a storage backend must satisfy: grid shape,
/// georeferencing, nodata and a window read of band 1.
pub trait RasterSource: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn transform(&self) -> GeoTransform;
    fn crs(&self) -> &Crs;
    fn nodata(&self) -> Option<f64>;
    /// Row-major values of `window`, which lies inside the grid.
    fn read_window(&mut self, window: &Window) -> Result<Vec<f64>>;
}

/// An opened raster plus its registry entry. Opened per query, never shared.
pub struct RasterHandle {
    metadata: RasterMetadata,
    source: Box<dyn RasterSource>,
}

impl RasterHandle {
    pub fn new(metadata: RasterMetadata, source: Box<dyn RasterSource>) -> Self {
        Self { metadata, source }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    pub fn units(&self) -> Option<&str> {
        self.metadata.units.as_deref()
    }

    pub fn width(&self) -> usize {
        self.source.width()
    }

    pub fn height(&self) -> usize {
        self.source.height()
    }

    pub fn transform(&self) -> GeoTransform {
        self.source.transform()
    }

    pub fn crs(&self) -> &Crs {
        self.source.crs()
    }

    /// Registry override if set, else the file's own nodata.
    pub fn nodata(&self) -> Option<f64> {
        self.metadata.nodata.or_else(|| self.source.nodata())
    }

    pub fn full_window(&self) -> Window {
        Window::full(self.width(), self.height())
    }

    /// World-space extent of the whole grid.
    pub fn bounds(&self) -> Bounds {
        self.transform().window_bounds(&self.full_window())
    }

    pub fn resolver(&self) -> WindowResolver {
        WindowResolver::new(self.width(), self.height(), self.transform())
    }

    /// Per-pixel area in squared CRS units, `None` for degenerate grids and,
    /// when `suppress_geographic` is set, for degree-based CRSs.
    pub fn pixel_area(&self, suppress_geographic: bool) -> Option<f64> {
        if suppress_geographic && self.crs().is_geographic() {
            return None;
        }
        self.transform().pixel_area()
    }

    pub fn read(&mut self, window: &Window) -> Result<SampleArray> {
        if window.is_empty() {
            return Err(StatsError::window_empty(self.width(), self.height()));
        }
        if !window.fits(self.width(), self.height()) {
            return Err(StatsError::computation(
                self.id(),
                Some(window),
                None,
                format!("window exceeds {}x{} grid", self.width(), self.height()),
            ));
        }
        tracing::debug!(raster_id = self.id(), ?window, pixels = window.pixel_count(), "reading window");
        let values = self.source.read_window(window)?;
        SampleArray::new(*window, self.transform().window_transform(window), values)
            .map_err(|e| StatsError::computation(self.id(), Some(window), None, e))
    }
}

impl std::fmt::Debug for RasterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterHandle")
            .field("id", &self.metadata.id)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("crs", &self.crs().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(nodata_override: Option<f64>, crs: &str) -> RasterHandle {
        let source = MemoryRaster::from_fn(4, 3, GeoTransform::north_up(100.0, 30.0, 10.0, -10.0), crs.parse().unwrap(), |r, c| (r * 4 + c) as f64)
            .with_nodata(Some(0.0));
        let mut meta = RasterMetadata::new("t", "/mem/t");
        meta.nodata = nodata_override;
        RasterHandle::new(meta, Box::new(source))
    }

    #[test]
    fn nodata_override_wins() {
        assert_eq!(handle(None, "EPSG:32633").nodata(), Some(0.0));
        assert_eq!(handle(Some(-1.0), "EPSG:32633").nodata(), Some(-1.0));
    }

    #[test]
    fn read_returns_window_frame() {
        let mut h = handle(None, "EPSG:32633");
        let s = h.read(&Window::new(1, 1, 2, 2)).unwrap();
        assert_eq!(s.values, vec![5.0, 6.0, 9.0, 10.0]);
        assert_eq!(s.transform.apply(0.0, 0.0), (110.0, 20.0));
        assert!(h.read(&Window::new(3, 0, 2, 1)).is_err());
        assert!(matches!(h.read(&Window::new(0, 0, 0, 1)), Err(StatsError::WindowEmpty(_))));
    }

    #[test]
    fn geographic_area_can_be_suppressed() {
        assert_eq!(handle(None, "EPSG:32633").pixel_area(true), Some(100.0));
        assert_eq!(handle(None, "EPSG:4326").pixel_area(true), None);
        assert_eq!(handle(None, "EPSG:4326").pixel_area(false), Some(100.0));
    }

    #[test]
    fn bounds_cover_grid() {
        let b = handle(None, "EPSG:32633").bounds();
        assert_eq!(b.to_array(), [100.0, 0.0, 140.0, 30.0]);
    }
}
