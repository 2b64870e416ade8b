//! Integer pixel windows and the geometry → window fallback ladder.
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::geometry::{Bounds, Geometry};
use crate::geotransform::GeoTransform;
use crate::mask::PixelInclusion;

/// Rectangular, integer-aligned sub-region of a raster grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    /// The whole grid.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    /// True when the window lies inside a `width × height` grid.
    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.col_end() <= width && self.row_end() <= height
    }

    /// Overlap with another window; `None` when they do not share a pixel.
    pub fn intersection(&self, other: &Window) -> Option<Window> {
        let c0 = self.col_off.max(other.col_off);
        let r0 = self.row_off.max(other.row_off);
        let c1 = self.col_end().min(other.col_end());
        let r1 = self.row_end().min(other.row_end());
        (c1 > c0 && r1 > r0).then(|| Window::new(c0, r0, c1 - c0, r1 - r0))
    }
}

/// Which rung of the fallback ladder produced a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Pixels enclosing the geometry bounds.
    Exact,
    /// Bounds padded by half a pixel (points, lines, sliver polygons).
    Padded,
    /// Single pixel under the centroid.
    Centroid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedWindow {
    pub window: Window,
    pub strategy: WindowStrategy,
}

/// Turns query shapes into clamped windows on one raster grid.
#[derive(Debug, Clone, Copy)]
pub struct WindowResolver {
    width: usize,
    height: usize,
    transform: GeoTransform,
}

impl WindowResolver {
    pub fn new(width: usize, height: usize, transform: GeoTransform) -> Self {
        Self { width, height, transform }
    }

    fn empty(&self) -> StatsError {
        StatsError::window_empty(self.width, self.height)
    }

    /// Fractional pixel extent (col_min, row_min, col_max, row_max) of a
    /// world-space box, from all four corners so rotated grids are covered.
    fn pixel_extent(&self, bounds: &Bounds) -> Option<(f64, f64, f64, f64)> {
        let inv = self.transform.inverse()?;
        let mut ext = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in bounds.corners() {
            let (col, row) = inv.apply(x, y);
            ext.0 = ext.0.min(col);
            ext.1 = ext.1.min(row);
            ext.2 = ext.2.max(col);
            ext.3 = ext.3.max(row);
        }
        (ext.0.is_finite() && ext.1.is_finite() && ext.2.is_finite() && ext.3.is_finite())
            .then_some(ext)
    }

    /// Snap a fractional extent to whole pixels and clamp to the raster.
    /// `Center` keeps pixels whose centre lies in `[min, max)`; `AllTouched`
    /// keeps every pixel the extent overlaps. `None` when nothing of nonzero
    /// area is left.
    fn clamp_extent(
        &self,
        (c0, r0, c1, r1): (f64, f64, f64, f64),
        inclusion: PixelInclusion,
    ) -> Option<Window> {
        let start = |v: f64| match inclusion {
            PixelInclusion::Center => (v - 0.5).ceil(),
            PixelInclusion::AllTouched => v.floor(),
        };
        let end = |v: f64| match inclusion {
            PixelInclusion::Center => (v - 0.5).ceil(),
            PixelInclusion::AllTouched => v.ceil(),
        };
        let clamp = |v: f64, max: usize| v.clamp(0.0, max as f64) as usize;
        let col_off = clamp(start(c0), self.width);
        let col_end = clamp(end(c1), self.width);
        let row_off = clamp(start(r0), self.height);
        let row_end = clamp(end(r1), self.height);
        (col_end > col_off && row_end > row_off)
            .then(|| Window::new(col_off, row_off, col_end - col_off, row_end - row_off))
    }

    fn half_pixel_pad(&self, bounds: &Bounds) -> Bounds {
        let (px, py) = self.transform.resolution();
        bounds.pad(px / 2.0, py / 2.0)
    }

    /// Window for an arbitrary geometry already in the raster CRS. The
    /// inclusion rule decides how partially covered edge pixels are snapped.
    pub fn resolve(&self, geometry: &Geometry, inclusion: PixelInclusion) -> Result<ResolvedWindow> {
        let bounds = geometry
            .bounds()
            .ok_or_else(|| StatsError::InvalidArgument("geometry has no coordinates".into()))?;
        let centroid = geometry.centroid().unwrap_or_else(|| bounds.center());
        self.resolve_bounds(&bounds, centroid, inclusion)
    }

    /// Fallback ladder over geometry bounds: exact → half-pixel padding →
    /// centroid pixel. Bounds that do not meet the raster extent (closed
    /// test) are `WindowEmpty` before any fallback is tried.
    pub fn resolve_bounds(
        &self,
        bounds: &Bounds,
        centroid: (f64, f64),
        inclusion: PixelInclusion,
    ) -> Result<ResolvedWindow> {
        if self.width == 0 || self.height == 0 || !bounds.is_finite() {
            return Err(self.empty());
        }

        let exact = self.pixel_extent(bounds).ok_or_else(|| {
            StatsError::WindowEmpty("raster transform is not invertible".into())
        })?;
        let (c0, r0, c1, r1) = exact;
        if c1 < 0.0 || r1 < 0.0 || c0 > self.width as f64 || r0 > self.height as f64 {
            tracing::debug!(?bounds, "geometry outside raster extent");
            return Err(self.empty());
        }

        if let Some(window) = self.clamp_extent(exact, inclusion) {
            tracing::debug!(?window, "window resolved from exact bounds");
            return Ok(ResolvedWindow { window, strategy: WindowStrategy::Exact });
        }

        // Padding only locates the pixel under thin geometries; snap by centre.
        if let Some(window) = self
            .pixel_extent(&self.half_pixel_pad(bounds))
            .and_then(|e| self.clamp_extent(e, PixelInclusion::Center))
        {
            tracing::debug!(?window, "window resolved from half-pixel padded bounds");
            return Ok(ResolvedWindow { window, strategy: WindowStrategy::Padded });
        }

        let (row, col) = self
            .transform
            .world_to_pixel(centroid.0, centroid.1)
            .ok_or_else(|| self.empty())?;
        let row = row.clamp(0, self.height as i64 - 1) as usize;
        let col = col.clamp(0, self.width as i64 - 1) as usize;
        let window = Window::new(col, row, 1, 1);
        tracing::debug!(?window, "window resolved from centroid pixel");
        Ok(ResolvedWindow { window, strategy: WindowStrategy::Centroid })
    }

    /// Square window of `radius` pixels around a centre pixel, inclusive,
    /// clamped to the raster. `None` radius means the centre pixel alone.
    pub fn resolve_radius(
        &self,
        center_row: usize,
        center_col: usize,
        radius: Option<usize>,
    ) -> Result<Window> {
        if center_row >= self.height || center_col >= self.width {
            return Err(self.empty());
        }
        let r = radius.unwrap_or(0);
        let row_off = center_row.saturating_sub(r);
        let col_off = center_col.saturating_sub(r);
        let row_end = center_row.saturating_add(r).saturating_add(1).min(self.height);
        let col_end = center_col.saturating_add(r).saturating_add(1).min(self.width);
        Ok(Window::new(col_off, row_off, col_end - col_off, row_end - row_off))
    }

    /// Window straight from a box in the raster CRS, no fallback ladder.
    /// A box that clamps to zero area is an error.
    pub fn resolve_bbox(&self, bounds: &Bounds) -> Result<Window> {
        if !bounds.is_finite() {
            return Err(StatsError::InvalidArgument(format!("non-finite bbox {bounds:?}")));
        }
        self.pixel_extent(bounds)
            .and_then(|e| self.clamp_extent(e, PixelInclusion::Center))
            .ok_or_else(|| {
                StatsError::WindowEmpty(format!(
                    "bbox {:?} covers no pixel of the {}x{} raster",
                    bounds.to_array(),
                    self.width,
                    self.height
                ))
            })
    }
}
