//! Affine pixel ↔ world mapping of a raster grid.
//!
//! Coefficients follow the `Affine(a, b, c, d, e, f)` convention:
//!   x = a·col + b·row + c
//!   y = d·col + e·row + f
//! For north-up grids `b = d = 0` and `e` is negative.
use serde::{Deserialize, Serialize};

use crate::geometry::Bounds;
use crate::window::Window;

/// Determinants below this magnitude are treated as singular.
const SINGULAR_EPS: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Axis-aligned grid with its upper-left corner at (`origin_x`, `origin_y`).
    /// `pixel_height` is signed: negative for the usual north-up layout.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, pixel_height, origin_y)
    }

    /// Build from GDAL order `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// True when the grid has no rotation or shear terms.
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Map fractional pixel coordinates (col, row) to world (x, y).
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// World coordinates of the centre of pixel (`row`, `col`).
    #[inline]
    pub fn pixel_to_world(&self, row: usize, col: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    pub fn inverse(&self) -> Option<GeoTransform> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPS {
            return None;
        }
        let ai = self.e / det;
        let bi = -self.b / det;
        let di = -self.d / det;
        let ei = self.a / det;
        Some(Self::new(
            ai,
            bi,
            -(ai * self.c + bi * self.f),
            di,
            ei,
            -(di * self.c + ei * self.f),
        ))
    }

    /// Fractional (row, col) of a world coordinate. `None` for singular transforms.
    pub fn world_to_fractional(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let inv = self.inverse()?;
        let (col, row) = inv.apply(x, y);
        Some((row, col))
    }

    /// Integer (row, col) of the pixel containing (x, y): the fractional index
    /// is floored. May lie outside the grid.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        let (row, col) = self.world_to_fractional(x, y)?;
        if !row.is_finite() || !col.is_finite() {
            return None;
        }
        Some((row.floor() as i64, col.floor() as i64))
    }

    /// Area of one pixel in squared CRS units: |a·e − b·d|.
    /// `None` for degenerate (zero-determinant) transforms.
    pub fn pixel_area(&self) -> Option<f64> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPS {
            return None;
        }
        Some(det.abs())
    }

    /// Pixel size along the column and row axes (always positive).
    pub fn resolution(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }

    /// Transform of the sub-grid whose pixel (0, 0) is the window's origin.
    pub fn window_transform(&self, window: &Window) -> GeoTransform {
        let (c, f) = self.apply(window.col_off as f64, window.row_off as f64);
        Self::new(self.a, self.b, c, self.d, self.e, f)
    }

    /// World-space bounding box of a window, from all four corners.
    pub fn window_bounds(&self, window: &Window) -> Bounds {
        let c0 = window.col_off as f64;
        let r0 = window.row_off as f64;
        let c1 = c0 + window.width as f64;
        let r1 = r0 + window.height as f64;
        Bounds::from_points([
            self.apply(c0, r0),
            self.apply(c1, r0),
            self.apply(c0, r1),
            self.apply(c1, r1),
        ])
    }
}
