//! Window sample arrays and their validity masks.
//!
//! A pixel is valid when it lies inside the query footprint (polygon queries
//! only), differs from nodata and is finite. The mask is built once and used
//! for both value extraction and area accounting, so pixel counts always agree.
use geo::{BoundingRect, Contains, Intersects};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::geotransform::GeoTransform;
use crate::par;
use crate::window::Window;

/// Tolerances of the nodata comparison (those of `numpy.isclose`).
const NODATA_RTOL: f64 = 1e-5;
const NODATA_ATOL: f64 = 1e-8;

/// Rule deciding whether a pixel belongs to a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelInclusion {
    /// Pixel centre inside the polygon.
    #[default]
    Center,
    /// Any part of the pixel touches the polygon.
    AllTouched,
}

impl PixelInclusion {
    pub fn from_all_touched(all_touched: bool) -> Self {
        if all_touched {
            Self::AllTouched
        } else {
            Self::Center
        }
    }
}

/// Tolerance-based nodata test; sentinels are often stored as floats.
#[inline]
pub fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    match nodata {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => (value - nd).abs() <= NODATA_ATOL + NODATA_RTOL * nd.abs(),
        None => false,
    }
}

// ── SampleArray ──────────────────────────────────────────────────────────────

/// Pixel values of one window, row-major, with the window's own transform.
#[derive(Debug, Clone)]
pub struct SampleArray {
    pub window: Window,
    /// Maps window-local (col, row) to world coordinates.
    pub transform: GeoTransform,
    pub values: Vec<f64>,
}

impl SampleArray {
    pub fn new(window: Window, transform: GeoTransform, values: Vec<f64>) -> Result<Self> {
        if values.len() != window.pixel_count() {
            return Err(StatsError::ComputationFailure(format!(
                "window {}x{} read returned {} values",
                window.width,
                window.height,
                values.len()
            )));
        }
        Ok(Self { window, transform, values })
    }

    pub fn width(&self) -> usize {
        self.window.width
    }

    pub fn height(&self) -> usize {
        self.window.height
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.window.width + col]
    }
}

// ── Footprint rasterization ─────────────────────────────────────────────────

/// Rasterize a polygon onto a `width × height` grid with the given
/// transform. True where the pixel belongs to the polygon under `inclusion`.
pub fn rasterize_footprint(
    width: usize,
    height: usize,
    transform: &GeoTransform,
    polygon: &geo::MultiPolygon<f64>,
    inclusion: PixelInclusion,
) -> Vec<bool> {
    let mut out = vec![false; width * height];
    let Some(bbox) = polygon.bounding_rect() else {
        return out;
    };

    par::fill_rows(&mut out, width, |row, cells| {
        for (col, cell) in cells.iter_mut().enumerate() {
            *cell = match inclusion {
                PixelInclusion::Center => {
                    let (x, y) = transform.pixel_to_world(row, col);
                    let centre = geo::Point::new(x, y);
                    bbox.intersects(&geo::Coord { x, y })
                        && (polygon.contains(&centre)
                            || (polygon.intersects(&centre)
                                && polygon.contains(&nudged_centre(transform, row, col))))
                }
                PixelInclusion::AllTouched => {
                    let (c, r) = (col as f64, row as f64);
                    let ring = vec![
                        transform.apply(c, r),
                        transform.apply(c + 1.0, r),
                        transform.apply(c + 1.0, r + 1.0),
                        transform.apply(c, r + 1.0),
                        transform.apply(c, r),
                    ];
                    let pixel = geo::Polygon::new(geo::LineString::from(ring), vec![]);
                    pixel.bounding_rect().is_some_and(|pb| pb.intersects(&bbox))
                        && polygon.intersects(&pixel)
                }
            };
        }
    });
    out
}

/// Centre pushed a hair towards increasing col and row. A centre lying on
/// the polygon boundary belongs to the polygon when this point does, so
/// left and top edges are inclusive and right and bottom edges are not.
fn nudged_centre(transform: &GeoTransform, row: usize, col: usize) -> geo::Point<f64> {
    let (x, y) = transform.apply(col as f64 + 0.5 + 1e-6, row as f64 + 0.5 + 1e-7);
    geo::Point::new(x, y)
}

// ── ValidityMask ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ValidityMask {
    width: usize,
    height: usize,
    /// Inside the query geometry (all true for non-polygon queries).
    footprint: Vec<bool>,
    /// Inside the footprint, not nodata, finite.
    valid: Vec<bool>,
}

impl ValidityMask {
    /// Combine the geometric footprint (if any) with the nodata/finite test.
    pub fn build(
        sample: &SampleArray,
        nodata: Option<f64>,
        polygon: Option<&geo::MultiPolygon<f64>>,
        inclusion: PixelInclusion,
    ) -> Self {
        let (width, height) = (sample.width(), sample.height());
        let footprint = match polygon {
            Some(p) => rasterize_footprint(width, height, &sample.transform, p, inclusion),
            None => vec![true; width * height],
        };
        Self::from_footprint(sample, nodata, footprint)
    }

    pub fn from_footprint(sample: &SampleArray, nodata: Option<f64>, footprint: Vec<bool>) -> Self {
        let valid = footprint
            .iter()
            .zip(&sample.values)
            .map(|(&inside, &v)| inside && v.is_finite() && !is_nodata(v, nodata))
            .collect();
        Self {
            width: sample.width(),
            height: sample.height(),
            footprint,
            valid,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn footprint(&self) -> &[bool] {
        &self.footprint
    }

    pub fn valid(&self) -> &[bool] {
        &self.valid
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.valid[idx]
    }

    /// Pixels inside the query geometry.
    pub fn masked_count(&self) -> usize {
        self.footprint.iter().filter(|&&b| b).count()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&b| b).count()
    }

    /// Inside the geometry but nodata or non-finite.
    pub fn nodata_count(&self) -> usize {
        self.masked_count() - self.valid_count()
    }

    /// Valid values in row-major order.
    pub fn extract(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(&self.valid)
            .filter_map(|(&v, &ok)| ok.then_some(v))
            .collect()
    }

    /// Copy of `values` with every invalid pixel replaced by `fill`.
    pub fn apply(&self, values: &[f64], fill: f64) -> Vec<f64> {
        values
            .iter()
            .zip(&self.valid)
            .map(|(&v, &ok)| if ok { v } else { fill })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ND: f64 = -9999.0;

    fn sample(width: usize, height: usize, values: Vec<f64>) -> SampleArray {
        let window = Window::new(0, 0, width, height);
        SampleArray::new(window, GeoTransform::north_up(0.0, height as f64, 1.0, -1.0), values).unwrap()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> geo::MultiPolygon<f64> {
        geo::MultiPolygon(vec![geo::Rect::new((x0, y0), (x1, y1)).to_polygon()])
    }

    #[test]
    fn nodata_uses_tolerance() {
        assert!(is_nodata(-9999.0, Some(ND)));
        assert!(is_nodata(-9999.000_01, Some(ND)));
        assert!(!is_nodata(-9998.0, Some(ND)));
        assert!(!is_nodata(0.0, None));
        assert!(is_nodata(f64::NAN, Some(f64::NAN)));
    }

    #[test]
    fn nodata_and_non_finite_are_invalid() {
        let s = sample(3, 1, vec![1.0, ND, f64::NAN]);
        let m = ValidityMask::build(&s, Some(ND), None, PixelInclusion::Center);
        assert_eq!(m.masked_count(), 3);
        assert_eq!(m.valid_count(), 1);
        assert_eq!(m.nodata_count(), 2);
        assert_eq!(m.extract(&s.values), vec![1.0]);
    }

    #[test]
    fn infinity_is_invalid_without_nodata() {
        let s = sample(2, 1, vec![f64::INFINITY, 4.0]);
        let m = ValidityMask::build(&s, None, None, PixelInclusion::Center);
        assert_eq!(m.extract(&s.values), vec![4.0]);
    }

    #[test]
    fn centre_rule_vs_all_touched() {
        let s = sample(4, 4, (0..16).map(f64::from).collect());
        // Covers pixel centres of the middle 2×2 block and clips its neighbours.
        let poly = square(0.8, 0.8, 3.2, 3.2);
        let centre = ValidityMask::build(&s, None, Some(&poly), PixelInclusion::Center);
        let touched = ValidityMask::build(&s, None, Some(&poly), PixelInclusion::AllTouched);
        assert_eq!(centre.masked_count(), 4);
        assert_eq!(centre.extract(&s.values), vec![5.0, 6.0, 9.0, 10.0]);
        assert_eq!(touched.masked_count(), 16);
    }

    #[test]
    fn centres_on_left_and_top_edges_are_inside() {
        let s = sample(4, 4, (0..16).map(f64::from).collect());
        // Every edge runs through a line of pixel centres.
        let poly = square(0.5, 0.5, 2.5, 2.5);
        let m = ValidityMask::build(&s, None, Some(&poly), PixelInclusion::Center);
        assert_eq!(m.extract(&s.values), vec![4.0, 5.0, 8.0, 9.0]);
    }

    #[test]
    fn counts_come_from_one_mask() {
        let mut values: Vec<f64> = (0..16).map(f64::from).collect();
        values[5] = ND;
        let s = sample(4, 4, values);
        let poly = square(0.8, 0.8, 3.2, 3.2);
        let m = ValidityMask::build(&s, Some(ND), Some(&poly), PixelInclusion::Center);
        assert_eq!(m.masked_count(), 4);
        assert_eq!(m.valid_count(), 3);
        assert_eq!(m.valid_count() + m.nodata_count(), m.masked_count());
        assert_eq!(m.extract(&s.values).len(), m.valid_count());
    }

    #[test]
    fn apply_fills_invalid() {
        let s = sample(2, 2, vec![1.0, ND, 3.0, 4.0]);
        let m = ValidityMask::build(&s, Some(ND), Some(&square(0.0, 1.0, 2.0, 2.0)), PixelInclusion::Center);
        assert_eq!(m.apply(&s.values, ND), vec![1.0, ND, ND, ND]);
    }

    #[test]
    fn polygon_outside_window_masks_everything() {
        let s = sample(2, 2, vec![1.0; 4]);
        let m = ValidityMask::build(&s, None, Some(&square(10.0, 10.0, 11.0, 11.0)), PixelInclusion::AllTouched);
        assert_eq!(m.masked_count(), 0);
        assert!(m.extract(&s.values).is_empty());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let r = SampleArray::new(Window::new(0, 0, 2, 2), GeoTransform::north_up(0.0, 0.0, 1.0, -1.0), vec![0.0; 3]);
        assert!(r.is_err());
    }
}
