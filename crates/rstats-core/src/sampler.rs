//! Approximate value range from random sub-windows.
//!
//! The result is an estimate meant for visualization styling: only
//! `num_samples` windows of `frac` × the raster size are read, so the
//! percentiles can miss values that occur outside the sampled windows.
//! The raster is never scanned exhaustively.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::mask::{PixelInclusion, ValidityMask};
use crate::raster::RasterHandle;
use crate::stats::{percentile_sorted, sorted_finite};
use crate::window::Window;

#[derive(Debug, Clone, Copy)]
pub struct PercentileSampler {
    pub num_samples: usize,
    /// Sub-window size as a fraction of each raster dimension, in (0, 1].
    pub frac: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledRange {
    pub p5: Option<f64>,
    pub p95: Option<f64>,
    /// Min/max of the pooled sample.
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub valid_pixels: usize,
    pub windows: Vec<Window>,
}

impl PercentileSampler {
    pub fn new(num_samples: usize, frac: f64) -> Result<Self> {
        if num_samples == 0 {
            return Err(StatsError::InvalidArgument("num_samples must be at least 1".into()));
        }
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(StatsError::InvalidArgument(format!(
                "sample fraction must be in (0, 1], got {frac}"
            )));
        }
        Ok(Self { num_samples, frac })
    }

    /// Window size along one axis: `frac` of the dimension, at least one pixel.
    fn side(&self, dim: usize) -> usize {
        ((dim as f64 * self.frac).round() as usize).clamp(1, dim.max(1))
    }

    pub fn sample<R: Rng>(&self, raster: &mut RasterHandle, rng: &mut R) -> Result<SampledRange> {
        let (width, height) = (raster.width(), raster.height());
        if width == 0 || height == 0 {
            return Err(StatsError::window_empty(width, height));
        }
        let (sw, sh) = (self.side(width), self.side(height));
        let nodata = raster.nodata();

        let mut pooled = Vec::new();
        let mut windows = Vec::with_capacity(self.num_samples);
        for _ in 0..self.num_samples {
            let col_off = rng.gen_range(0..=width - sw);
            let row_off = rng.gen_range(0..=height - sh);
            let window = Window::new(col_off, row_off, sw, sh);
            let sample = raster.read(&window)?;
            let mask = ValidityMask::build(&sample, nodata, None, PixelInclusion::Center);
            pooled.extend(mask.extract(&sample.values));
            windows.push(window);
        }

        let sorted = sorted_finite(&pooled);
        tracing::debug!(
            raster_id = raster.id(),
            windows = windows.len(),
            valid = sorted.len(),
            "pooled percentile sample"
        );
        Ok(SampledRange {
            p5: percentile_sorted(&sorted, 5.0),
            p95: percentile_sorted(&sorted, 95.0),
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            valid_pixels: sorted.len(),
            windows,
        })
    }
}

/// Display range for styling, always a proper interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StyleRange {
    pub min: f64,
    pub max: f64,
    /// `min`/`max` rounded to three significant digits, or the raw values
    /// when rounding would collapse the interval.
    pub nice_min: f64,
    pub nice_max: f64,
}

impl StyleRange {
    /// No valid pixels → [0, 1]. Degenerate percentiles fall back to the
    /// pooled min/max; still-flat data is widened by ±1 (for 0) or ±1 %.
    pub fn from_sampled(range: &SampledRange) -> Self {
        let (mut lo, mut hi) = match (range.p5, range.p95) {
            (Some(lo), Some(hi)) if lo.is_finite() && hi.is_finite() && lo != hi => (lo, hi),
            _ => match (range.min, range.max) {
                (Some(lo), Some(hi)) => (lo, hi),
                _ => (0.0, 1.0),
            },
        };
        if lo == hi {
            let eps = if lo == 0.0 { 1.0 } else { lo.abs() * 0.01 };
            lo -= eps;
            hi += eps;
        }
        let (mut nice_min, mut nice_max) = (nice(lo), nice(hi));
        if nice_min >= nice_max {
            (nice_min, nice_max) = (lo, hi);
        }
        Self { min: lo, max: hi, nice_min, nice_max }
    }
}

fn nice(v: f64) -> f64 {
    if v == 0.0 || !v.is_finite() {
        return v;
    }
    let mag = 10f64.powf(v.abs().log10().floor());
    ((v / mag) * 1000.0).round() / 1000.0 * mag
}
