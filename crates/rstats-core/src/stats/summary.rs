use serde::{Deserialize, Serialize};

use super::percentile::median_sorted;

/// Direct reductions of a value array. Every statistic is `None` when
/// `count == 0`; that is the only case in which they are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Sample standard deviation (ddof = 1); exactly 0.0 for one value.
    pub std: Option<f64>,
    pub sum: Option<f64>,
}

impl SummaryStats {
    /// Reduce an ascending slice of finite values.
    pub fn from_sorted(sorted: &[f64]) -> Self {
        let n = sorted.len();
        if n == 0 {
            return Self::default();
        }
        let min = sorted[0];
        let max = sorted[n - 1];
        let sum: f64 = sorted.iter().sum();
        let mut mean = sum / n as f64;
        if !mean.is_finite() {
            mean = scaled_mean(sorted, min, max);
        }
        // Rounding can push the mean of near-constant data just past an end.
        let mean = mean.clamp(min, max);
        let std = if n > 1 {
            let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            let std = (ss / (n - 1) as f64).sqrt();
            if std.is_finite() {
                std
            } else {
                scaled_std(sorted, mean, min, max)
            }
        } else {
            0.0
        };
        Self {
            count: n,
            min: Some(min),
            max: Some(max),
            mean: Some(mean),
            median: median_sorted(sorted),
            std: Some(std),
            sum: Some(sum),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Largest magnitude of the data; values divided by it lie in [-1, 1].
fn scale(min: f64, max: f64) -> f64 {
    min.abs().max(max.abs())
}

/// Mean of data whose plain sum overflows.
fn scaled_mean(sorted: &[f64], min: f64, max: f64) -> f64 {
    let s = scale(min, max);
    if s == 0.0 {
        return 0.0;
    }
    sorted.iter().map(|v| v / s).sum::<f64>() / sorted.len() as f64 * s
}

/// Sample standard deviation of data whose squared deviations overflow.
fn scaled_std(sorted: &[f64], mean: f64, min: f64, max: f64) -> f64 {
    let s = scale(min, max);
    if s == 0.0 {
        return 0.0;
    }
    let m = mean / s;
    let ss: f64 = sorted.iter().map(|v| (v / s - m).powi(2)).sum();
    (ss / (sorted.len() - 1) as f64).sqrt() * s
}

/// Area accounting from one validity mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMetrics {
    /// Area of one pixel in squared CRS units; `None` for degenerate grids.
    pub pixel_area: Option<f64>,
    /// Pixels inside the query geometry.
    pub window_mask_pixels: usize,
    pub valid_pixels: usize,
    pub nodata_pixels: usize,
    pub full_area: Option<f64>,
    pub valid_area: Option<f64>,
    pub nodata_area: Option<f64>,
    /// `valid / masked`, 0.0 when nothing is masked.
    pub coverage_ratio: f64,
}

impl AreaMetrics {
    pub fn new(pixel_area: Option<f64>, masked: usize, valid: usize) -> Self {
        let valid = valid.min(masked);
        let nodata = masked - valid;
        let scaled = |n: usize| pixel_area.map(|a| a * n as f64);
        Self {
            pixel_area,
            window_mask_pixels: masked,
            valid_pixels: valid,
            nodata_pixels: nodata,
            full_area: scaled(masked),
            valid_area: scaled(valid),
            nodata_area: scaled(nodata),
            coverage_ratio: if masked == 0 { 0.0 } else { valid as f64 / masked as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn basic_reductions() {
        let s = SummaryStats::from_sorted(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.count, 4);
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.max, Some(4.0));
        assert_eq!(s.sum, Some(10.0));
        assert_relative_eq!(s.mean.unwrap(), 2.5);
        assert_relative_eq!(s.median.unwrap(), 2.5);
        // ddof = 1
        assert_relative_eq!(s.std.unwrap(), (5.0f64 / 3.0).sqrt());
    }

    #[test]
    fn single_value_has_zero_std() {
        let s = SummaryStats::from_sorted(&[42.0]);
        assert_eq!(s.std, Some(0.0));
        assert_eq!(s.median, Some(42.0));
    }

    #[test]
    fn empty_has_no_statistics() {
        let s = SummaryStats::from_sorted(&[]);
        assert_eq!(s, SummaryStats::default());
        assert!(s.is_empty());
    }

    #[test]
    fn mean_stays_within_range_for_constant_data() {
        let v = vec![0.1; 1001];
        let s = SummaryStats::from_sorted(&v);
        assert!(s.min.unwrap() <= s.mean.unwrap() && s.mean.unwrap() <= s.max.unwrap());
    }

    #[test]
    fn area_metrics() {
        let a = AreaMetrics::new(Some(900.0), 10, 7);
        assert_eq!(a.nodata_pixels, 3);
        assert_eq!(a.full_area, Some(9000.0));
        assert_eq!(a.valid_area, Some(6300.0));
        assert_eq!(a.nodata_area, Some(2700.0));
        assert_relative_eq!(a.coverage_ratio, 0.7);
    }

    #[test]
    fn empty_mask_has_zero_coverage() {
        let a = AreaMetrics::new(Some(1.0), 0, 0);
        assert_eq!(a.coverage_ratio, 0.0);
        let a = AreaMetrics::new(None, 4, 4);
        assert_eq!(a.full_area, None);
        assert_eq!(a.coverage_ratio, 1.0);
    }
}
