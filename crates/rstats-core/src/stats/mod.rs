//! Reduction of masked pixel values into summary statistics.
mod histogram;
mod percentile;
mod summary;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::mask::ValidityMask;

pub use histogram::{freedman_diaconis_bins, Histogram, HistogramSpec, MAX_BINS};
pub(crate) use histogram::{bin_edges, bin_index};
pub use percentile::{iqr_sorted, median_sorted, percentile_sorted, percentiles, sorted_finite};
pub use summary::{AreaMetrics, SummaryStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    #[serde(flatten)]
    pub summary: SummaryStats,
    pub histogram: Option<Histogram>,
    pub area: Option<AreaMetrics>,
}

/// Reduces value arrays with a fixed histogram policy. Never fails.
#[derive(Debug, Clone, Copy)]
pub struct StatisticsReducer {
    histogram: HistogramSpec,
}

impl StatisticsReducer {
    pub fn new(histogram: HistogramSpec) -> Result<Self> {
        histogram.validate()?;
        Ok(Self { histogram })
    }

    pub fn adaptive(max_bins: usize) -> Result<Self> {
        Self::new(HistogramSpec::Adaptive { max_bins })
    }

    pub fn fixed(bins: usize, range: Option<(f64, f64)>) -> Result<Self> {
        Self::new(HistogramSpec::Fixed { bins, range })
    }

    /// Statistics of the finite entries of `values`; no area metrics.
    pub fn reduce(&self, values: &[f64]) -> StatsResult {
        let sorted = percentile::sorted_finite(values);
        StatsResult {
            summary: SummaryStats::from_sorted(&sorted),
            histogram: self.histogram.build(&sorted),
            area: None,
        }
    }

    /// Reduce the valid pixels of a window and account area from the same mask.
    pub fn reduce_masked(
        &self,
        values: &[f64],
        mask: &ValidityMask,
        pixel_area: Option<f64>,
    ) -> StatsResult {
        let mut result = self.reduce(&mask.extract(values));
        result.area = Some(AreaMetrics::new(pixel_area, mask.masked_count(), mask.valid_count()));
        result
    }
}

impl Default for StatisticsReducer {
    fn default() -> Self {
        Self { histogram: HistogramSpec::adaptive() }
    }
}

// ── Reducer selection ────────────────────────────────────────────────────────

/// The single statistic a geometry query reports as its `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    #[default]
    Mean,
    Sum,
    Min,
    Max,
    Std,
    Count,
    Median,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReducerValue {
    Scalar(Option<f64>),
    Histogram(Option<Histogram>),
}

impl Reducer {
    pub const ALL: [Reducer; 8] = [
        Self::Mean,
        Self::Sum,
        Self::Min,
        Self::Max,
        Self::Std,
        Self::Count,
        Self::Median,
        Self::Histogram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
            Self::Count => "count",
            Self::Median => "median",
            Self::Histogram => "histogram",
        }
    }

    pub fn select(&self, result: &StatsResult) -> ReducerValue {
        let s = &result.summary;
        match self {
            Self::Mean => ReducerValue::Scalar(s.mean),
            Self::Sum => ReducerValue::Scalar(s.sum),
            Self::Min => ReducerValue::Scalar(s.min),
            Self::Max => ReducerValue::Scalar(s.max),
            Self::Std => ReducerValue::Scalar(s.std),
            Self::Count => ReducerValue::Scalar(Some(s.count as f64)),
            Self::Median => ReducerValue::Scalar(s.median),
            Self::Histogram => ReducerValue::Histogram(result.histogram.clone()),
        }
    }
}

impl FromStr for Reducer {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == lower)
            .ok_or_else(|| {
                StatsError::InvalidReducer(format!(
                    "{s:?} (expected one of mean, sum, min, max, std, count, median, histogram)"
                ))
            })
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geotransform::GeoTransform;
    use crate::mask::{PixelInclusion, SampleArray};
    use crate::window::Window;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn ordering_invariants_hold_on_random_data() {
        let mut rng = StdRng::seed_from_u64(7);
        let reducer = StatisticsReducer::default();
        for n in [1usize, 2, 5, 100, 2_000] {
            let v: Vec<f64> = (0..n).map(|_| rng.gen_range(-1e3..1e3)).collect();
            let s = reducer.reduce(&v).summary;
            let (min, max) = (s.min.unwrap(), s.max.unwrap());
            assert!(min <= s.mean.unwrap() && s.mean.unwrap() <= max);
            assert!(min <= s.median.unwrap() && s.median.unwrap() <= max);
            assert!(s.std.unwrap() >= 0.0);
            if n == 1 {
                assert_eq!(s.std, Some(0.0));
            }
        }
    }

    #[test]
    fn empty_input_is_not_an_error() {
        let r = StatisticsReducer::default().reduce(&[]);
        assert_eq!(r.summary.count, 0);
        assert!(r.summary.mean.is_none() && r.summary.std.is_none());
        assert!(r.histogram.is_none());
    }

    #[test]
    fn histogram_bins_bounded_for_adversarial_inputs() {
        let reducer = StatisticsReducer::default();
        let constant = vec![5.0; 1000];
        let mut outliers: Vec<f64> = (0..500).map(f64::from).collect();
        outliers.extend([1e15, -1e15]);
        for v in [constant, outliers, vec![1.0], vec![0.0, 1e-300]] {
            let h = reducer.reduce(&v).histogram.unwrap();
            assert!((1..=MAX_BINS).contains(&h.bins()));
            assert_eq!(h.total(), v.len() as u64);
        }
    }

    #[test]
    fn extreme_finite_values_stay_finite() {
        let r = StatisticsReducer::default().reduce(&[-1e308, 1e308]);
        let s = r.summary;
        let (min, max) = (s.min.unwrap(), s.max.unwrap());
        let median = s.median.unwrap();
        assert!(min <= median && median <= max);
        assert_eq!(s.mean, Some(0.0));
        let std = s.std.unwrap();
        assert!(std.is_finite() && std > 0.0);
        let h = r.histogram.unwrap();
        assert!(h.bin_edges.iter().all(|e| e.is_finite()));
        assert!(h.bin_edges.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(h.bin_edges[0], -1e308);
        assert_eq!(h.total(), 2);
    }

    #[test]
    fn fixed_reducer_uses_caller_bins() {
        let r = StatisticsReducer::fixed(16, None).unwrap().reduce(&[1.0, 2.0, 3.0]);
        assert_eq!(r.histogram.unwrap().bins(), 16);
        assert!(StatisticsReducer::fixed(0, None).is_err());
    }

    #[test]
    fn all_nodata_window_has_no_statistics() {
        let values = vec![-9999.0; 9];
        let sample = SampleArray::new(
            Window::new(0, 0, 3, 3),
            GeoTransform::north_up(0.0, 3.0, 1.0, -1.0),
            values,
        )
        .unwrap();
        let mask = ValidityMask::build(&sample, Some(-9999.0), None, PixelInclusion::Center);
        let r = StatisticsReducer::default().reduce_masked(&sample.values, &mask, Some(1.0));
        assert_eq!(r.summary, SummaryStats::default());
        let area = r.area.as_ref().unwrap();
        assert_eq!(area.window_mask_pixels, 9);
        assert_eq!(area.nodata_pixels, 9);
        assert_eq!(area.coverage_ratio, 0.0);
        let json = serde_json::to_value(&r).unwrap();
        assert!(json["mean"].is_null());
    }

    #[test]
    fn reducer_parsing_and_selection() {
        assert_eq!("MEDIAN".parse::<Reducer>().unwrap(), Reducer::Median);
        assert!(matches!("mode".parse::<Reducer>(), Err(StatsError::InvalidReducer(_))));
        let r = StatisticsReducer::default().reduce(&[1.0, 3.0]);
        assert_eq!(Reducer::Sum.select(&r), ReducerValue::Scalar(Some(4.0)));
        assert_eq!(Reducer::Count.select(&r), ReducerValue::Scalar(Some(2.0)));
        assert!(matches!(Reducer::Histogram.select(&r), ReducerValue::Histogram(Some(_))));
    }
}
