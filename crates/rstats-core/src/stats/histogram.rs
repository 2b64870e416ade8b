//! Fixed-count histograms and the adaptive bin-count rule.
use serde::{Deserialize, Serialize};

use super::percentile::iqr_sorted;
use crate::error::{Result, StatsError};

/// Upper bound on the number of bins any histogram may carry.
pub const MAX_BINS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<u64>,
    /// `counts.len() + 1` ascending edges.
    pub bin_edges: Vec<f64>,
}

/// How a reducer bins its histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HistogramSpec {
    /// Freedman–Diaconis bin count clamped to `[1, max_bins]`.
    Adaptive { max_bins: usize },
    /// Caller-chosen bin count over an optional explicit range.
    Fixed { bins: usize, range: Option<(f64, f64)> },
}

impl HistogramSpec {
    pub fn adaptive() -> Self {
        Self::Adaptive { max_bins: MAX_BINS }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Adaptive { max_bins } if max_bins == 0 || max_bins > MAX_BINS => Err(
                StatsError::InvalidArgument(format!("max_bins must be in 1..={MAX_BINS}, got {max_bins}")),
            ),
            Self::Fixed { bins, .. } if bins == 0 => {
                Err(StatsError::InvalidArgument("histogram bins must be at least 1".into()))
            }
            Self::Fixed { range: Some((lo, hi)), .. } if !(lo.is_finite() && hi.is_finite() && lo <= hi) => {
                Err(StatsError::InvalidArgument(format!("invalid histogram range [{lo}, {hi}]")))
            }
            _ => Ok(()),
        }
    }

    /// Build the histogram of `sorted` (ascending, finite). `None` when empty.
    pub(crate) fn build(&self, sorted: &[f64]) -> Option<Histogram> {
        if sorted.is_empty() {
            return None;
        }
        Some(match *self {
            Self::Adaptive { max_bins } => {
                let bins = freedman_diaconis_bins(sorted, max_bins);
                Histogram::compute(sorted, bins, None)
            }
            Self::Fixed { bins, range } => Histogram::compute(sorted, bins.max(1), range),
        })
    }
}

impl Default for HistogramSpec {
    fn default() -> Self {
        Self::adaptive()
    }
}

/// Bin count from the Freedman–Diaconis width `2·IQR·n^(-1/3)`.
/// A zero width falls back to `range / 10`, or 1 for constant data.
pub fn freedman_diaconis_bins(sorted: &[f64], max_bins: usize) -> usize {
    let max_bins = max_bins.max(1);
    let n = sorted.len();
    if n == 0 {
        return 1;
    }
    let range = sorted[n - 1] - sorted[0];
    let iqr = iqr_sorted(sorted).unwrap_or(0.0);
    let mut width = 2.0 * iqr * (n as f64).powf(-1.0 / 3.0);
    if !(width.is_finite() && width > 0.0) {
        width = if range > 0.0 { range / 10.0 } else { 1.0 };
    }
    let bins = (range / width).ceil();
    if !bins.is_finite() {
        return max_bins;
    }
    (bins as usize).clamp(1, max_bins)
}

impl Histogram {
    /// `bins` equal-width bins over `range` (data min/max by default).
    /// Equal bounds widen to ±0.5; the last bin is closed on the right;
    /// values outside an explicit range are not counted.
    pub fn fixed(values: &[f64], bins: usize, range: Option<(f64, f64)>) -> Result<Self> {
        HistogramSpec::Fixed { bins, range }.validate()?;
        Ok(Self::compute(values, bins, range))
    }

    fn compute(values: &[f64], bins: usize, range: Option<(f64, f64)>) -> Self {
        let (mut lo, mut hi) = range.unwrap_or_else(|| {
            values
                .iter()
                .filter(|v| v.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        });
        if !(lo.is_finite() && hi.is_finite()) {
            (lo, hi) = (0.0, 1.0);
        }
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let mut counts = vec![0u64; bins];
        for &v in values {
            if let Some(i) = bin_index(v, lo, hi, bins) {
                counts[i] += 1;
            }
        }
        Self { counts, bin_edges: bin_edges(lo, hi, bins) }
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

pub(crate) fn bin_edges(lo: f64, hi: f64, bins: usize) -> Vec<f64> {
    (0..=bins)
        .map(|i| {
            let t = i as f64 / bins as f64;
            if i == bins {
                hi
            } else {
                lo * (1.0 - t) + hi * t
            }
        })
        .collect()
}

#[inline]
pub(crate) fn bin_index(v: f64, lo: f64, hi: f64, bins: usize) -> Option<usize> {
    if !v.is_finite() || v < lo || v > hi {
        return None;
    }
    // Halved operands keep `hi - lo` finite for extreme ranges.
    let t = (v * 0.5 - lo * 0.5) / (hi * 0.5 - lo * 0.5);
    let i = (t * bins as f64) as usize;
    Some(i.min(bins - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_bin_is_closed() {
        let h = Histogram::fixed(&[0.0, 1.0, 2.0, 3.0, 4.0], 4, None).unwrap();
        assert_eq!(h.counts, vec![1, 1, 1, 2]);
        assert_eq!(h.bin_edges, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn explicit_range_excludes_outliers() {
        let h = Histogram::fixed(&[-5.0, 0.5, 1.5, 9.0], 2, Some((0.0, 2.0))).unwrap();
        assert_eq!(h.counts, vec![1, 1]);
        assert_eq!(h.total(), 2);
    }

    #[test]
    fn constant_data_widens_range() {
        let h = Histogram::fixed(&[3.0; 5], 4, None).unwrap();
        assert_eq!(h.bin_edges.first(), Some(&2.5));
        assert_eq!(h.bin_edges.last(), Some(&3.5));
        assert_eq!(h.total(), 5);
    }

    #[test]
    fn invalid_parameters() {
        assert!(Histogram::fixed(&[1.0], 0, None).is_err());
        assert!(Histogram::fixed(&[1.0], 4, Some((2.0, 1.0))).is_err());
        assert!(Histogram::fixed(&[1.0], 4, Some((f64::NAN, 1.0))).is_err());
        assert!(HistogramSpec::Adaptive { max_bins: 65 }.validate().is_err());
    }

    #[test]
    fn adaptive_bins_stay_bounded() {
        // Constant data.
        assert_eq!(freedman_diaconis_bins(&[2.0; 100], MAX_BINS), 1);
        // Extreme outlier stretches the range far beyond the IQR.
        let mut v: Vec<f64> = (0..1000).map(|i| i as f64 * 0.001).collect();
        v.push(1e12);
        assert_eq!(freedman_diaconis_bins(&v, MAX_BINS), MAX_BINS);
        // Zero IQR but nonzero range falls back to range / 10.
        let mut flat = vec![1.0; 50];
        flat.push(2.0);
        assert_eq!(freedman_diaconis_bins(&flat, MAX_BINS), 10);
        for n in [1usize, 2, 3, 10, 10_000] {
            let v: Vec<f64> = (0..n).map(|i| (i as f64).sqrt()).collect();
            let b = freedman_diaconis_bins(&v, MAX_BINS);
            assert!((1..=MAX_BINS).contains(&b), "n={n} bins={b}");
        }
    }

    #[test]
    fn adaptive_spec_counts_everything() {
        let v: Vec<f64> = (0..200).map(|i| (i % 17) as f64).collect();
        let mut sorted = v.clone();
        sorted.sort_unstable_by(f64::total_cmp);
        let h = HistogramSpec::adaptive().build(&sorted).unwrap();
        assert_eq!(h.total(), 200);
        assert!(h.bins() <= MAX_BINS);
        assert!(HistogramSpec::adaptive().build(&[]).is_none());
    }
}
