//! Percentiles with linear interpolation between closest ranks.

/// Sort a copy of the finite values, ascending.
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_unstable_by(f64::total_cmp);
    v
}

/// `q`-th percentile (0..=100) of an ascending slice. `None` when empty.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    // Convex combination: finite for any finite pair, never outside them.
    let (a, b) = (sorted[lo], sorted[hi]);
    Some((a * (1.0 - frac) + b * frac).clamp(a, b))
}

/// Several percentiles of unsorted data, sorting once.
pub fn percentiles(values: &[f64], qs: &[f64]) -> Option<Vec<f64>> {
    let sorted = sorted_finite(values);
    qs.iter().map(|&q| percentile_sorted(&sorted, q)).collect()
}

pub fn median_sorted(sorted: &[f64]) -> Option<f64> {
    percentile_sorted(sorted, 50.0)
}

/// Interquartile range of an ascending slice.
pub fn iqr_sorted(sorted: &[f64]) -> Option<f64> {
    Some(percentile_sorted(sorted, 75.0)? - percentile_sorted(sorted, 25.0)?)
}
