//! Two-raster alignment: resample raster B onto raster A's window grid with
//! nearest-neighbour lookup and pair the mutually valid pixels.
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::crs::CoordinateProjector;
use crate::error::Result;
use crate::geometry::Geometry;
use crate::mask::{is_nodata, PixelInclusion, SampleArray, ValidityMask};
use crate::par;
use crate::raster::RasterHandle;
use crate::stats::{bin_edges, bin_index, sorted_finite, SummaryStats};
use crate::window::{ResolvedWindow, Window};

/// Co-located finite values of two rasters on raster A's grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairedSample {
    pub x_vals: Vec<f64>,
    pub y_vals: Vec<f64>,
    /// Pixels of A's window inside the query geometry.
    pub masked_pixels: usize,
    /// Window read on raster A.
    pub window: Option<Window>,
}

impl PairedSample {
    pub fn len(&self) -> usize {
        self.x_vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_vals.is_empty()
    }

    /// Pairs over masked pixels, 0.0 when nothing is masked.
    pub fn coverage_ratio(&self) -> f64 {
        if self.masked_pixels == 0 {
            0.0
        } else {
            self.len() as f64 / self.masked_pixels as f64
        }
    }

    /// At most `max_points` pairs, drawn uniformly without replacement with a
    /// fixed seed. Identical inputs always select identical indices, in order.
    pub fn subsample(&self, max_points: usize, seed: u64) -> PlotSample {
        let total = self.len();
        if total <= max_points {
            return PlotSample {
                x: self.x_vals.clone(),
                y: self.y_vals.clone(),
                total,
                subsampled: false,
            };
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut idx = rand::seq::index::sample(&mut rng, total, max_points).into_vec();
        idx.sort_unstable();
        PlotSample {
            x: idx.iter().map(|&i| self.x_vals[i]).collect(),
            y: idx.iter().map(|&i| self.y_vals[i]).collect(),
            total,
            subsampled: true,
        }
    }
}

/// Plotting-sized slice of a paired sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSample {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Size of the full paired sample.
    pub total: usize,
    pub subsampled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointHistogram {
    /// `counts[i][j]`: pairs with x in bin `i` and y in bin `j`.
    pub counts: Vec<Vec<u64>>,
    pub x_edges: Vec<f64>,
    pub y_edges: Vec<f64>,
}

/// Statistics over the full paired sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedStats {
    pub n: usize,
    /// `None` unless n > 1 and both variables vary.
    pub pearson_r: Option<f64>,
    /// OLS of y on x; same conditions as `pearson_r`.
    pub regression: Option<Regression>,
    pub joint_histogram: Option<JointHistogram>,
    pub x: SummaryStats,
    pub y: SummaryStats,
}

impl PairedStats {
    pub fn compute(sample: &PairedSample, joint_bins: usize) -> Self {
        let n = sample.len();
        let (x, y) = (&sample.x_vals, &sample.y_vals);

        let (pearson_r, regression) = if n > 1 {
            let mx = x.iter().sum::<f64>() / n as f64;
            let my = y.iter().sum::<f64>() / n as f64;
            let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
            for (&a, &b) in x.iter().zip(y) {
                let (dx, dy) = (a - mx, b - my);
                sxx += dx * dx;
                syy += dy * dy;
                sxy += dx * dy;
            }
            if sxx > 0.0 && syy > 0.0 {
                let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
                let slope = sxy / sxx;
                let reg = Regression { slope, intercept: my - slope * mx, r_squared: r * r };
                (Some(r), Some(reg))
            } else {
                (None, None)
            }
        } else {
            (None, None)
        };

        Self {
            n,
            pearson_r,
            regression,
            joint_histogram: joint_histogram(x, y, joint_bins),
            x: SummaryStats::from_sorted(&sorted_finite(x)),
            y: SummaryStats::from_sorted(&sorted_finite(y)),
        }
    }
}

fn axis_range(v: &[f64]) -> (f64, f64) {
    let (lo, hi) = v
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    if lo == hi {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}

fn joint_histogram(x: &[f64], y: &[f64], bins: usize) -> Option<JointHistogram> {
    if x.is_empty() || bins == 0 {
        return None;
    }
    let (xl, xh) = axis_range(x);
    let (yl, yh) = axis_range(y);
    let mut counts = vec![vec![0u64; bins]; bins];
    for (&a, &b) in x.iter().zip(y) {
        if let (Some(i), Some(j)) = (bin_index(a, xl, xh, bins), bin_index(b, yl, yh, bins)) {
            counts[i][j] += 1;
        }
    }
    Some(JointHistogram {
        counts,
        x_edges: bin_edges(xl, xh, bins),
        y_edges: bin_edges(yl, yh, bins),
    })
}

// ── Aligner ──────────────────────────────────────────────────────────────────

pub struct CrossRasterAligner {
    pub inclusion: PixelInclusion,
    /// Edge points when reprojecting A's window extent into B's CRS.
    pub densify: usize,
}

impl CrossRasterAligner {
    pub fn new(inclusion: PixelInclusion, densify: usize) -> Self {
        Self { inclusion, densify }
    }

    /// Pair A and B over `geometry`, given in A's CRS.
    pub fn align(
        &self,
        a: &mut RasterHandle,
        b: &mut RasterHandle,
        geometry: &Geometry,
    ) -> Result<PairedSample> {
        let ResolvedWindow { window, strategy } = a.resolver().resolve(geometry, self.inclusion)?;
        tracing::debug!(raster_id = a.id(), ?window, ?strategy, "reference window");
        let sample_a = a.read(&window)?;
        let polygon = geometry.is_areal().then(|| geometry.areal_parts());
        let mask = ValidityMask::build(&sample_a, a.nodata(), polygon.as_ref(), self.inclusion);

        let resampled = self.resample_onto(a, b, &sample_a)?;

        let mut sample = PairedSample {
            masked_pixels: mask.masked_count(),
            window: Some(window),
            ..PairedSample::default()
        };
        for (i, (&va, &vb)) in sample_a.values.iter().zip(&resampled).enumerate() {
            if mask.is_valid(i) && vb.is_finite() {
                sample.x_vals.push(va);
                sample.y_vals.push(vb);
            }
        }
        tracing::debug!(
            a = a.id(),
            b = b.id(),
            pairs = sample.len(),
            masked = sample.masked_pixels,
            "paired sample built"
        );
        Ok(sample)
    }

    /// Nearest-neighbour values of B at the pixel centres of A's window.
    /// Cells outside B's footprint, or nodata in B, are NaN.
    fn resample_onto(
        &self,
        a: &RasterHandle,
        b: &mut RasterHandle,
        sample_a: &SampleArray,
    ) -> Result<Vec<f64>> {
        let (width, height) = (sample_a.width(), sample_a.height());
        let mut out = vec![f64::NAN; width * height];

        let projector = CoordinateProjector::new(a.crs(), b.crs())?;
        let extent_a = sample_a.transform.window_bounds(&Window::full(width, height));
        let extent_b = match projector.project_bbox(&extent_a, self.densify) {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(%err, "window extent has no image in B's CRS");
                return Ok(out);
            }
        };
        let (pbx, pby) = b.transform().resolution();
        let window_b = match b.resolver().resolve_bbox(&extent_b.pad(pbx, pby)) {
            Ok(w) => w,
            Err(_) => {
                tracing::debug!(b = b.id(), "window does not overlap raster B");
                return Ok(out);
            }
        };
        let sample_b = b.read(&window_b)?;
        let nodata_b = b.nodata();
        let Some(inv_b) = sample_b.transform.inverse() else {
            return Ok(out);
        };

        // Pixel centres of A expressed in B's CRS; NaN where projection fails.
        let mut centres = vec![(f64::NAN, f64::NAN); width * height];
        for row in 0..height {
            for col in 0..width {
                let (x, y) = sample_a.transform.pixel_to_world(row, col);
                if let Ok(p) = projector.project_point(x, y) {
                    centres[row * width + col] = p;
                }
            }
        }

        let (bw, bh) = (sample_b.width() as f64, sample_b.height() as f64);
        par::fill_rows(&mut out, width, |row, cells| {
            for (col, cell) in cells.iter_mut().enumerate() {
                let (x, y) = centres[row * width + col];
                let (fc, fr) = inv_b.apply(x, y);
                if !(fc >= 0.0 && fr >= 0.0 && fc < bw && fr < bh) {
                    continue;
                }
                let v = sample_b.get(fr as usize, fc as usize);
                if v.is_finite() && !is_nodata(v, nodata_b) {
                    *cell = v;
                }
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::geometry::Bounds;
    use crate::geotransform::GeoTransform;
    use crate::raster::MemoryRaster;
    use crate::registry::{MemoryRegistry, RasterRegistry};
    use approx::assert_relative_eq;

    const ND: f64 = -9999.0;

    fn grid(ox: f64, oy: f64, size: f64, w: usize, h: usize, f: impl Fn(usize, usize) -> f64) -> MemoryRaster {
        MemoryRaster::from_fn(w, h, GeoTransform::north_up(ox, oy, size, -size), Crs::from_epsg(32633).unwrap(), f)
            .with_nodata(Some(ND))
    }

    fn aligner() -> CrossRasterAligner {
        CrossRasterAligner::new(PixelInclusion::Center, 21)
    }

    #[test]
    fn identical_rasters_pair_perfectly() {
        let r = grid(0.0, 10.0, 1.0, 10, 10, |r, c| ((r * 7 + c * 3) % 11) as f64);
        let reg = MemoryRegistry::new().with("a", r.clone()).with("b", r);
        let (mut a, mut b) = (reg.open("a").unwrap(), reg.open("b").unwrap());
        let g = Geometry::rectangle(&Bounds::new(1.0, 1.0, 9.0, 9.0));
        let s = aligner().align(&mut a, &mut b, &g).unwrap();
        assert_eq!(s.len(), 64);
        assert_eq!(s.x_vals, s.y_vals);
        let stats = PairedStats::compute(&s, 32);
        assert_relative_eq!(stats.pearson_r.unwrap(), 1.0, epsilon = 1e-12);
        let reg = stats.regression.unwrap();
        assert_relative_eq!(reg.slope, 1.0, epsilon = 1e-12);
        assert_relative_eq!(reg.intercept, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn coarser_b_is_sampled_nearest() {
        // B has 2-unit pixels over the same extent; value encodes its own cell.
        let a = grid(0.0, 8.0, 1.0, 8, 8, |r, c| (r * 8 + c) as f64);
        let b = grid(0.0, 8.0, 2.0, 4, 4, |r, c| (r * 10 + c) as f64);
        let reg = MemoryRegistry::new().with("a", a).with("b", b);
        let (mut a, mut b) = (reg.open("a").unwrap(), reg.open("b").unwrap());
        let g = Geometry::rectangle(&Bounds::new(0.0, 0.0, 8.0, 8.0));
        let s = aligner().align(&mut a, &mut b, &g).unwrap();
        assert_eq!(s.len(), 64);
        for (i, &y) in s.y_vals.iter().enumerate() {
            let (row, col) = (i / 8, i % 8);
            assert_eq!(y, ((row / 2) * 10 + col / 2) as f64);
        }
    }

    #[test]
    fn reprojected_b_is_sampled_nearest() {
        // A: 1 km Web Mercator pixels; B: 0.001° geographic pixels covering A.
        let merc = Crs::from_epsg(3857).unwrap();
        let a_transform = GeoTransform::north_up(0.0, 10_000.0, 1000.0, -1000.0);
        let b_transform = GeoTransform::north_up(0.0, 0.1, 0.001, -0.001);
        let a = MemoryRaster::from_fn(10, 10, a_transform, merc.clone(), |r, c| (r * 10 + c) as f64);
        let b = MemoryRaster::from_fn(100, 100, b_transform, Crs::wgs84(), |r, c| (r * 1000 + c) as f64);
        let reg = MemoryRegistry::new().with("a", a).with("b", b);
        let (mut a, mut b) = (reg.open("a").unwrap(), reg.open("b").unwrap());
        let g = Geometry::rectangle(&Bounds::new(0.0, 0.0, 10_000.0, 10_000.0));
        let s = aligner().align(&mut a, &mut b, &g).unwrap();
        assert_eq!(s.len(), 100);

        let to_wgs84 = CoordinateProjector::new(&merc, &Crs::wgs84()).unwrap();
        for (&x, &y) in s.x_vals.iter().zip(&s.y_vals) {
            let (row, col) = (x as usize / 10, x as usize % 10);
            let (mx, my) = a_transform.pixel_to_world(row, col);
            let (lon, lat) = to_wgs84.project_point(mx, my).unwrap();
            let (br, bc) = b_transform.world_to_pixel(lon, lat).unwrap();
            assert_eq!(y, (br * 1000 + bc) as f64, "A pixel ({row}, {col})");
        }
        // Pixel (0, 0) of A is centred on (500 m, 9500 m), about (0.00449°, 0.08534°).
        assert_eq!(s.y_vals[0], 14_004.0);
    }

    #[test]
    fn partial_overlap_and_nodata_drop_pairs() {
        let a = grid(0.0, 4.0, 1.0, 4, 4, |_, _| 1.0);
        // B covers only the left half and has one nodata cell.
        let b = grid(0.0, 4.0, 1.0, 2, 4, |r, c| if (r, c) == (0, 0) { ND } else { 2.0 });
        let reg = MemoryRegistry::new().with("a", a).with("b", b);
        let (mut a, mut b) = (reg.open("a").unwrap(), reg.open("b").unwrap());
        let g = Geometry::rectangle(&Bounds::new(0.0, 0.0, 4.0, 4.0));
        let s = aligner().align(&mut a, &mut b, &g).unwrap();
        assert_eq!(s.masked_pixels, 16);
        assert_eq!(s.len(), 7);
        // Constant data: no correlation, not zero.
        let stats = PairedStats::compute(&s, 8);
        assert!(stats.pearson_r.is_none() && stats.regression.is_none());
        assert_eq!(stats.x.count, 7);
    }

    #[test]
    fn disjoint_b_gives_empty_sample() {
        let a = grid(0.0, 4.0, 1.0, 4, 4, |_, _| 1.0);
        let b = grid(100.0, 104.0, 1.0, 4, 4, |_, _| 1.0);
        let reg = MemoryRegistry::new().with("a", a).with("b", b);
        let (mut a, mut b) = (reg.open("a").unwrap(), reg.open("b").unwrap());
        let g = Geometry::rectangle(&Bounds::new(0.0, 0.0, 4.0, 4.0));
        let s = aligner().align(&mut a, &mut b, &g).unwrap();
        assert!(s.is_empty());
        assert_eq!(s.masked_pixels, 16);
        assert_eq!(s.coverage_ratio(), 0.0);
        let stats = PairedStats::compute(&s, 8);
        assert_eq!(stats.n, 0);
        assert!(stats.joint_histogram.is_none());
    }

    #[test]
    fn subsample_is_deterministic() {
        let s = PairedSample {
            x_vals: (0..10_000).map(f64::from).collect(),
            y_vals: (0..10_000).map(|i| f64::from(i) * 2.0).collect(),
            masked_pixels: 10_000,
            window: None,
        };
        let p1 = s.subsample(500, 42);
        let p2 = s.subsample(500, 42);
        assert_eq!(p1, p2);
        assert_eq!(p1.x.len(), 500);
        assert!(p1.subsampled);
        assert_eq!(p1.total, 10_000);
        assert!(p1.x.windows(2).all(|w| w[0] < w[1]));
        assert!(p1.x.iter().zip(&p1.y).all(|(x, y)| *y == x * 2.0));
        assert!(!s.subsample(20_000, 42).subsampled);
    }

    #[test]
    fn joint_histogram_counts_all_pairs() {
        let s = PairedSample {
            x_vals: vec![0.0, 1.0, 2.0, 3.0],
            y_vals: vec![3.0, 2.0, 1.0, 0.0],
            masked_pixels: 4,
            window: None,
        };
        let stats = PairedStats::compute(&s, 2);
        let jh = stats.joint_histogram.unwrap();
        assert_eq!(jh.counts, vec![vec![0, 2], vec![2, 0]]);
        assert_relative_eq!(stats.pearson_r.unwrap(), -1.0);
    }
}
