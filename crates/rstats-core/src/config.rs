//! Engine-wide tuning knobs.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::mask::PixelInclusion;
use crate::stats::MAX_BINS;

// ── EngineConfig ─────────────────────────────────────────────────────────────

/// Defaults match the behaviour of the HTTP service this engine backs.
/// Missing fields in a config file take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Polygon pixel rule when a query does not choose one. Default `center`.
    pub pixel_inclusion: PixelInclusion,
    /// Fixed histogram bins of window queries. Default 16.
    pub default_histogram_bins: usize,
    /// Cap of the adaptive histogram of geometry queries, 1..=64. Default 64.
    pub max_histogram_bins: usize,
    /// Plotting sample cap of compare queries. Default 5000.
    pub max_points: usize,
    /// Bins per axis of the compare joint histogram. Default 32.
    pub joint_histogram_bins: usize,
    /// Seed of the compare subsample. Default 42.
    pub subsample_seed: u64,
    /// Sub-windows read by the value-range sampler. Default 8.
    pub percentile_samples: usize,
    /// Sub-window size as a fraction of the raster. Default 0.1.
    pub percentile_fraction: f64,
    /// Report no area for degree-based CRSs in window queries. Default true.
    pub suppress_geographic_area: bool,
    /// Edge points when reprojecting a box. Default 21.
    pub bbox_densify_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pixel_inclusion: PixelInclusion::Center,
            default_histogram_bins: 16,
            max_histogram_bins: MAX_BINS,
            max_points: 5000,
            joint_histogram_bins: 32,
            subsample_seed: 42,
            percentile_samples: 8,
            percentile_fraction: 0.1,
            suppress_geographic_area: true,
            bbox_densify_points: 21,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StatsError::Config(format!("cannot read config {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| StatsError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(StatsError::Config(msg));
        if self.default_histogram_bins == 0 || self.joint_histogram_bins == 0 {
            return bad("histogram bin counts must be at least 1".into());
        }
        if self.max_histogram_bins == 0 || self.max_histogram_bins > MAX_BINS {
            return bad(format!("max_histogram_bins must be in 1..={MAX_BINS}"));
        }
        if self.default_histogram_bins > self.max_histogram_bins {
            return bad(format!(
                "default_histogram_bins {} exceeds max_histogram_bins {}",
                self.default_histogram_bins, self.max_histogram_bins
            ));
        }
        if self.max_points == 0 {
            return bad("max_points must be at least 1".into());
        }
        if self.percentile_samples == 0 {
            return bad("percentile_samples must be at least 1".into());
        }
        if !(self.percentile_fraction > 0.0 && self.percentile_fraction <= 1.0) {
            return bad(format!(
                "percentile_fraction must be in (0, 1], got {}",
                self.percentile_fraction
            ));
        }
        Ok(())
    }
}
