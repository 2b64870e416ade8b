use super::RasterSource;
use crate::crs::Crs;
use crate::error::{Result, StatsError};
use crate::geotransform::GeoTransform;
use crate::window::Window;

/// Raster held in memory, row-major.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
}

impl MemoryRaster {
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f64>,
        transform: GeoTransform,
        crs: Crs,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(StatsError::InvalidArgument(format!(
                "{} values for a {width}x{height} raster",
                data.len()
            )));
        }
        Ok(Self { data, width, height, transform, crs, nodata: None })
    }

    /// Fill from a function of (row, col).
    pub fn from_fn(
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: Crs,
        f: impl Fn(usize, usize) -> f64,
    ) -> Self {
        let data = (0..height)
            .flat_map(|r| (0..width).map(move |c| (r, c)))
            .map(|(r, c)| f(r, c))
            .collect();
        Self { data, width, height, transform, crs, nodata: None }
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.width + col] = val;
    }
}

impl RasterSource for MemoryRaster {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn crs(&self) -> &Crs {
        &self.crs
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read_window(&mut self, window: &Window) -> Result<Vec<f64>> {
        if !window.fits(self.width, self.height) {
            return Err(StatsError::Io(format!(
                "window {window:?} outside {}x{} raster",
                self.width, self.height
            )));
        }
        let mut out = Vec::with_capacity(window.pixel_count());
        for row in window.row_off..window.row_end() {
            let start = row * self.width + window.col_off;
            out.extend_from_slice(&self.data[start..start + window.width]);
        }
        Ok(out)
    }
}
