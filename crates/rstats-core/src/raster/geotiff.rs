//! Pure-Rust GeoTIFF backend on the `tiff` crate.
//!
//! Only band 1 is read. Windows are assembled chunk by chunk (strips or
//! tiles), so a small window of a large file decodes only the chunks it
//! touches.
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use super::{MemoryRaster, RasterSource};
use crate::crs::Crs;
use crate::error::{Result, StatsError};
use crate::geotransform::GeoTransform;
use crate::window::Window;

// GeoKey ids and values.
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_PROJECTED: u16 = 1;
const MODEL_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

pub struct GeoTiffRaster {
    decoder: Decoder<BufReader<File>>,
    path: PathBuf,
    width: usize,
    height: usize,
    /// Interleaved samples per pixel inside a chunk.
    samples: usize,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
}

impl GeoTiffRaster {
    /// Open a GeoTIFF. `crs_override` is used when set, and is required when
    /// the file carries no EPSG code in its GeoKey directory.
    pub fn open(path: &Path, crs_override: Option<&Crs>) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| StatsError::Io(format!("failed to open {}: {e}", path.display())))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (width, height) = decoder.dimensions()?;

        let samples_per_pixel = decoder
            .find_tag_unsigned::<u32>(Tag::SamplesPerPixel)?
            .unwrap_or(1) as usize;
        let planar = decoder
            .find_tag_unsigned::<u32>(Tag::PlanarConfiguration)?
            .unwrap_or(1);
        // Planar images store band 1 in its own leading chunks.
        let samples = if planar == 2 { 1 } else { samples_per_pixel.max(1) };

        let geokeys = read_geokeys(&mut decoder)?;
        let pixel_is_point = geokey(&geokeys, GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT);
        let transform = read_transform(&mut decoder, pixel_is_point)?;
        let nodata = read_nodata(&mut decoder)?;

        let crs = match crs_override {
            Some(crs) => crs.clone(),
            None => {
                let code = geokey(&geokeys, PROJECTED_CS_TYPE)
                    .or_else(|| geokey(&geokeys, GEOGRAPHIC_TYPE))
                    .filter(|&c| c != USER_DEFINED)
                    .ok_or_else(|| {
                        StatsError::Io(format!("{} has no EPSG code in its GeoKeys", path.display()))
                    })?;
                Crs::from_epsg(code)?
            }
        };

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = (chunk_width as usize).max(1);
        let chunk_height = (chunk_height as usize).max(1);
        let chunks_across = (width as usize).div_ceil(chunk_width);

        tracing::debug!(
            path = %path.display(),
            width,
            height,
            chunk_width,
            chunk_height,
            %crs,
            "opened GeoTIFF"
        );

        Ok(Self {
            decoder,
            path: path.to_path_buf(),
            width: width as usize,
            height: height as usize,
            samples,
            chunk_width,
            chunk_height,
            chunks_across,
            transform,
            crs,
            nodata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RasterSource for GeoTiffRaster {
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
        if window.is_empty() || !window.fits(self.width, self.height) {
            return Err(StatsError::Io(format!(
                "window {window:?} outside {}x{} raster {}",
                self.width,
                self.height,
                self.path.display()
            )));
        }
        let (cw, ch) = (self.chunk_width, self.chunk_height);
        let mut out = vec![f64::NAN; window.pixel_count()];

        for cy in window.row_off / ch..=(window.row_end() - 1) / ch {
            for cx in window.col_off / cw..=(window.col_end() - 1) / cw {
                let index = u32::try_from(cy * self.chunks_across + cx)
                    .map_err(|_| StatsError::Io("chunk index overflow".into()))?;
                let (dw, dh) = self.decoder.chunk_data_dimensions(index);
                let (dw, dh) = (dw as usize, dh as usize);
                let data = convert_to_f64(self.decoder.read_chunk(index)?, self.samples)?;
                if data.len() < dw * dh {
                    return Err(StatsError::Io(format!(
                        "chunk {index} of {} holds {} values, expected {}",
                        self.path.display(),
                        data.len(),
                        dw * dh
                    )));
                }

                let (ox, oy) = (cx * cw, cy * ch);
                let c0 = ox.max(window.col_off);
                let c1 = (ox + dw).min(window.col_end());
                for r in oy.max(window.row_off)..(oy + dh).min(window.row_end()) {
                    let src = (r - oy) * dw;
                    let dst = (r - window.row_off) * window.width;
                    for c in c0..c1 {
                        out[dst + c - window.col_off] = data[src + c - ox];
                    }
                }
            }
        }
        Ok(out)
    }
}

// ── Tag readers ──────────────────────────────────────────────────────────────

/// (key id, tag location, value) entries of the GeoKey directory.
fn read_geokeys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<(u16, u16, u16)>> {
    let Some(raw) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
        return Ok(Vec::new());
    };
    let dir = raw.into_u16_vec()?;
    if dir.len() < 4 {
        return Ok(Vec::new());
    }
    let declared = dir[3] as usize;
    Ok(dir[4..]
        .chunks_exact(4)
        .take(declared)
        .map(|k| (k[0], k[1], k[3]))
        .collect())
}

/// Inline (location 0) value of a GeoKey.
fn geokey(keys: &[(u16, u16, u16)], id: u16) -> Option<u16> {
    keys.iter()
        .find(|(key, location, _)| *key == id && *location == 0)
        .map(|&(_, _, value)| value)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>, pixel_is_point: bool) -> Result<GeoTransform> {
    let gt = if let Some(raw) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = raw.into_f64_vec()?;
        if m.len() < 16 {
            return Err(StatsError::Io(format!(
                "ModelTransformationTag holds {} values, expected 16",
                m.len()
            )));
        }
        GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7])
    } else {
        let tie = decoder
            .find_tag(Tag::ModelTiepointTag)?
            .ok_or_else(|| StatsError::Io("GeoTIFF is missing ModelTiepointTag".into()))?
            .into_f64_vec()?;
        let scale = decoder
            .find_tag(Tag::ModelPixelScaleTag)?
            .ok_or_else(|| StatsError::Io("GeoTIFF is missing ModelPixelScaleTag".into()))?
            .into_f64_vec()?;
        if tie.len() < 6 || scale.len() < 2 {
            return Err(StatsError::Io("malformed tiepoint or pixel scale tag".into()));
        }
        let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
        let (sx, sy) = (scale[0], scale[1]);
        GeoTransform::north_up(x - i * sx, y + j * sy, sx, -sy)
    };

    if !pixel_is_point {
        return Ok(gt);
    }
    // Tie point names a pixel centre; move the origin to the pixel corner.
    let (c, f) = gt.apply(-0.5, -0.5);
    Ok(GeoTransform::new(gt.a, gt.b, c, gt.d, gt.e, f))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    let Some(raw) = decoder.find_tag(Tag::GdalNodata)? else {
        return Ok(None);
    };
    let text = raw.into_string()?;
    let trimmed = text.trim_matches(char::from(0)).trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.eq_ignore_ascii_case("nan") {
        return Ok(Some(f64::NAN));
    }
    Ok(trimmed.parse().ok())
}

fn convert_to_f64(data: DecodingResult, samples: usize) -> Result<Vec<f64>> {
    fn first<T: Copy>(buf: Vec<T>, samples: usize, map: impl Fn(T) -> f64) -> Vec<f64> {
        buf.chunks(samples).map(|px| map(px[0])).collect()
    }
    let samples = samples.max(1);
    Ok(match data {
        DecodingResult::U8(buf) => first(buf, samples, f64::from),
        DecodingResult::U16(buf) => first(buf, samples, f64::from),
        DecodingResult::U32(buf) => first(buf, samples, f64::from),
        DecodingResult::U64(buf) => first(buf, samples, |v| v as f64),
        DecodingResult::I8(buf) => first(buf, samples, f64::from),
        DecodingResult::I16(buf) => first(buf, samples, f64::from),
        DecodingResult::I32(buf) => first(buf, samples, f64::from),
        DecodingResult::I64(buf) => first(buf, samples, |v| v as f64),
        DecodingResult::F32(buf) => first(buf, samples, f64::from),
        DecodingResult::F64(buf) => first(buf, samples, |v| v),
    })
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Write a single-band float32 GeoTIFF with georeferencing, EPSG code (when
/// known) and GDAL nodata. `rows_per_strip` controls the strip layout.
pub fn write_geotiff<W: Write + Seek>(
    writer: W,
    raster: &MemoryRaster,
    rows_per_strip: Option<u32>,
) -> Result<()> {
    let width = u32::try_from(raster.width)
        .map_err(|_| StatsError::InvalidArgument("raster too wide for TIFF".into()))?;
    let height = u32::try_from(raster.height)
        .map_err(|_| StatsError::InvalidArgument("raster too tall for TIFF".into()))?;
    let gt = raster.transform();
    let data: Vec<f32> = raster.data.iter().map(|&v| v as f32).collect();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(width, height)?;
    if let Some(rps) = rows_per_strip {
        image.rows_per_strip(rps.max(1))?;
    }

    let dir = image.encoder();
    if gt.is_rectilinear() && gt.e < 0.0 {
        dir.write_tag(Tag::ModelPixelScaleTag, &[gt.a, -gt.e, 0.0][..])?;
        dir.write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, gt.c, gt.f, 0.0][..])?;
    } else {
        let m = [
            gt.a, gt.b, 0.0, gt.c, //
            gt.d, gt.e, 0.0, gt.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::ModelTransformationTag, &m[..])?;
    }

    let crs = raster.crs();
    let mut keys: Vec<u16> = vec![1, 1, 0, 0];
    let mut push_key = |id: u16, value: u16| keys.extend_from_slice(&[id, 0, 1, value]);
    if crs.is_geographic() {
        push_key(GT_MODEL_TYPE, MODEL_GEOGRAPHIC);
    } else {
        push_key(GT_MODEL_TYPE, MODEL_PROJECTED);
    }
    push_key(GT_RASTER_TYPE, RASTER_PIXEL_IS_AREA);
    if let Some(code) = crs.epsg() {
        let key = if crs.is_geographic() { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
        push_key(key, code);
    }
    keys[3] = ((keys.len() - 4) / 4) as u16;
    dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;

    if let Some(nd) = raster.nodata() {
        let text = if nd.is_nan() { "nan".to_string() } else { nd.to_string() };
        dir.write_tag(Tag::GdalNodata, text.as_str())?;
    }

    image.write_data(&data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;

    fn fixture(rows_per_strip: Option<u32>, crs: &str) -> (tempfile::NamedTempFile, MemoryRaster) {
        let src = MemoryRaster::from_fn(
            7,
            5,
            GeoTransform::north_up(500_000.0, 4_100_000.0, 30.0, -30.0),
            crs.parse::<Crs>().unwrap(),
            |r, c| (r * 100 + c) as f64,
        )
        .with_nodata(Some(-9999.0));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_geotiff(file.as_file_mut(), &src, rows_per_strip).unwrap();
        (file, src)
    }

    #[test]
    fn metadata_round_trips() {
        let (file, src) = fixture(None, "EPSG:32633");
        let r = GeoTiffRaster::open(file.path(), None).unwrap();
        assert_eq!((r.width(), r.height()), (7, 5));
        assert_eq!(r.transform(), src.transform());
        assert_eq!(r.crs(), &"EPSG:32633".parse::<Crs>().unwrap());
        assert_eq!(r.nodata(), Some(-9999.0));
    }

    #[test]
    fn window_across_strips() {
        let (file, mut src) = fixture(Some(2), "EPSG:4326");
        let mut r = GeoTiffRaster::open(file.path(), None).unwrap();
        assert!(r.crs().is_geographic());
        for w in [Window::new(0, 0, 7, 5), Window::new(2, 1, 3, 3), Window::new(6, 4, 1, 1)] {
            assert_eq!(r.read_window(&w).unwrap(), src.read_window(&w).unwrap());
        }
        assert!(r.read_window(&Window::new(5, 0, 3, 1)).is_err());
    }

    #[test]
    fn crs_override_and_missing_file() {
        let (file, _) = fixture(None, "EPSG:32633");
        let utm34: Crs = "EPSG:32634".parse().unwrap();
        let r = GeoTiffRaster::open(file.path(), Some(&utm34)).unwrap();
        assert_eq!(r.crs(), &utm34);
        let missing = GeoTiffRaster::open(Path::new("/nonexistent/dem.tif"), None);
        assert!(matches!(missing, Err(StatsError::Io(_))));
    }

    #[test]
    fn rotated_transform_uses_matrix_tag() {
        let gt = GeoTransform::new(2.0, 0.5, 10.0, 0.5, -2.0, 20.0);
        let src = MemoryRaster::from_fn(3, 3, gt, Crs::wgs84(), |r, c| (r + c) as f64);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_geotiff(file.as_file_mut(), &src, None).unwrap();
        let r = GeoTiffRaster::open(file.path(), None).unwrap();
        assert_eq!(r.transform(), gt);
        assert_eq!(r.nodata(), None);
    }
}
