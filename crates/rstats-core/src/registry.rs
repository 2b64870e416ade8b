//! Raster registry: a read-only lookup from raster id to storage.
//!
//! The registry is injected into every query; there is no global state.
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Result, StatsError};
use crate::raster::{GeoTiffRaster, MemoryRaster, RasterHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    /// Filled from the registry key when loading a file.
    #[serde(default)]
    pub id: String,
    pub file_path: PathBuf,
    /// Overrides the nodata value stored in the file.
    #[serde(default)]
    pub nodata: Option<f64>,
    /// Free-text units; reported, never enforced.
    #[serde(default)]
    pub units: Option<String>,
    /// Overrides (or supplies) the CRS of the file.
    #[serde(default)]
    pub crs: Option<Crs>,
}

impl RasterMetadata {
    pub fn new(id: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            nodata: None,
            units: None,
            crs: None,
        }
    }
}

pub trait RasterRegistry: Send + Sync {
    /// Registered ids in sorted order.
    fn ids(&self) -> Vec<String>;

    fn metadata(&self, id: &str) -> Result<&RasterMetadata>;

    /// Open a fresh handle for one query.
    fn open(&self, id: &str) -> Result<RasterHandle>;
}

// ── FileRegistry ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    layers: BTreeMap<String, RasterMetadata>,
}

/// GeoTIFF rasters on disk, described by a JSON file of the form
/// `{"layers": {"<id>": {"file_path": ..., "nodata": ..., "units": ...}}}`.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    layers: BTreeMap<String, RasterMetadata>,
}

impl FileRegistry {
    pub fn new(layers: impl IntoIterator<Item = RasterMetadata>) -> Self {
        Self {
            layers: layers.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Load a registry file, expanding `$VAR` / `${VAR}` references first.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StatsError::Config(format!("cannot read registry {}: {e}", path.display())))?;
        let registry = Self::from_json_str(&expand_env_vars(&raw))?;
        tracing::info!(path = %path.display(), layers = registry.layers.len(), "loaded raster registry");
        Ok(registry)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(text)
            .map_err(|e| StatsError::Config(format!("invalid registry: {e}")))?;
        let layers = file
            .layers
            .into_iter()
            .map(|(id, mut meta)| {
                meta.id = id.clone();
                (id, meta)
            })
            .collect();
        Ok(Self { layers })
    }
}

impl RasterRegistry for FileRegistry {
    fn ids(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    fn metadata(&self, id: &str) -> Result<&RasterMetadata> {
        self.layers
            .get(id)
            .ok_or_else(|| StatsError::RasterNotFound(id.to_string()))
    }

    fn open(&self, id: &str) -> Result<RasterHandle> {
        let meta = self.metadata(id)?;
        if !meta.file_path.exists() {
            return Err(StatsError::RasterFileMissing {
                id: id.to_string(),
                path: meta.file_path.display().to_string(),
            });
        }
        let source = GeoTiffRaster::open(&meta.file_path, meta.crs.as_ref())?;
        Ok(RasterHandle::new(meta.clone(), Box::new(source)))
    }
}

/// Shell-style expansion of `$VAR` and `${VAR}`; unset variables are left
/// untouched.
pub fn expand_env_vars(text: &str) -> String {
    expand_vars_with(text, |name| std::env::var(name).ok())
}

fn expand_vars_with(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let is_name = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if braced[..end].chars().all(is_name) => (&braced[..end], end + 2),
                _ => ("", 0),
            }
        } else {
            let end = after.find(|c: char| !is_name(c)).unwrap_or(after.len());
            (&after[..end], end)
        };
        match (!name.is_empty()).then(|| lookup(name)).flatten() {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

// ── MemoryRegistry ───────────────────────────────────────────────────────────

/// In-memory rasters; each `open` hands out an independent copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    rasters: BTreeMap<String, (RasterMetadata, MemoryRaster)>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, raster: MemoryRaster) -> &mut RasterMetadata {
        let meta = RasterMetadata::new(id, format!("memory://{id}"));
        match self.rasters.entry(id.to_string()) {
            Entry::Vacant(slot) => &mut slot.insert((meta, raster)).0,
            Entry::Occupied(mut slot) => {
                slot.insert((meta, raster));
                &mut slot.into_mut().0
            }
        }
    }

    pub fn with(mut self, id: &str, raster: MemoryRaster) -> Self {
        self.insert(id, raster);
        self
    }
}

impl RasterRegistry for MemoryRegistry {
    fn ids(&self) -> Vec<String> {
        self.rasters.keys().cloned().collect()
    }

    fn metadata(&self, id: &str) -> Result<&RasterMetadata> {
        self.rasters
            .get(id)
            .map(|(meta, _)| meta)
            .ok_or_else(|| StatsError::RasterNotFound(id.to_string()))
    }

    fn open(&self, id: &str) -> Result<RasterHandle> {
        let (meta, raster) = self
            .rasters
            .get(id)
            .ok_or_else(|| StatsError::RasterNotFound(id.to_string()))?;
        Ok(RasterHandle::new(meta.clone(), Box::new(raster.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::geotransform::GeoTransform;
    use crate::raster::write_geotiff;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "DATA" => Some("/srv/data".into()),
            "NODATA" => Some("-9999".into()),
            _ => None,
        }
    }

    #[test]
    fn env_expansion() {
        assert_eq!(expand_vars_with("$DATA/dem.tif", lookup), "/srv/data/dem.tif");
        assert_eq!(expand_vars_with("${DATA}_x", lookup), "/srv/data_x");
        assert_eq!(expand_vars_with("$MISSING/a ${NOPE} $", lookup), "$MISSING/a ${NOPE} $");
        assert_eq!(expand_vars_with("cost: 5$ {x}", lookup), "cost: 5$ {x}");
        assert_eq!(expand_vars_with("${unterminated", lookup), "${unterminated");
        assert_eq!(expand_vars_with("n=$NODATA;", lookup), "n=-9999;");
    }

    #[test]
    fn registry_json_sets_ids() {
        let reg = FileRegistry::from_json_str(
            r#"{"layers": {
                "dem": {"file_path": "/data/dem.tif", "nodata": -9999, "units": "m"},
                "slope": {"file_path": "/data/slope.tif", "crs": "EPSG:32633"}
            }}"#,
        )
        .unwrap();
        assert_eq!(reg.ids(), vec!["dem", "slope"]);
        let dem = reg.metadata("dem").unwrap();
        assert_eq!(dem.id, "dem");
        assert_eq!(dem.nodata, Some(-9999.0));
        assert_eq!(dem.units.as_deref(), Some("m"));
        assert_eq!(reg.metadata("slope").unwrap().crs.as_ref().and_then(Crs::epsg), Some(32633));
        assert!(FileRegistry::from_json_str("{\"layers\": 3}").is_err());
    }

    #[test]
    fn missing_id_and_missing_file() {
        let reg = FileRegistry::new([RasterMetadata::new("gone", "/nonexistent/gone.tif")]);
        assert_eq!(reg.open("nope").unwrap_err().kind(), ErrorKind::NotFound);
        let err = reg.open("gone").unwrap_err();
        assert!(matches!(err, StatsError::RasterFileMissing { .. }));
        assert_eq!(err.kind(), ErrorKind::DataError);
    }

    #[test]
    fn file_registry_opens_geotiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let src = MemoryRaster::from_fn(4, 4, GeoTransform::north_up(0.0, 4.0, 1.0, -1.0), Crs::wgs84(), |r, c| (r + c) as f64);
        write_geotiff(std::fs::File::create(&path).unwrap(), &src, None).unwrap();

        let json = format!(
            r#"{{"layers": {{"dem": {{"file_path": "{}", "nodata": 0, "units": "m"}}}}}}"#,
            path.display()
        );
        let reg_path = dir.path().join("registry.json");
        std::fs::write(&reg_path, json).unwrap();

        let reg = FileRegistry::from_file(&reg_path).unwrap();
        let h = reg.open("dem").unwrap();
        assert_eq!(h.nodata(), Some(0.0));
        assert_eq!(h.units(), Some("m"));
        assert_eq!((h.width(), h.height()), (4, 4));
    }

    #[test]
    fn memory_registry_hands_out_copies() {
        let raster = MemoryRaster::from_fn(2, 2, GeoTransform::north_up(0.0, 2.0, 1.0, -1.0), Crs::wgs84(), |_, _| 1.0);
        let mut reg = MemoryRegistry::new();
        reg.insert("a", raster).units = Some("kg".into());
        let h = reg.open("a").unwrap();
        assert_eq!(h.units(), Some("kg"));
        assert!(matches!(reg.open("b"), Err(StatsError::RasterNotFound(_))));
    }
}
