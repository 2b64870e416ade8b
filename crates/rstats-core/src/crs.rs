//! Coordinate reference systems and reprojection.
//!
//! Uses pure Rust (proj4rs + crs-definitions): EPSG codes are resolved to PROJ
//! strings from the bundled database, so no system PROJ install is needed.
//!
//! CRS equality is semantic: `EPSG:4326`, `epsg:4326`, `OGC:CRS84` and
//! `urn:ogc:def:crs:EPSG::4326` are the same CRS and never trigger a
//! reprojection.
use std::fmt;
use std::str::FromStr;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::geometry::{Bounds, Geometry, Position};

/// Common CRS identifiers.
pub mod codes {
    /// WGS84 geographic coordinates (lon, lat in degrees).
    pub const WGS84: &str = "EPSG:4326";
    /// Web Mercator (x, y in metres).
    pub const WEB_MERCATOR: &str = "EPSG:3857";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    /// Identifier as supplied by the caller.
    name: String,
    epsg: Option<u16>,
    proj4: String,
}

impl Crs {
    pub fn from_epsg(code: u16) -> Result<Self> {
        let proj4 = crs_definitions::from_code(code)
            .map(|def| def.proj4.to_string())
            .ok_or_else(|| {
                StatsError::Projection(format!("EPSG:{code} is not in the crs-definitions database"))
            })?;
        Ok(Self {
            name: format!("EPSG:{code}"),
            epsg: Some(code),
            proj4,
        })
    }

    pub fn from_proj4(definition: &str) -> Result<Self> {
        let proj4 = definition.trim();
        if !proj4.starts_with('+') {
            return Err(StatsError::Projection(format!(
                "not a PROJ definition: {definition:?}"
            )));
        }
        Ok(Self {
            name: proj4.to_string(),
            epsg: None,
            proj4: proj4.to_string(),
        })
    }

    pub fn wgs84() -> Self {
        // 4326 is always present in the bundled database; fall back to the
        // literal definition rather than unwrapping.
        Self::from_epsg(4326).unwrap_or_else(|_| Self {
            name: codes::WGS84.to_string(),
            epsg: Some(4326),
            proj4: "+proj=longlat +datum=WGS84 +no_defs".to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epsg(&self) -> Option<u16> {
        self.epsg
    }

    pub fn proj4(&self) -> &str {
        &self.proj4
    }

    /// True for longitude/latitude (degree based) systems.
    pub fn is_geographic(&self) -> bool {
        self.proj4.contains("+proj=longlat") || self.proj4.contains("+proj=latlong")
    }

    /// PROJ definition with tokens sorted and no-op tokens removed, so two
    /// spellings of the same definition compare equal.
    fn normalized_proj4(&self) -> String {
        let mut tokens: Vec<&str> = self
            .proj4
            .split_whitespace()
            .filter(|t| *t != "+no_defs" && *t != "+type=crs" && *t != "+wktext")
            .collect();
        tokens.sort_unstable();
        tokens.join(" ")
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        match (self.epsg, other.epsg) {
            (Some(a), Some(b)) => a == b,
            _ => self.normalized_proj4() == other.normalized_proj4(),
        }
    }
}

impl FromStr for Crs {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        let t = s.trim();
        if t.starts_with('+') {
            return Self::from_proj4(t);
        }
        let upper = t.to_ascii_uppercase();
        if matches!(upper.as_str(), "OGC:CRS84" | "CRS:84" | "CRS84" | "WGS84") {
            return Self::from_epsg(4326);
        }
        let code = upper
            .strip_prefix("EPSG:")
            .or_else(|| upper.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
            .or_else(|| upper.rsplit_once("/DEF/CRS/EPSG/0/").map(|(_, c)| c))
            .unwrap_or(upper.as_str());
        let code: u16 = code
            .parse()
            .map_err(|_| StatsError::Projection(format!("unrecognised CRS: {s:?}")))?;
        let mut crs = Self::from_epsg(code)?;
        crs.name = t.to_string();
        Ok(crs)
    }
}

impl TryFrom<String> for Crs {
    type Error = StatsError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.name
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg {
            Some(code) => write!(f, "EPSG:{code}"),
            None => f.write_str(&self.proj4),
        }
    }
}

// ── Projector ────────────────────────────────────────────────────────────────

/// Reprojects points, boxes and geometries between two CRSs.
/// Identity (no PROJ objects built) when the CRSs are equal.
pub struct CoordinateProjector {
    from: Crs,
    to: Crs,
    projs: Option<(Proj, Proj)>,
}

impl CoordinateProjector {
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        let projs = if from == to {
            tracing::debug!(%from, %to, "CRSs equal, reprojection skipped");
            None
        } else {
            let src = Proj::from_proj_string(from.proj4())
                .map_err(|e| StatsError::Projection(format!("invalid source projection {from}: {e:?}")))?;
            let dst = Proj::from_proj_string(to.proj4())
                .map_err(|e| StatsError::Projection(format!("invalid target projection {to}: {e:?}")))?;
            Some((src, dst))
        };
        Ok(Self {
            from: from.clone(),
            to: to.clone(),
            projs,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    pub fn project_point(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projs else {
            return Ok((x, y));
        };

        // proj4rs works in radians for geographic systems.
        let (x_in, y_in) = if self.from.is_geographic() {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };
        let mut point = (x_in, y_in, 0.0);
        transform(src, dst, &mut point).map_err(|e| {
            StatsError::Projection(format!(
                "transform of ({x}, {y}) from {} to {} failed: {e:?}",
                self.from, self.to
            ))
        })?;
        let out = if self.to.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if !out.0.is_finite() || !out.1.is_finite() {
            return Err(StatsError::Projection(format!(
                "({x}, {y}) has no finite image in {}",
                self.to
            )));
        }
        Ok(out)
    }

    /// Reproject a box by sampling `densify` points along each edge (plus the
    /// corners) and taking the bounds of the result.
    pub fn project_bbox(&self, bounds: &Bounds, densify: usize) -> Result<Bounds> {
        if self.is_identity() {
            return Ok(*bounds);
        }
        let steps = densify + 1;
        let mut pts = Vec::with_capacity(4 * (steps + 1));
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = bounds.min_x + t * bounds.width();
            let y = bounds.min_y + t * bounds.height();
            pts.push(self.project_point(x, bounds.min_y)?);
            pts.push(self.project_point(x, bounds.max_y)?);
            pts.push(self.project_point(bounds.min_x, y)?);
            pts.push(self.project_point(bounds.max_x, y)?);
        }
        Ok(Bounds::from_points(pts))
    }

    /// Reproject every position of a geometry; Z values are kept as-is.
    pub fn project_geometry(&self, geometry: &Geometry) -> Result<Geometry> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.map_positions(&mut |p: Position| {
            let (x, y) = self.project_point(p.x, p.y)?;
            Ok(Position { x, y, z: p.z })
        })
    }
}

pub fn project_point(x: f64, y: f64, from: &Crs, to: &Crs) -> Result<(f64, f64)> {
    CoordinateProjector::new(from, to)?.project_point(x, y)
}

pub fn project_bbox(bounds: &Bounds, from: &Crs, to: &Crs) -> Result<Bounds> {
    CoordinateProjector::new(from, to)?.project_bbox(bounds, 0)
}

pub fn project_geometry_coords(geometry: &Geometry, from: &Crs, to: &Crs) -> Result<Geometry> {
    CoordinateProjector::new(from, to)?.project_geometry(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn crs(s: &str) -> Crs {
        s.parse().unwrap()
    }

    #[test]
    fn spellings_of_wgs84_are_equal() {
        let base = crs("EPSG:4326");
        for s in ["epsg:4326", "4326", "OGC:CRS84", "urn:ogc:def:crs:EPSG::4326",
                  "http://www.opengis.net/def/crs/EPSG/0/4326"] {
            assert_eq!(crs(s), base, "{s}");
        }
        assert!(base.is_geographic());
    }

    #[test]
    fn proj_strings_compare_by_content() {
        let a = crs("+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs");
        let b = crs("+datum=WGS84 +proj=utm +units=m +zone=33");
        let c = crs("+proj=utm +zone=34 +datum=WGS84 +units=m");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_geographic());
    }

    #[test]
    fn different_codes_are_not_equal() {
        assert_ne!(crs("EPSG:4326"), crs("EPSG:3857"));
    }

    #[test]
    fn unknown_crs_is_rejected() {
        assert!("EPSG:notacode".parse::<Crs>().is_err());
        assert!("NAD27 please".parse::<Crs>().is_err());
    }

    #[test]
    fn equal_crs_is_identity_even_if_spelled_differently() {
        let p = CoordinateProjector::new(&crs("epsg:4326"), &crs("EPSG:4326")).unwrap();
        assert!(p.is_identity());
        assert_eq!(p.project_point(10.0, 51.5).unwrap(), (10.0, 51.5));
    }

    #[test]
    fn wgs84_to_mercator_round_trip() {
        let fwd = CoordinateProjector::new(&crs(codes::WGS84), &crs(codes::WEB_MERCATOR)).unwrap();
        let back = CoordinateProjector::new(&crs(codes::WEB_MERCATOR), &crs(codes::WGS84)).unwrap();
        let (x, y) = fwd.project_point(0.0, 0.0).unwrap();
        assert!(x.abs() < EPS && y.abs() < EPS);
        for (lon, lat) in [(10.0, 51.5), (-122.4, 37.8), (139.7, 35.7)] {
            let (x, y) = fwd.project_point(lon, lat).unwrap();
            let (lon2, lat2) = back.project_point(x, y).unwrap();
            assert!((lon - lon2).abs() < EPS && (lat - lat2).abs() < EPS);
        }
    }

    #[test]
    fn bbox_projection_contains_projected_corners() {
        let p = CoordinateProjector::new(&crs(codes::WGS84), &crs(codes::WEB_MERCATOR)).unwrap();
        let b = Bounds::new(-10.0, 40.0, 10.0, 60.0);
        let out = p.project_bbox(&b, 21).unwrap();
        for (x, y) in b.corners() {
            let (px, py) = p.project_point(x, y).unwrap();
            assert!(px >= out.min_x - EPS && px <= out.max_x + EPS);
            assert!(py >= out.min_y - EPS && py <= out.max_y + EPS);
        }
    }

    #[test]
    fn geometry_projection_keeps_z() {
        let g = Geometry::LineString {
            coordinates: vec![Position::with_z(0.0, 0.0, 7.0), Position::with_z(1.0, 1.0, 8.0)],
        };
        let out = project_geometry_coords(&g, &crs(codes::WGS84), &crs(codes::WEB_MERCATOR)).unwrap();
        let mut zs = Vec::new();
        out.for_each_position(&mut |p| zs.push(p.z));
        assert_eq!(zs, vec![Some(7.0), Some(8.0)]);
        assert_ne!(out, g);
    }
}
