//! GeoJSON-shaped query geometries and axis-aligned bounds.
//!
//! Geometries are immutable values: projection produces a new geometry via
//! [`Geometry::map_positions`] and never edits coordinates in place.
use geo::Centroid;
use serde::{Deserialize, Serialize};

// ── Position ─────────────────────────────────────────────────────────────────

/// One coordinate tuple. A third (Z) ordinate is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_z(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

impl TryFrom<Vec<f64>> for Position {
    type Error = String;

    fn try_from(v: Vec<f64>) -> Result<Self, Self::Error> {
        match v.as_slice() {
            [x, y] => Ok(Self::new(*x, *y)),
            [x, y, z, ..] => Ok(Self::with_z(*x, *y, *z)),
            _ => Err(format!("position needs at least 2 ordinates, got {}", v.len())),
        }
    }
}

impl From<Position> for Vec<f64> {
    fn from(p: Position) -> Self {
        match p.z {
            Some(z) => vec![p.x, p.y, z],
            None => vec![p.x, p.y],
        }
    }
}

// ── Bounds ───────────────────────────────────────────────────────────────────

/// Axis-aligned box `[min_x, min_y, max_x, max_y]` in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Build from two corners in any order.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    pub fn from_array(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Smallest box containing every point. Empty input yields an inverted
    /// (infinite) box that fails [`Bounds::is_finite`].
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut b = Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in points {
            b.min_x = b.min_x.min(x);
            b.min_y = b.min_y.min(y);
            b.max_x = b.max_x.max(x);
            b.max_y = b.max_y.max(y);
        }
        b
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Grow by `dx` on both x sides and `dy` on both y sides.
    pub fn pad(&self, dx: f64, dy: f64) -> Self {
        Self {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// Corners in SW, SE, NE, NW order.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Self::Point { coordinates: Position::new(x, y) }
    }

    /// Closed rectangular polygon covering `bounds`.
    pub fn rectangle(bounds: &Bounds) -> Self {
        let ring: Vec<Position> = bounds
            .corners()
            .iter()
            .chain(std::iter::once(&bounds.corners()[0]))
            .map(|&(x, y)| Position::new(x, y))
            .collect();
        Self::Polygon { coordinates: vec![ring] }
    }

    /// Visit every position, in document order.
    pub fn for_each_position(&self, f: &mut impl FnMut(&Position)) {
        match self {
            Self::Point { coordinates } => f(coordinates),
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                coordinates.iter().for_each(f)
            }
            Self::MultiLineString { coordinates } | Self::Polygon { coordinates } => {
                coordinates.iter().flatten().for_each(f)
            }
            Self::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().for_each(f)
            }
            Self::GeometryCollection { geometries } => {
                for g in geometries {
                    g.for_each_position(f);
                }
            }
        }
    }

    /// Rebuild the geometry with every position passed through `f`.
    pub fn map_positions<E>(
        &self,
        f: &mut impl FnMut(Position) -> Result<Position, E>,
    ) -> Result<Geometry, E> {
        fn ring<E>(
            r: &[Position],
            f: &mut impl FnMut(Position) -> Result<Position, E>,
        ) -> Result<Vec<Position>, E> {
            r.iter().map(|p| f(*p)).collect()
        }
        fn rings<E>(
            rs: &[Vec<Position>],
            f: &mut impl FnMut(Position) -> Result<Position, E>,
        ) -> Result<Vec<Vec<Position>>, E> {
            rs.iter().map(|r| ring(r, f)).collect()
        }

        Ok(match self {
            Self::Point { coordinates } => Self::Point { coordinates: f(*coordinates)? },
            Self::MultiPoint { coordinates } => Self::MultiPoint { coordinates: ring(coordinates, f)? },
            Self::LineString { coordinates } => Self::LineString { coordinates: ring(coordinates, f)? },
            Self::MultiLineString { coordinates } => {
                Self::MultiLineString { coordinates: rings(coordinates, f)? }
            }
            Self::Polygon { coordinates } => Self::Polygon { coordinates: rings(coordinates, f)? },
            Self::MultiPolygon { coordinates } => Self::MultiPolygon {
                coordinates: coordinates
                    .iter()
                    .map(|p| rings(p, f))
                    .collect::<Result<_, E>>()?,
            },
            Self::GeometryCollection { geometries } => Self::GeometryCollection {
                geometries: geometries
                    .iter()
                    .map(|g| g.map_positions(f))
                    .collect::<Result<_, E>>()?,
            },
        })
    }

    /// Bounding box, or `None` when the geometry has no positions.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut pts = Vec::new();
        self.for_each_position(&mut |p| pts.push((p.x, p.y)));
        let b = Bounds::from_points(pts);
        b.is_finite().then_some(b)
    }

    /// Whether the geometry encloses area (polygon-style query).
    pub fn is_areal(&self) -> bool {
        match self {
            Self::Polygon { .. } | Self::MultiPolygon { .. } => true,
            Self::GeometryCollection { geometries } => geometries.iter().any(Geometry::is_areal),
            _ => false,
        }
    }

    /// All polygonal parts as a single multipolygon (empty for points/lines).
    pub fn areal_parts(&self) -> geo::MultiPolygon<f64> {
        let mut polys = Vec::new();
        self.collect_polygons(&mut polys);
        geo::MultiPolygon(polys)
    }

    fn collect_polygons(&self, out: &mut Vec<geo::Polygon<f64>>) {
        match self {
            Self::Polygon { coordinates } => out.push(to_geo_polygon(coordinates)),
            Self::MultiPolygon { coordinates } => {
                out.extend(coordinates.iter().map(|p| to_geo_polygon(p)))
            }
            Self::GeometryCollection { geometries } => {
                for g in geometries {
                    g.collect_polygons(out);
                }
            }
            _ => {}
        }
    }

    pub fn to_geo(&self) -> geo::Geometry<f64> {
        match self {
            Self::Point { coordinates } => geo::Geometry::Point(to_coord(coordinates).into()),
            Self::MultiPoint { coordinates } => geo::Geometry::MultiPoint(geo::MultiPoint(
                coordinates.iter().map(|p| geo::Point::from(to_coord(p))).collect(),
            )),
            Self::LineString { coordinates } => {
                geo::Geometry::LineString(to_line_string(coordinates))
            }
            Self::MultiLineString { coordinates } => geo::Geometry::MultiLineString(
                geo::MultiLineString(coordinates.iter().map(|l| to_line_string(l)).collect()),
            ),
            Self::Polygon { coordinates } => geo::Geometry::Polygon(to_geo_polygon(coordinates)),
            Self::MultiPolygon { coordinates } => geo::Geometry::MultiPolygon(geo::MultiPolygon(
                coordinates.iter().map(|p| to_geo_polygon(p)).collect(),
            )),
            Self::GeometryCollection { geometries } => geo::Geometry::GeometryCollection(
                geo::GeometryCollection(geometries.iter().map(Geometry::to_geo).collect()),
            ),
        }
    }

    /// Area/length-weighted centroid, falling back to the bounds centre for
    /// degenerate inputs (zero-area rings, repeated points).
    pub fn centroid(&self) -> Option<(f64, f64)> {
        match self.to_geo().centroid() {
            Some(p) if p.x().is_finite() && p.y().is_finite() => Some((p.x(), p.y())),
            _ => self.bounds().map(|b| b.center()),
        }
    }

    /// Stable short hex digest of the coordinates, for log correlation.
    pub fn digest(&self) -> String {
        // FNV-1a over the ordinate bit patterns.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        let mut feed = |v: f64| {
            for byte in v.to_bits().to_le_bytes() {
                h ^= u64::from(byte);
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        self.for_each_position(&mut |p| {
            feed(p.x);
            feed(p.y);
        });
        format!("{h:016x}")
    }
}

fn to_coord(p: &Position) -> geo::Coord<f64> {
    geo::Coord { x: p.x, y: p.y }
}

fn to_line_string(ps: &[Position]) -> geo::LineString<f64> {
    geo::LineString(ps.iter().map(to_coord).collect())
}

fn to_geo_polygon(rings: &[Vec<Position>]) -> geo::Polygon<f64> {
    let mut it = rings.iter();
    let exterior = it.next().map(|r| to_line_string(r)).unwrap_or_else(|| geo::LineString(Vec::new()));
    let interiors = it.map(|r| to_line_string(r)).collect();
    geo::Polygon::new(exterior, interiors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::rectangle(&Bounds::new(x0, y0, x1, y1))
    }

    #[test]
    fn parses_geojson_polygon_with_z() {
        let g: Geometry = serde_json::from_str(
            r#"{"type":"Polygon","coordinates":[[[0,0,5],[2,0,5],[2,2,5],[0,2,5],[0,0,5]]]}"#,
        )
        .unwrap();
        let b = g.bounds().unwrap();
        assert_eq!(b.to_array(), [0.0, 0.0, 2.0, 2.0]);
        assert!(g.is_areal());
        let mut zs = Vec::new();
        g.for_each_position(&mut |p| zs.push(p.z));
        assert!(zs.iter().all(|z| *z == Some(5.0)));
    }

    #[test]
    fn rejects_short_positions() {
        let r: Result<Geometry, _> =
            serde_json::from_str(r#"{"type":"Point","coordinates":[1.0]}"#);
        assert!(r.is_err());
    }

    #[test]
    fn collection_bounds_and_areal_parts() {
        let g = Geometry::GeometryCollection {
            geometries: vec![Geometry::point(10.0, 10.0), square(0.0, 0.0, 1.0, 1.0)],
        };
        assert_eq!(g.bounds().unwrap().to_array(), [0.0, 0.0, 10.0, 10.0]);
        assert!(g.is_areal());
        assert_eq!(g.areal_parts().0.len(), 1);
        assert!(!Geometry::point(1.0, 1.0).is_areal());
    }

    #[test]
    fn centroid_of_square() {
        let (x, y) = square(0.0, 0.0, 4.0, 2.0).centroid().unwrap();
        assert!((x - 2.0).abs() < 1e-12 && (y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn map_positions_returns_new_value() {
        let g = square(0.0, 0.0, 1.0, 1.0);
        let shifted = g
            .map_positions(&mut |p| Ok::<_, ()>(Position { x: p.x + 1.0, ..p }))
            .unwrap();
        assert_eq!(g.bounds().unwrap().min_x, 0.0);
        assert_eq!(shifted.bounds().unwrap().min_x, 1.0);
    }

    #[test]
    fn digest_is_stable_and_coordinate_sensitive() {
        let a = square(0.0, 0.0, 1.0, 1.0);
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), square(0.0, 0.0, 1.0, 2.0).digest());
    }
}
