use crate::errors::{OgrioError, Result};
use crate::vector::schema::{Dimensions, GeometryType};

/// A single position. `z` and `m` are present only for 3D and measured
/// geometries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Coord {
            x,
            y,
            z: None,
            m: None,
        }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: None,
        }
    }

    pub fn xym(x: f64, y: f64, m: f64) -> Self {
        Coord {
            x,
            y,
            z: None,
            m: Some(m),
        }
    }

    pub fn xyzm(x: f64, y: f64, z: f64, m: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: Some(m),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.z.is_some(), self.m.is_some())
    }
}

/// An axis-aligned bounding box, with a z range for 3D data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub z_range: Option<(f64, f64)>,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
            z_range: None,
        }
    }

    /// Closed-interval test in the xy plane: touching boxes intersect.
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, coord: &Coord) -> bool {
        self.min_x <= coord.x
            && coord.x <= self.max_x
            && self.min_y <= coord.y
            && coord.y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    fn expand(&mut self, coord: &Coord) {
        self.min_x = self.min_x.min(coord.x);
        self.min_y = self.min_y.min(coord.y);
        self.max_x = self.max_x.max(coord.x);
        self.max_y = self.max_y.max(coord.y);
        if let Some(z) = coord.z {
            self.z_range = Some(match self.z_range {
                Some((lo, hi)) => (lo.min(z), hi.max(z)),
                None => (z, z),
            });
        }
    }
}

/// A geometry value, decoupled from any native object.
///
/// Polygons are lists of rings, the first one being the exterior. Rings are
/// expected to be closed but this is not enforced.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// `None` is the empty point.
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
        }
    }

    pub fn is_empty(&self) -> bool {
        let mut empty = true;
        self.for_each_coord(&mut |_| empty = false);
        empty
    }

    /// Dimensions of the first coordinate, `Xy` for empty geometries.
    pub fn dimensions(&self) -> Dimensions {
        let mut dims = None;
        self.for_each_coord(&mut |c| {
            dims.get_or_insert(c.dimensions());
        });
        dims.unwrap_or_default()
    }

    pub fn has_z(&self) -> bool {
        self.dimensions().has_z()
    }

    pub fn has_m(&self) -> bool {
        self.dimensions().has_m()
    }

    /// Checks that every coordinate has the same dimensions and returns them.
    pub fn uniform_dimensions(&self) -> Result<Dimensions> {
        let mut first = None;
        let mut mixed = false;
        self.for_each_coord(&mut |c| {
            let dims = c.dimensions();
            match first {
                None => first = Some(dims),
                Some(d) if d != dims => mixed = true,
                _ => {}
            }
        });
        if mixed {
            return Err(OgrioError::GeometryConversionError {
                msg: format!("{} mixes coordinate dimensions", self.geometry_type()),
                native: None,
            });
        }
        Ok(first.unwrap_or_default())
    }

    /// The bounding box, or `None` for an empty geometry.
    pub fn envelope(&self) -> Option<Envelope> {
        let mut envelope: Option<Envelope> = None;
        self.for_each_coord(&mut |c| match envelope.as_mut() {
            Some(env) => env.expand(c),
            None => {
                let mut env = Envelope::new(c.x, c.y, c.x, c.y);
                env.z_range = c.z.map(|z| (z, z));
                envelope = Some(env);
            }
        });
        envelope
    }

    /// Visits every coordinate in encoding order.
    pub fn for_each_coord<F: FnMut(&Coord)>(&self, f: &mut F) {
        match self {
            Geometry::Point(p) => p.iter().for_each(|c| f(c)),
            Geometry::LineString(coords) | Geometry::MultiPoint(coords) => {
                coords.iter().for_each(|c| f(c))
            }
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                rings.iter().flatten().for_each(|c| f(c))
            }
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().flatten().flatten().for_each(|c| f(c))
            }
            Geometry::GeometryCollection(members) => {
                members.iter().for_each(|g| g.for_each_coord(f))
            }
        }
    }

    pub fn for_each_coord_mut<F: FnMut(&mut Coord)>(&mut self, f: &mut F) {
        match self {
            Geometry::Point(p) => p.iter_mut().for_each(|c| f(c)),
            Geometry::LineString(coords) | Geometry::MultiPoint(coords) => {
                coords.iter_mut().for_each(|c| f(c))
            }
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                rings.iter_mut().flatten().for_each(|c| f(c))
            }
            Geometry::MultiPolygon(polygons) => polygons
                .iter_mut()
                .flatten()
                .flatten()
                .for_each(|c| f(c)),
            Geometry::GeometryCollection(members) => {
                members.iter_mut().for_each(|g| g.for_each_coord_mut(f))
            }
        }
    }
}

impl From<geo_types::Coord<f64>> for Coord {
    fn from(c: geo_types::Coord<f64>) -> Self {
        Coord::xy(c.x, c.y)
    }
}

impl From<Coord> for geo_types::Coord<f64> {
    fn from(c: Coord) -> Self {
        geo_types::Coord { x: c.x, y: c.y }
    }
}

fn line_coords(line: &geo_types::LineString<f64>) -> Vec<Coord> {
    line.0.iter().map(|c| Coord::from(*c)).collect()
}

fn polygon_rings(polygon: &geo_types::Polygon<f64>) -> Vec<Vec<Coord>> {
    let exterior = polygon.exterior();
    if exterior.0.is_empty() {
        return Vec::new();
    }
    std::iter::once(exterior)
        .chain(polygon.interiors())
        .map(line_coords)
        .collect()
}

impl From<&geo_types::Geometry<f64>> for Geometry {
    /// Drops z and m, which `geo-types` does not model. `Line`, `Rect` and
    /// `Triangle` become their line string and polygon equivalents.
    fn from(geo: &geo_types::Geometry<f64>) -> Self {
        use geo_types::Geometry as G;
        match geo {
            G::Point(p) => Geometry::Point(Some(Coord::xy(p.x(), p.y()))),
            G::Line(l) => Geometry::LineString(vec![l.start.into(), l.end.into()]),
            G::LineString(l) => Geometry::LineString(line_coords(l)),
            G::Polygon(p) => Geometry::Polygon(polygon_rings(p)),
            G::MultiPoint(mp) => {
                Geometry::MultiPoint(mp.0.iter().map(|p| Coord::xy(p.x(), p.y())).collect())
            }
            G::MultiLineString(ml) => {
                Geometry::MultiLineString(ml.0.iter().map(line_coords).collect())
            }
            G::MultiPolygon(mp) => Geometry::MultiPolygon(mp.0.iter().map(polygon_rings).collect()),
            G::GeometryCollection(gc) => {
                Geometry::GeometryCollection(gc.0.iter().map(Geometry::from).collect())
            }
            G::Rect(r) => Geometry::Polygon(polygon_rings(&r.to_polygon())),
            G::Triangle(t) => Geometry::Polygon(polygon_rings(&t.to_polygon())),
        }
    }
}

impl From<geo_types::Geometry<f64>> for Geometry {
    fn from(geo: geo_types::Geometry<f64>) -> Self {
        Geometry::from(&geo)
    }
}

fn to_geo_line(coords: &[Coord]) -> geo_types::LineString<f64> {
    geo_types::LineString(coords.iter().map(|c| (*c).into()).collect())
}

fn to_geo_polygon(rings: &[Vec<Coord>]) -> geo_types::Polygon<f64> {
    match rings.split_first() {
        Some((exterior, interiors)) => geo_types::Polygon::new(
            to_geo_line(exterior),
            interiors.iter().map(|r| to_geo_line(r)).collect(),
        ),
        None => geo_types::Polygon::new(geo_types::LineString(Vec::new()), Vec::new()),
    }
}

impl TryFrom<&Geometry> for geo_types::Geometry<f64> {
    type Error = OgrioError;

    /// Fails for the empty point, which `geo-types` cannot represent.
    fn try_from(geometry: &Geometry) -> Result<Self> {
        use geo_types::Geometry as G;
        Ok(match geometry {
            Geometry::Point(Some(c)) => G::Point(geo_types::Point::from(geo_types::Coord::from(*c))),
            Geometry::Point(None) => {
                return Err(OgrioError::GeometryConversionError {
                    msg: "empty points have no geo-types equivalent".to_string(),
                    native: None,
                })
            }
            Geometry::LineString(coords) => G::LineString(to_geo_line(coords)),
            Geometry::Polygon(rings) => G::Polygon(to_geo_polygon(rings)),
            Geometry::MultiPoint(coords) => G::MultiPoint(geo_types::MultiPoint(
                coords
                    .iter()
                    .map(|c| geo_types::Point::from(geo_types::Coord::from(*c)))
                    .collect(),
            )),
            Geometry::MultiLineString(lines) => G::MultiLineString(geo_types::MultiLineString(
                lines.iter().map(|l| to_geo_line(l)).collect(),
            )),
            Geometry::MultiPolygon(polygons) => G::MultiPolygon(geo_types::MultiPolygon(
                polygons.iter().map(|p| to_geo_polygon(p)).collect(),
            )),
            Geometry::GeometryCollection(members) => {
                G::GeometryCollection(geo_types::GeometryCollection(
                    members
                        .iter()
                        .map(geo_types::Geometry::try_from)
                        .collect::<Result<Vec<_>>>()?,
                ))
            }
        })
    }
}

impl TryFrom<Geometry> for geo_types::Geometry<f64> {
    type Error = OgrioError;

    fn try_from(geometry: Geometry) -> Result<Self> {
        geo_types::Geometry::try_from(&geometry)
    }
}
