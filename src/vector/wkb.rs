//! ISO well-known binary codec.
//!
//! [`decode`] reads both byte orders and, besides the ISO dimension offsets
//! (`+1000` for Z, `+2000` for M, `+3000` for ZM), the legacy 2.5D flag and
//! the EWKB Z, M and SRID flags; an embedded SRID is skipped. [`encode`]
//! always writes little-endian ISO WKB.
//!
//! ```rust
//! use ogrio::vector::{wkb, Coord, Geometry};
//!
//! let point = Geometry::Point(Some(Coord::xy(1.0, 2.0)));
//! let bytes = wkb::encode(&point).unwrap();
//! assert_eq!(bytes.len(), 21);
//! assert_eq!(wkb::decode(&bytes).unwrap(), point);
//! ```

use std::ffi::{c_char, c_int};
use std::ptr;

use gdal_sys::{OGRErr, OGRGeometryH, OGRwkbByteOrder};

use crate::capture::with_error_capture;
use crate::errors::{OgrioError, Result};
use crate::vector::geometry::{Coord, Geometry};
use crate::vector::schema::{Dimensions, GeometryType};

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;
/// Deepest collection nesting accepted by [`decode`], as in GDAL.
const MAX_NESTING: usize = 32;

fn conversion_error(msg: impl Into<String>) -> OgrioError {
    OgrioError::GeometryConversionError {
        msg: msg.into(),
        native: None,
    }
}

struct Header {
    geometry_type: GeometryType,
    dims: Dimensions,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| {
            conversion_error(format!(
                "truncated WKB: need {N} bytes at offset {}, have {}",
                self.pos,
                self.data.len() - self.pos.min(self.data.len())
            ))
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let bytes = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    /// Reads an element count, rejecting counts the remaining input cannot
    /// possibly hold.
    fn count(&mut self, min_item_size: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        let remaining = self.data.len() - self.pos;
        if count.saturating_mul(min_item_size) > remaining {
            return Err(conversion_error(format!(
                "truncated WKB: {count} elements announced, {remaining} bytes left"
            )));
        }
        Ok(count)
    }

    fn header(&mut self) -> Result<Header> {
        let [order] = self.take::<1>()?;
        self.little_endian = match order {
            0 => false,
            1 => true,
            other => return Err(conversion_error(format!("invalid WKB byte order {other}"))),
        };
        let raw = self.u32()?;
        if raw & EWKB_SRID != 0 {
            self.u32()?;
        }
        let code = raw & !(EWKB_Z | EWKB_M | EWKB_SRID);
        let (iso_z, iso_m) = match code / 1000 {
            0 => (false, false),
            1 => (true, false),
            2 => (false, true),
            3 => (true, true),
            _ => return Err(conversion_error(format!("unsupported WKB type {raw:#x}"))),
        };
        let geometry_type = match code % 1000 {
            base @ 1..=7 => GeometryType::from_wkb_code(base),
            _ => None,
        }
        .ok_or_else(|| conversion_error(format!("unsupported WKB type {raw:#x}")))?;
        Ok(Header {
            geometry_type,
            dims: Dimensions::new(raw & EWKB_Z != 0 || iso_z, raw & EWKB_M != 0 || iso_m),
        })
    }

    fn coord(&mut self, dims: Dimensions) -> Result<Coord> {
        let x = self.f64()?;
        let y = self.f64()?;
        let z = if dims.has_z() { Some(self.f64()?) } else { None };
        let m = if dims.has_m() { Some(self.f64()?) } else { None };
        Ok(Coord { x, y, z, m })
    }

    fn coords(&mut self, dims: Dimensions) -> Result<Vec<Coord>> {
        let count = self.count(8 * dims.size())?;
        (0..count).map(|_| self.coord(dims)).collect()
    }

    fn rings(&mut self, dims: Dimensions) -> Result<Vec<Vec<Coord>>> {
        let count = self.count(4)?;
        (0..count).map(|_| self.coords(dims)).collect()
    }

    fn point_body(&mut self, dims: Dimensions) -> Result<Option<Coord>> {
        let coord = self.coord(dims)?;
        if coord.x.is_nan() && coord.y.is_nan() {
            Ok(None)
        } else {
            Ok(Some(coord))
        }
    }

    /// Reads the header of a child geometry and checks it against its
    /// container.
    fn child_header(&mut self, parent: &Header, expected: Option<GeometryType>) -> Result<Header> {
        let child = self.header()?;
        if let Some(expected) = expected {
            if child.geometry_type != expected {
                return Err(conversion_error(format!(
                    "{} cannot contain a {}",
                    parent.geometry_type, child.geometry_type
                )));
            }
        }
        if child.dims != parent.dims {
            return Err(conversion_error(format!(
                "{:?} child in a {:?} {}",
                child.dims, parent.dims, parent.geometry_type
            )));
        }
        Ok(child)
    }

    fn geometry(&mut self) -> Result<Geometry> {
        let header = self.header()?;
        self.body(&header, 0)
    }

    fn body(&mut self, header: &Header, depth: usize) -> Result<Geometry> {
        let dims = header.dims;
        Ok(match header.geometry_type {
            GeometryType::Point => Geometry::Point(self.point_body(dims)?),
            GeometryType::LineString => Geometry::LineString(self.coords(dims)?),
            GeometryType::Polygon => Geometry::Polygon(self.rings(dims)?),
            GeometryType::MultiPoint => {
                let count = self.count(5)?;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    self.child_header(header, Some(GeometryType::Point))?;
                    // Empty members cannot be represented and are dropped.
                    points.extend(self.point_body(dims)?);
                }
                Geometry::MultiPoint(points)
            }
            GeometryType::MultiLineString => {
                let count = self.count(9)?;
                let mut lines = Vec::with_capacity(count);
                for _ in 0..count {
                    self.child_header(header, Some(GeometryType::LineString))?;
                    lines.push(self.coords(dims)?);
                }
                Geometry::MultiLineString(lines)
            }
            GeometryType::MultiPolygon => {
                let count = self.count(9)?;
                let mut polygons = Vec::with_capacity(count);
                for _ in 0..count {
                    self.child_header(header, Some(GeometryType::Polygon))?;
                    polygons.push(self.rings(dims)?);
                }
                Geometry::MultiPolygon(polygons)
            }
            GeometryType::GeometryCollection => {
                if depth >= MAX_NESTING {
                    return Err(conversion_error(format!(
                        "collections nested deeper than {MAX_NESTING} levels"
                    )));
                }
                let count = self.count(9)?;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    let child = self.child_header(header, None)?;
                    members.push(self.body(&child, depth + 1)?);
                }
                Geometry::GeometryCollection(members)
            }
            other => return Err(conversion_error(format!("unsupported WKB type {other}"))),
        })
    }
}

/// Decodes one WKB geometry. The input must hold exactly one geometry.
pub fn decode(data: &[u8]) -> Result<Geometry> {
    let mut reader = Reader {
        data,
        pos: 0,
        little_endian: true,
    };
    let geometry = reader.geometry()?;
    if reader.pos != data.len() {
        return Err(conversion_error(format!(
            "{} trailing bytes after WKB geometry",
            data.len() - reader.pos
        )));
    }
    Ok(geometry)
}

struct Writer {
    buf: Vec<u8>,
    dims: Dimensions,
}

impl Writer {
    fn header(&mut self, geometry_type: GeometryType) {
        let offset = match self.dims {
            Dimensions::Xy => 0,
            Dimensions::Xyz => 1000,
            Dimensions::Xym => 2000,
            Dimensions::Xyzm => 3000,
        };
        self.buf.push(1);
        self.u32(geometry_type.wkb_code() + offset);
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn count(&mut self, count: usize) -> Result<()> {
        let count = u32::try_from(count)
            .map_err(|_| conversion_error(format!("{count} elements do not fit in WKB")))?;
        self.u32(count);
        Ok(())
    }

    fn coord(&mut self, coord: &Coord) {
        self.f64(coord.x);
        self.f64(coord.y);
        if self.dims.has_z() {
            self.f64(coord.z.unwrap_or(0.0));
        }
        if self.dims.has_m() {
            self.f64(coord.m.unwrap_or(0.0));
        }
    }

    fn empty_coord(&mut self) {
        for _ in 0..self.dims.size() {
            self.f64(f64::NAN);
        }
    }

    fn coords(&mut self, coords: &[Coord]) -> Result<()> {
        self.count(coords.len())?;
        coords.iter().for_each(|c| self.coord(c));
        Ok(())
    }

    fn rings(&mut self, rings: &[Vec<Coord>]) -> Result<()> {
        self.count(rings.len())?;
        rings.iter().try_for_each(|r| self.coords(r))
    }

    fn geometry(&mut self, geometry: &Geometry) -> Result<()> {
        self.header(geometry.geometry_type());
        match geometry {
            Geometry::Point(Some(c)) => self.coord(c),
            Geometry::Point(None) => self.empty_coord(),
            Geometry::LineString(coords) => self.coords(coords)?,
            Geometry::Polygon(rings) => self.rings(rings)?,
            Geometry::MultiPoint(points) => {
                self.count(points.len())?;
                for point in points {
                    self.header(GeometryType::Point);
                    self.coord(point);
                }
            }
            Geometry::MultiLineString(lines) => {
                self.count(lines.len())?;
                for line in lines {
                    self.header(GeometryType::LineString);
                    self.coords(line)?;
                }
            }
            Geometry::MultiPolygon(polygons) => {
                self.count(polygons.len())?;
                for polygon in polygons {
                    self.header(GeometryType::Polygon);
                    self.rings(polygon)?;
                }
            }
            Geometry::GeometryCollection(members) => {
                self.count(members.len())?;
                members.iter().try_for_each(|g| self.geometry(g))?;
            }
        }
        Ok(())
    }
}

/// Encodes a geometry as little-endian ISO WKB.
///
/// Fails with [`OgrioError::GeometryConversionError`] if the coordinates do
/// not all have the same dimensions.
pub fn encode(geometry: &Geometry) -> Result<Vec<u8>> {
    let mut writer = Writer {
        buf: Vec::new(),
        dims: geometry.uniform_dimensions()?,
    };
    writer.geometry(geometry)?;
    Ok(writer.buf)
}

/// Reads a native geometry. Curved geometries are linearized first.
///
/// # Safety
/// `c_geom` must be a valid geometry handle; it is only borrowed.
pub(crate) unsafe fn from_c_geometry(c_geom: OGRGeometryH) -> Result<Geometry> {
    let captured = with_error_capture(|| {
        let linear = if gdal_sys::OGR_G_HasCurveGeometry(c_geom, 1) != 0 {
            gdal_sys::OGR_G_GetLinearGeometry(c_geom, 0.0, ptr::null_mut::<*mut c_char>() as _)
        } else {
            ptr::null_mut()
        };
        let source = if linear.is_null() { c_geom } else { linear };
        let size = gdal_sys::OGR_G_WkbSize(source).max(0) as usize;
        let mut buf = vec![0u8; size];
        let rv = gdal_sys::OGR_G_ExportToIsoWkb(source, OGRwkbByteOrder::wkbNDR, buf.as_mut_ptr());
        if !linear.is_null() {
            gdal_sys::OGR_G_DestroyGeometry(linear);
        }
        (rv, buf)
    });
    let (rv, buf) = captured.value;
    if rv != OGRErr::OGRERR_NONE {
        return Err(OgrioError::GeometryConversionError {
            msg: "OGR_G_ExportToIsoWkb failed".to_string(),
            native: captured.diagnostics.last_error().cloned(),
        });
    }
    decode(&buf)
}

/// Builds a native geometry. The caller owns the returned handle.
pub(crate) fn to_c_geometry(geometry: &Geometry) -> Result<OGRGeometryH> {
    let wkb = encode(geometry)?;
    let mut c_geom: OGRGeometryH = ptr::null_mut();
    let captured = with_error_capture(|| unsafe {
        gdal_sys::OGR_G_CreateFromWkb(
            wkb.as_ptr() as _,
            ptr::null_mut(),
            &mut c_geom,
            wkb.len() as c_int,
        )
    });
    if captured.value != OGRErr::OGRERR_NONE || c_geom.is_null() {
        return Err(OgrioError::GeometryConversionError {
            msg: format!("GDAL rejected {} WKB", geometry.geometry_type()),
            native: captured.diagnostics.last_error().cloned(),
        });
    }
    Ok(c_geom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_geometries() -> Vec<Geometry> {
        let ring = vec![
            Coord::xy(0.0, 0.0),
            Coord::xy(4.0, 0.0),
            Coord::xy(4.0, 4.0),
            Coord::xy(0.0, 0.0),
        ];
        let hole = vec![
            Coord::xy(1.0, 1.0),
            Coord::xy(2.0, 1.0),
            Coord::xy(2.0, 2.0),
            Coord::xy(1.0, 1.0),
        ];
        vec![
            Geometry::Point(Some(Coord::xy(1.5, -2.25))),
            Geometry::Point(Some(Coord::xyzm(1.0, 2.0, 3.0, 4.0))),
            Geometry::LineString(vec![Coord::xym(0.0, 0.0, 7.0), Coord::xym(1.0, 1.0, 8.0)]),
            Geometry::Polygon(vec![ring.clone(), hole.clone()]),
            Geometry::MultiPoint(vec![Coord::xyz(0.0, 0.0, 1.0), Coord::xyz(1.0, 1.0, 2.0)]),
            Geometry::MultiLineString(vec![ring.clone(), hole.clone()]),
            Geometry::MultiPolygon(vec![vec![ring.clone()], vec![hole.clone(), ring.clone()]]),
            Geometry::GeometryCollection(vec![
                Geometry::Point(Some(Coord::xy(9.0, 9.0))),
                Geometry::GeometryCollection(vec![Geometry::LineString(hole)]),
                Geometry::Polygon(vec![ring]),
            ]),
        ]
    }

    #[test]
    fn round_trip_preserves_structure() {
        for geometry in sample_geometries() {
            let bytes = encode(&geometry).unwrap();
            assert_eq!(decode(&bytes).unwrap(), geometry);
        }
    }

    #[test]
    fn point_layout() {
        let bytes = encode(&Geometry::Point(Some(Coord::xy(1.0, 2.0)))).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 1);
        assert_eq!(f64::from_le_bytes(bytes[5..13].try_into().unwrap()), 1.0);
        assert_eq!(f64::from_le_bytes(bytes[13..21].try_into().unwrap()), 2.0);

        let bytes = encode(&Geometry::Point(Some(Coord::xyz(1.0, 2.0, 3.0)))).unwrap();
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 1001);
        assert_eq!(bytes.len(), 29);
    }

    #[test]
    fn empty_geometries() {
        let empty_point = Geometry::Point(None);
        let bytes = encode(&empty_point).unwrap();
        assert!(f64::from_le_bytes(bytes[5..13].try_into().unwrap()).is_nan());
        assert_eq!(decode(&bytes).unwrap(), empty_point);

        for empty in [
            Geometry::LineString(vec![]),
            Geometry::Polygon(vec![]),
            Geometry::MultiPolygon(vec![]),
            Geometry::GeometryCollection(vec![]),
        ] {
            let bytes = encode(&empty).unwrap();
            assert_eq!(bytes.len(), 9);
            assert_eq!(decode(&bytes).unwrap(), empty);
        }
    }

    #[test]
    fn decodes_big_endian() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        for v in [0.0f64, 1.0, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(
            decode(&bytes).unwrap(),
            Geometry::LineString(vec![Coord::xy(0.0, 1.0), Coord::xy(2.0, 3.0)])
        );
    }

    #[test]
    fn decodes_ewkb_flags() {
        // SRID=4326;POINT Z (1 2 3)
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(1 | EWKB_Z | EWKB_SRID).to_le_bytes());
        bytes.extend_from_slice(&4326u32.to_le_bytes());
        for v in [1.0f64, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(
            decode(&bytes).unwrap(),
            Geometry::Point(Some(Coord::xyz(1.0, 2.0, 3.0)))
        );

        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(1 | EWKB_M).to_le_bytes());
        for v in [1.0f64, 2.0, 5.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(
            decode(&bytes).unwrap(),
            Geometry::Point(Some(Coord::xym(1.0, 2.0, 5.0)))
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&17u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(OgrioError::GeometryConversionError { .. })
        ));

        // CircularString is only accepted through the native bridge.
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(decode(&bytes).is_err());

        assert!(decode(&[7u8, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = encode(&Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]))
            .unwrap();
        for len in [0, 1, 4, 8, bytes.len() - 1] {
            assert!(
                matches!(
                    decode(&bytes[..len]),
                    Err(OgrioError::GeometryConversionError { .. })
                ),
                "accepted {len} bytes"
            );
        }

        let mut huge = vec![1u8];
        huge.extend_from_slice(&2u32.to_le_bytes());
        huge.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&huge).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode(&Geometry::Point(Some(Coord::xy(0.0, 0.0)))).unwrap();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_inconsistent_children() {
        // MULTIPOINT containing a LINESTRING
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend(encode(&Geometry::LineString(vec![Coord::xy(0.0, 0.0)])).unwrap());
        assert!(decode(&bytes).is_err());

        // MULTIPOINT Z containing a 2D POINT
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&1004u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend(encode(&Geometry::Point(Some(Coord::xy(0.0, 0.0)))).unwrap());
        assert!(decode(&bytes).is_err());
    }

    fn nested_collections(levels: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(levels * 9);
        for level in 0..levels {
            let members: u32 = if level + 1 == levels { 0 } else { 1 };
            bytes.push(1u8);
            bytes.extend_from_slice(&7u32.to_le_bytes());
            bytes.extend_from_slice(&members.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn limits_collection_nesting() {
        let mut geometry = decode(&nested_collections(MAX_NESTING)).unwrap();
        let mut depth = 1;
        while let Geometry::GeometryCollection(mut members) = geometry {
            match members.pop() {
                Some(member) => {
                    geometry = member;
                    depth += 1;
                }
                None => break,
            }
        }
        assert_eq!(depth, MAX_NESTING);

        assert!(matches!(
            decode(&nested_collections(MAX_NESTING + 1)),
            Err(OgrioError::GeometryConversionError { .. })
        ));
        assert!(matches!(
            decode(&nested_collections(200_000)),
            Err(OgrioError::GeometryConversionError { .. })
        ));
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let mixed = Geometry::MultiPoint(vec![Coord::xy(0.0, 0.0), Coord::xyz(1.0, 1.0, 1.0)]);
        assert!(matches!(
            encode(&mixed),
            Err(OgrioError::GeometryConversionError { .. })
        ));
    }

    #[test]
    fn native_round_trip() {
        for geometry in sample_geometries() {
            let c_geom = to_c_geometry(&geometry).unwrap();
            let back = unsafe { from_c_geometry(c_geom) };
            unsafe { gdal_sys::OGR_G_DestroyGeometry(c_geom) };
            assert_eq!(back.unwrap(), geometry);
        }
    }

    #[test]
    fn native_curves_are_linearized() {
        let wkt = std::ffi::CString::new("CIRCULARSTRING (0 0, 1 1, 2 0)").unwrap();
        let mut c_wkt = wkt.as_ptr() as *mut c_char;
        let mut c_geom: OGRGeometryH = ptr::null_mut();
        let rv = unsafe {
            gdal_sys::OGR_G_CreateFromWkt(&mut c_wkt as *mut *mut c_char as _, ptr::null_mut(), &mut c_geom)
        };
        assert_eq!(rv, OGRErr::OGRERR_NONE);
        let geometry = unsafe { from_c_geometry(c_geom) };
        unsafe { gdal_sys::OGR_G_DestroyGeometry(c_geom) };
        match geometry.unwrap() {
            Geometry::LineString(coords) => {
                assert!(coords.len() > 3);
                assert_eq!(coords[0], Coord::xy(0.0, 0.0));
            }
            other => panic!("expected a line string, got {other:?}"),
        }
    }
}
