use std::ffi::c_int;
use std::fmt::{Display, Formatter};

use gdal_sys::{OGRFieldSubType, OGRFieldType, OGRLayerH, OGRwkbGeometryType};

use crate::errors::Result;
use crate::spatial_ref::SpatialRef;
use crate::utils::_string;

/// Coordinate dimensions of a geometry or geometry column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dimensions {
    #[default]
    Xy,
    Xyz,
    Xym,
    Xyzm,
}

impl Dimensions {
    pub fn new(has_z: bool, has_m: bool) -> Self {
        match (has_z, has_m) {
            (false, false) => Dimensions::Xy,
            (true, false) => Dimensions::Xyz,
            (false, true) => Dimensions::Xym,
            (true, true) => Dimensions::Xyzm,
        }
    }

    pub fn has_z(self) -> bool {
        matches!(self, Dimensions::Xyz | Dimensions::Xyzm)
    }

    pub fn has_m(self) -> bool {
        matches!(self, Dimensions::Xym | Dimensions::Xyzm)
    }

    /// Number of ordinates per coordinate.
    pub fn size(self) -> usize {
        2 + self.has_z() as usize + self.has_m() as usize
    }
}

/// Geometry type of a geometry value or a layer's geometry column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryType {
    /// Any geometry type may appear.
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    /// The layer has no geometry column.
    None,
}

impl GeometryType {
    /// The ISO WKB code without dimension offsets.
    pub fn wkb_code(self) -> u32 {
        match self {
            GeometryType::Unknown => 0,
            GeometryType::Point => 1,
            GeometryType::LineString => 2,
            GeometryType::Polygon => 3,
            GeometryType::MultiPoint => 4,
            GeometryType::MultiLineString => 5,
            GeometryType::MultiPolygon => 6,
            GeometryType::GeometryCollection => 7,
            GeometryType::None => 100,
        }
    }

    /// Reads a flattened ISO WKB code. Curve types are reported as their
    /// linear counterparts since curved geometries are linearized on read.
    pub fn from_wkb_code(code: u32) -> Option<GeometryType> {
        Some(match code {
            0 => GeometryType::Unknown,
            1 => GeometryType::Point,
            2 | 8 | 9 => GeometryType::LineString,
            3 | 10 => GeometryType::Polygon,
            4 => GeometryType::MultiPoint,
            5 | 11 => GeometryType::MultiLineString,
            6 | 12 => GeometryType::MultiPolygon,
            7 => GeometryType::GeometryCollection,
            100 => GeometryType::None,
            _ => return None,
        })
    }

    /// Splits an OGR geometry type into its base type and dimensions.
    pub fn from_ogr(ty: OGRwkbGeometryType::Type) -> (GeometryType, Dimensions) {
        let flat = unsafe { gdal_sys::OGR_GT_Flatten(ty) };
        let has_z = unsafe { gdal_sys::OGR_GT_HasZ(ty) } != 0;
        let has_m = unsafe { gdal_sys::OGR_GT_HasM(ty) } != 0;
        let base = GeometryType::from_wkb_code(flat as u32).unwrap_or(GeometryType::Unknown);
        (base, Dimensions::new(has_z, has_m))
    }

    pub fn to_ogr(self, dims: Dimensions) -> OGRwkbGeometryType::Type {
        let base = self.wkb_code() as OGRwkbGeometryType::Type;
        if matches!(self, GeometryType::None | GeometryType::Unknown) && dims == Dimensions::Xy {
            return base;
        }
        unsafe {
            gdal_sys::OGR_GT_SetModifier(base, dims.has_z() as c_int, dims.has_m() as c_int)
        }
    }

    /// The multi-part counterpart of a single-part type.
    pub fn to_multi(self) -> GeometryType {
        match self {
            GeometryType::Point => GeometryType::MultiPoint,
            GeometryType::LineString => GeometryType::MultiLineString,
            GeometryType::Polygon => GeometryType::MultiPolygon,
            other => other,
        }
    }

    /// Whether a layer declared with this type takes geometries of type
    /// `other`. `Unknown` takes anything, and single-part types also take
    /// their multi-part counterparts since several formats do not tell the
    /// two apart.
    pub fn accepts(self, other: GeometryType) -> bool {
        match self {
            GeometryType::Unknown => true,
            GeometryType::None => false,
            declared => declared == other || declared.to_multi() == other,
        }
    }
}

impl Display for GeometryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GeometryType::Unknown => "Unknown",
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::MultiPolygon => "MultiPolygon",
            GeometryType::GeometryCollection => "GeometryCollection",
            GeometryType::None => "None",
        };
        f.write_str(name)
    }
}

/// Attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Integer64,
    Boolean,
    Real,
    String,
    Date,
    Time,
    DateTime,
    Binary,
    IntegerList,
    Integer64List,
    RealList,
    StringList,
}

impl FieldType {
    pub fn from_ogr(ty: OGRFieldType::Type, subtype: OGRFieldSubType::Type) -> Option<FieldType> {
        Some(match ty {
            OGRFieldType::OFTInteger if subtype == OGRFieldSubType::OFSTBoolean => {
                FieldType::Boolean
            }
            OGRFieldType::OFTInteger => FieldType::Integer,
            OGRFieldType::OFTInteger64 => FieldType::Integer64,
            OGRFieldType::OFTReal => FieldType::Real,
            OGRFieldType::OFTString | OGRFieldType::OFTWideString => FieldType::String,
            OGRFieldType::OFTDate => FieldType::Date,
            OGRFieldType::OFTTime => FieldType::Time,
            OGRFieldType::OFTDateTime => FieldType::DateTime,
            OGRFieldType::OFTBinary => FieldType::Binary,
            OGRFieldType::OFTIntegerList => FieldType::IntegerList,
            OGRFieldType::OFTInteger64List => FieldType::Integer64List,
            OGRFieldType::OFTRealList => FieldType::RealList,
            OGRFieldType::OFTStringList | OGRFieldType::OFTWideStringList => {
                FieldType::StringList
            }
            _ => return None,
        })
    }

    pub fn to_ogr(self) -> (OGRFieldType::Type, OGRFieldSubType::Type) {
        let ty = match self {
            FieldType::Integer | FieldType::Boolean => OGRFieldType::OFTInteger,
            FieldType::Integer64 => OGRFieldType::OFTInteger64,
            FieldType::Real => OGRFieldType::OFTReal,
            FieldType::String => OGRFieldType::OFTString,
            FieldType::Date => OGRFieldType::OFTDate,
            FieldType::Time => OGRFieldType::OFTTime,
            FieldType::DateTime => OGRFieldType::OFTDateTime,
            FieldType::Binary => OGRFieldType::OFTBinary,
            FieldType::IntegerList => OGRFieldType::OFTIntegerList,
            FieldType::Integer64List => OGRFieldType::OFTInteger64List,
            FieldType::RealList => OGRFieldType::OFTRealList,
            FieldType::StringList => OGRFieldType::OFTStringList,
        };
        let subtype = if self == FieldType::Boolean {
            OGRFieldSubType::OFSTBoolean
        } else {
            OGRFieldSubType::OFSTNone
        };
        (ty, subtype)
    }

    pub fn is_list(self) -> bool {
        matches!(
            self,
            FieldType::IntegerList
                | FieldType::Integer64List
                | FieldType::RealList
                | FieldType::StringList
        )
    }
}

/// One attribute column. Width and precision are advisory; not every driver
/// enforces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    /// Zero means unspecified.
    pub width: i32,
    pub precision: i32,
    pub nullable: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.into(),
            field_type,
            width: 0,
            precision: 0,
            nullable: true,
        }
    }

    pub fn with_width(mut self, width: i32) -> Self {
        self.width = width;
        self
    }

    pub fn with_precision(mut self, precision: i32) -> Self {
        self.precision = precision;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// The declared schema of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSchema {
    pub fields: Vec<FieldSchema>,
    pub geometry_type: GeometryType,
    pub dimensions: Dimensions,
    pub srs: Option<SpatialRef>,
}

impl LayerSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Reads the schema of a native layer.
    ///
    /// Fields of types this crate does not model are skipped; their values
    /// are never read either.
    ///
    /// # Safety
    /// `c_layer` must be a valid layer handle.
    pub(crate) unsafe fn from_c_layer(c_layer: OGRLayerH) -> Result<LayerSchema> {
        let c_defn = gdal_sys::OGR_L_GetLayerDefn(c_layer);
        let count = gdal_sys::OGR_FD_GetFieldCount(c_defn).max(0);
        let mut fields = Vec::with_capacity(count as usize);
        for idx in 0..count {
            let c_field = gdal_sys::OGR_FD_GetFieldDefn(c_defn, idx);
            let ty = gdal_sys::OGR_Fld_GetType(c_field);
            let subtype = gdal_sys::OGR_Fld_GetSubType(c_field);
            let name = _string(gdal_sys::OGR_Fld_GetNameRef(c_field));
            let Some(field_type) = FieldType::from_ogr(ty, subtype) else {
                log::debug!("skipping field '{name}' of unsupported OGR type {ty}");
                continue;
            };
            fields.push(FieldSchema {
                name,
                field_type,
                width: gdal_sys::OGR_Fld_GetWidth(c_field),
                precision: gdal_sys::OGR_Fld_GetPrecision(c_field),
                nullable: gdal_sys::OGR_Fld_IsNullable(c_field) != 0,
            });
        }

        let (geometry_type, dimensions) = GeometryType::from_ogr(gdal_sys::OGR_L_GetGeomType(c_layer));
        let c_srs = gdal_sys::OGR_L_GetSpatialRef(c_layer);
        let srs = if c_srs.is_null() {
            None
        } else {
            Some(SpatialRef::from_c_srs(c_srs)?)
        };

        Ok(LayerSchema {
            fields,
            geometry_type,
            dimensions,
            srs,
        })
    }
}
