use std::collections::HashSet;
use std::ffi::{c_char, c_int, CString};
use std::slice;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike};
use gdal_sys::{OGRErr, OGRFeatureDefnH, OGRFeatureH, OGRLayerH};

use crate::cpl::CslStringList;
use crate::errors::{OgrioError, Result};
use crate::utils::{_string, _string_array};
use crate::vector::geometry::Geometry;
use crate::vector::schema::{FieldType, LayerSchema};
use crate::vector::wkb;

/// Value of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i32),
    Integer64(i64),
    Boolean(bool),
    Real(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    Binary(Vec<u8>),
    IntegerList(Vec<i32>),
    Integer64List(Vec<i64>),
    RealList(Vec<f64>),
    StringList(Vec<String>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Integer64(_) => FieldType::Integer64,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Real(_) => FieldType::Real,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::DateTime(_) => FieldType::DateTime,
            FieldValue::Binary(_) => FieldType::Binary,
            FieldValue::IntegerList(_) => FieldType::IntegerList,
            FieldValue::Integer64List(_) => FieldType::Integer64List,
            FieldValue::RealList(_) => FieldType::RealList,
            FieldValue::StringList(_) => FieldType::StringList,
        }
    }

    /// Whether this value can be stored in a field of type `field_type`
    /// without loss. Integers widen to 64 bits and to reals, dates widen to
    /// date-times.
    pub fn fits(&self, field_type: FieldType) -> bool {
        use FieldType as T;
        match (self.field_type(), field_type) {
            (own, target) if own == target => true,
            (T::Integer, T::Integer64 | T::Real) => true,
            (T::Boolean, T::Integer | T::Integer64) => true,
            (T::Date, T::DateTime) => true,
            (T::IntegerList, T::Integer64List | T::RealList) => true,
            _ => false,
        }
    }

    /// Interpret the value as `String`. Returns `None` for other variants.
    pub fn into_string(self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as `f64`. Integers are converted.
    pub fn into_real(self) -> Option<f64> {
        match self {
            FieldValue::Real(v) => Some(v),
            FieldValue::Integer(v) => Some(v as f64),
            FieldValue::Integer64(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn into_int(self) -> Option<i32> {
        match self {
            FieldValue::Integer(v) => Some(v),
            FieldValue::Integer64(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn into_int64(self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(v as i64),
            FieldValue::Integer64(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret the value as a date. Date-times are truncated.
    pub fn into_date(self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(d),
            FieldValue::DateTime(dt) => Some(dt.date_naive()),
            _ => None,
        }
    }

    pub fn into_datetime(self) -> Option<DateTime<FixedOffset>> {
        match self {
            FieldValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Real(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

impl From<DateTime<FixedOffset>> for FieldValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        FieldValue::DateTime(v)
    }
}

/// A record: ordered attribute values, an optional geometry and the
/// identifier assigned by the layer it was read from or written to.
///
/// ```rust
/// use ogrio::vector::{Coord, Feature, FieldValue, Geometry};
///
/// let feature = Feature::new()
///     .with_field("name", "a")
///     .with_null("comment")
///     .with_geometry(Geometry::Point(Some(Coord::xy(1.0, 2.0))));
/// assert_eq!(
///     feature.field("name").unwrap(),
///     Some(&FieldValue::String("a".to_string()))
/// );
/// assert_eq!(feature.field("comment").unwrap(), None);
/// assert!(feature.field("missing").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    fid: Option<u64>,
    properties: Vec<(String, Option<FieldValue>)>,
    geometry: Option<Geometry>,
}

impl Feature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fid(&self) -> Option<u64> {
        self.fid
    }

    /// Sets the identifier used by [`Layer::update`](crate::vector::Layer::update)
    /// and friends.
    pub fn set_fid(&mut self, fid: Option<u64>) {
        self.fid = fid;
    }

    pub fn with_fid(mut self, fid: u64) -> Self {
        self.fid = Some(fid);
        self
    }

    pub fn properties(&self) -> &[(String, Option<FieldValue>)] {
        &self.properties
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(name, _)| name.as_str())
    }

    /// The value of `name`, `None` for a null value.
    ///
    /// Fails with [`OgrioError::InvalidFieldName`] if the feature has no such
    /// field.
    pub fn field(&self, name: &str) -> Result<Option<&FieldValue>> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_ref())
            .ok_or_else(|| OgrioError::InvalidFieldName {
                field_name: name.to_string(),
            })
    }

    /// Sets a value, keeping the position of an existing field.
    pub fn set_field(&mut self, name: &str, value: Option<FieldValue>) {
        match self.properties.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((name.to_string(), value)),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set_field(name, Some(value.into()));
        self
    }

    pub fn with_null(mut self, name: &str) -> Self {
        self.set_field(name, None);
        self
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Option<FieldValue>> {
        let idx = self.properties.iter().position(|(n, _)| n == name)?;
        Some(self.properties.remove(idx).1)
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn set_geometry(&mut self, geometry: Option<Geometry>) {
        self.geometry = geometry;
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn take_geometry(&mut self) -> Option<Geometry> {
        self.geometry.take()
    }

    pub(crate) fn geometry_mut(&mut self) -> Option<&mut Geometry> {
        self.geometry.as_mut()
    }

    /// Checks that the feature can be written to a layer with `schema`.
    pub(crate) fn check_schema(&self, schema: &LayerSchema, layer: &str) -> Result<()> {
        let mismatch = |msg: String| OgrioError::SchemaMismatch {
            layer: layer.to_string(),
            msg,
        };

        let mut seen = HashSet::new();
        for (name, value) in &self.properties {
            if !seen.insert(name.as_str()) {
                return Err(mismatch(format!("field '{name}' is set twice")));
            }
            let field = schema
                .field(name)
                .ok_or_else(|| mismatch(format!("unknown field '{name}'")))?;
            match value {
                Some(v) if !v.fits(field.field_type) => {
                    return Err(mismatch(format!(
                        "field '{name}' is {:?}, got {:?}",
                        field.field_type,
                        v.field_type()
                    )))
                }
                None if !field.nullable => {
                    return Err(mismatch(format!("field '{name}' is not nullable")))
                }
                _ => {}
            }
        }
        if let Some(missing) = schema.field_names().find(|n| !seen.contains(n)) {
            return Err(mismatch(format!("missing field '{missing}'")));
        }

        if let Some(geometry) = &self.geometry {
            let found = geometry.geometry_type();
            if !schema.geometry_type.accepts(found) {
                return Err(mismatch(format!(
                    "layer takes {} geometries, got {found}",
                    schema.geometry_type
                )));
            }
        }
        Ok(())
    }
}

/// Position of a schema field in the native feature definition.
#[derive(Debug, Clone)]
pub(crate) struct FieldBinding {
    pub(crate) name: String,
    pub(crate) field_type: FieldType,
    pub(crate) index: c_int,
}

impl FieldBinding {
    /// # Safety
    /// `c_layer` must be a valid layer handle described by `schema`.
    pub(crate) unsafe fn for_layer(
        c_layer: OGRLayerH,
        schema: &LayerSchema,
    ) -> Result<Vec<FieldBinding>> {
        let c_defn = gdal_sys::OGR_L_GetLayerDefn(c_layer);
        schema
            .fields
            .iter()
            .map(|field| {
                let c_name = CString::new(field.name.as_str())?;
                let index = gdal_sys::OGR_FD_GetFieldIndex(c_defn, c_name.as_ptr());
                if index < 0 {
                    return Err(OgrioError::InvalidFieldName {
                        field_name: field.name.clone(),
                    });
                }
                Ok(FieldBinding {
                    name: field.name.clone(),
                    field_type: field.field_type,
                    index,
                })
            })
            .collect()
    }
}

/// An owned native feature, destroyed on drop.
pub(crate) struct OwnedFeature(OGRFeatureH);

impl OwnedFeature {
    /// # Safety
    /// `c_feature` must be a valid feature the caller owns.
    pub(crate) unsafe fn from_raw(c_feature: OGRFeatureH) -> Self {
        OwnedFeature(c_feature)
    }

    pub(crate) fn as_ptr(&self) -> OGRFeatureH {
        self.0
    }
}

impl Drop for OwnedFeature {
    fn drop(&mut self) {
        unsafe { gdal_sys::OGR_F_Destroy(self.0) };
    }
}

fn tz_offset(tzflag: c_int) -> Option<FixedOffset> {
    // 0 is unknown and 1 is local time; both are read as UTC.
    let secs = if tzflag <= 1 || tzflag == 100 {
        0
    } else {
        (tzflag - 100) * 15 * 60
    };
    FixedOffset::east_opt(secs)
}

fn tz_flag(offset: &FixedOffset) -> c_int {
    100 + offset.local_minus_utc() / (15 * 60)
}

struct RawDateTime {
    year: c_int,
    month: c_int,
    day: c_int,
    hour: c_int,
    minute: c_int,
    second: f32,
    tzflag: c_int,
}

impl RawDateTime {
    fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)
    }

    fn time(&self) -> Option<NaiveTime> {
        // Rounding carries into the seconds but never past the minute.
        let total = ((self.second as f64 * 1000.0).round() as u32).min(59_999);
        NaiveTime::from_hms_milli_opt(
            self.hour as u32,
            self.minute as u32,
            total / 1000,
            total % 1000,
        )
    }
}

unsafe fn read_datetime(c_feature: OGRFeatureH, index: c_int) -> Option<RawDateTime> {
    let mut raw = RawDateTime {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0.0,
        tzflag: 0,
    };
    let ok = gdal_sys::OGR_F_GetFieldAsDateTimeEx(
        c_feature,
        index,
        &mut raw.year,
        &mut raw.month,
        &mut raw.day,
        &mut raw.hour,
        &mut raw.minute,
        &mut raw.second,
        &mut raw.tzflag,
    );
    (ok != 0).then_some(raw)
}

unsafe fn list<T: Copy>(ptr: *const T, len: c_int) -> Vec<T> {
    if ptr.is_null() || len <= 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(ptr, len as usize).to_vec()
    }
}

/// Reads one value; `None` for null or unset fields and for temporal
/// values GDAL cannot represent as a calendar value.
unsafe fn read_value(c_feature: OGRFeatureH, binding: &FieldBinding) -> Option<FieldValue> {
    let idx = binding.index;
    if gdal_sys::OGR_F_IsFieldSetAndNotNull(c_feature, idx) == 0 {
        return None;
    }
    let mut len: c_int = 0;
    let value = match binding.field_type {
        FieldType::Integer => FieldValue::Integer(gdal_sys::OGR_F_GetFieldAsInteger(c_feature, idx)),
        FieldType::Boolean => {
            FieldValue::Boolean(gdal_sys::OGR_F_GetFieldAsInteger(c_feature, idx) != 0)
        }
        FieldType::Integer64 => {
            FieldValue::Integer64(gdal_sys::OGR_F_GetFieldAsInteger64(c_feature, idx))
        }
        FieldType::Real => FieldValue::Real(gdal_sys::OGR_F_GetFieldAsDouble(c_feature, idx)),
        FieldType::String => {
            FieldValue::String(_string(gdal_sys::OGR_F_GetFieldAsString(c_feature, idx)))
        }
        FieldType::Date | FieldType::Time | FieldType::DateTime => {
            let raw = read_datetime(c_feature, idx);
            let value = raw.as_ref().and_then(|raw| match binding.field_type {
                FieldType::Date => raw.date().map(FieldValue::Date),
                FieldType::Time => raw.time().map(FieldValue::Time),
                _ => {
                    let naive = raw.date()?.and_time(raw.time()?);
                    let offset = tz_offset(raw.tzflag)?;
                    offset
                        .from_local_datetime(&naive)
                        .single()
                        .map(FieldValue::DateTime)
                }
            });
            if value.is_none() {
                log::warn!("field '{}' holds an invalid {:?}", binding.name, binding.field_type);
            }
            return value;
        }
        FieldType::Binary => {
            let ptr = gdal_sys::OGR_F_GetFieldAsBinary(c_feature, idx, &mut len);
            FieldValue::Binary(list(ptr as *const u8, len))
        }
        FieldType::IntegerList => {
            let ptr = gdal_sys::OGR_F_GetFieldAsIntegerList(c_feature, idx, &mut len);
            FieldValue::IntegerList(list(ptr, len))
        }
        FieldType::Integer64List => {
            let ptr = gdal_sys::OGR_F_GetFieldAsInteger64List(c_feature, idx, &mut len);
            FieldValue::Integer64List(list(ptr as *const i64, len))
        }
        FieldType::RealList => {
            let ptr = gdal_sys::OGR_F_GetFieldAsDoubleList(c_feature, idx, &mut len);
            FieldValue::RealList(list(ptr, len))
        }
        FieldType::StringList => {
            let ptr = gdal_sys::OGR_F_GetFieldAsStringList(c_feature, idx);
            FieldValue::StringList(_string_array(ptr as *mut *mut c_char))
        }
    };
    Some(value)
}

/// Copies a native feature.
///
/// # Safety
/// `c_feature` must be a valid feature whose fields match `bindings`.
pub(crate) unsafe fn read_feature(
    c_feature: OGRFeatureH,
    bindings: &[FieldBinding],
    with_geometry: bool,
) -> Result<Feature> {
    let fid = gdal_sys::OGR_F_GetFID(c_feature);
    let properties = bindings
        .iter()
        .map(|b| (b.name.clone(), read_value(c_feature, b)))
        .collect();
    let geometry = if with_geometry {
        let c_geom = gdal_sys::OGR_F_GetGeometryRef(c_feature);
        if c_geom.is_null() {
            None
        } else {
            Some(wkb::from_c_geometry(c_geom)?)
        }
    } else {
        None
    };
    Ok(Feature {
        fid: u64::try_from(fid).ok(),
        properties,
        geometry,
    })
}

unsafe fn write_value(c_feature: OGRFeatureH, idx: c_int, value: &FieldValue) -> Result<()> {
    match value {
        FieldValue::Integer(v) => gdal_sys::OGR_F_SetFieldInteger(c_feature, idx, *v),
        FieldValue::Boolean(v) => gdal_sys::OGR_F_SetFieldInteger(c_feature, idx, *v as c_int),
        FieldValue::Integer64(v) => gdal_sys::OGR_F_SetFieldInteger64(c_feature, idx, *v),
        FieldValue::Real(v) => gdal_sys::OGR_F_SetFieldDouble(c_feature, idx, *v),
        FieldValue::String(v) => {
            let c_value = CString::new(v.as_str())?;
            gdal_sys::OGR_F_SetFieldString(c_feature, idx, c_value.as_ptr())
        }
        FieldValue::Date(d) => gdal_sys::OGR_F_SetFieldDateTimeEx(
            c_feature,
            idx,
            d.year(),
            d.month() as c_int,
            d.day() as c_int,
            0,
            0,
            0.0,
            0,
        ),
        FieldValue::Time(t) => gdal_sys::OGR_F_SetFieldDateTimeEx(
            c_feature,
            idx,
            0,
            0,
            0,
            t.hour() as c_int,
            t.minute() as c_int,
            t.second() as f32 + t.nanosecond() as f32 / 1e9,
            0,
        ),
        FieldValue::DateTime(dt) => gdal_sys::OGR_F_SetFieldDateTimeEx(
            c_feature,
            idx,
            dt.year(),
            dt.month() as c_int,
            dt.day() as c_int,
            dt.hour() as c_int,
            dt.minute() as c_int,
            dt.second() as f32 + dt.nanosecond() as f32 / 1e9,
            tz_flag(dt.offset()),
        ),
        FieldValue::Binary(bytes) => {
            gdal_sys::OGR_F_SetFieldBinary(c_feature, idx, bytes.len() as c_int, bytes.as_ptr() as _)
        }
        FieldValue::IntegerList(values) => {
            gdal_sys::OGR_F_SetFieldIntegerList(c_feature, idx, values.len() as c_int, values.as_ptr())
        }
        FieldValue::Integer64List(values) => gdal_sys::OGR_F_SetFieldInteger64List(
            c_feature,
            idx,
            values.len() as c_int,
            values.as_ptr() as _,
        ),
        FieldValue::RealList(values) => {
            gdal_sys::OGR_F_SetFieldDoubleList(c_feature, idx, values.len() as c_int, values.as_ptr())
        }
        FieldValue::StringList(values) => {
            let list = CslStringList::from_strings(values)?;
            gdal_sys::OGR_F_SetFieldStringList(c_feature, idx, list.as_ptr() as _)
        }
    }
    Ok(())
}

/// Builds a native feature for `c_defn`. The fid is only copied when
/// `with_fid` is set.
///
/// # Safety
/// `c_defn` must be the definition `bindings` were resolved against.
pub(crate) unsafe fn write_feature(
    c_defn: OGRFeatureDefnH,
    bindings: &[FieldBinding],
    feature: &Feature,
    with_fid: bool,
) -> Result<OwnedFeature> {
    let c_feature = gdal_sys::OGR_F_Create(c_defn);
    if c_feature.is_null() {
        return Err(OgrioError::from_ogr_err(
            OGRErr::OGRERR_NOT_ENOUGH_MEMORY,
            "OGR_F_Create",
        ));
    }
    let owned = OwnedFeature::from_raw(c_feature);

    if let Some(fid) = feature.fid.filter(|_| with_fid) {
        let fid = i64::try_from(fid)
            .map_err(|_| OgrioError::BadArgument(format!("fid {fid} is out of range")))?;
        gdal_sys::OGR_F_SetFID(c_feature, fid);
    }
    for (name, value) in &feature.properties {
        let binding = bindings
            .iter()
            .find(|b| &b.name == name)
            .ok_or_else(|| OgrioError::InvalidFieldName {
                field_name: name.clone(),
            })?;
        match value {
            Some(value) => write_value(c_feature, binding.index, value)?,
            None => gdal_sys::OGR_F_SetFieldNull(c_feature, binding.index),
        }
    }
    if let Some(geometry) = &feature.geometry {
        let c_geom = wkb::to_c_geometry(geometry)?;
        let rv = gdal_sys::OGR_F_SetGeometryDirectly(c_feature, c_geom);
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::from_ogr_err(rv, "OGR_F_SetGeometryDirectly"));
        }
    }
    Ok(owned)
}
