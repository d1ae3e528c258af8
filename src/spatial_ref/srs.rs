use std::ffi::{c_char, c_int, CString};
use std::fmt::{Debug, Formatter};
use std::ptr;
use std::rc::Rc;

use gdal_sys::{OGRErr, OGRSpatialReferenceH, OSRAxisMappingStrategy};

use crate::capture::{with_error_capture, Diagnostics};
use crate::errors::{OgrioError, Result};
use crate::utils::{_opt_string, _take_gdal_string};

struct SrsHandle {
    c_srs: OGRSpatialReferenceH,
    wkt: String,
}

impl Drop for SrsHandle {
    fn drop(&mut self) {
        unsafe { gdal_sys::OSRRelease(self.c_srs) };
    }
}

/// An immutable coordinate reference system.
///
/// Cloning is cheap and shares the native object; it is released when the
/// last clone is dropped. Axis order is always the traditional GIS order:
/// x is easting or longitude, y is northing or latitude, whatever the
/// authority says.
#[derive(Clone)]
pub struct SpatialRef {
    inner: Rc<SrsHandle>,
}

fn invalid(msg: String, diagnostics: &Diagnostics) -> OgrioError {
    OgrioError::CrsTransformError {
        msg,
        native: diagnostics.last_error().cloned(),
    }
}

impl SpatialRef {
    /// Builds a spatial reference from anything `OSRSetFromUserInput`
    /// accepts: `"EPSG:4326"`, `"OGC:CRS84"`, WKT, PROJ strings, PROJJSON.
    pub fn from_definition(definition: &str) -> Result<SpatialRef> {
        let c_definition = CString::new(definition)?;
        Self::build(definition, |c_srs| unsafe {
            gdal_sys::OSRSetFromUserInput(c_srs, c_definition.as_ptr())
        })
    }

    pub fn from_epsg(epsg_code: u32) -> Result<SpatialRef> {
        Self::build(&format!("EPSG:{epsg_code}"), |c_srs| unsafe {
            gdal_sys::OSRImportFromEPSG(c_srs, epsg_code as c_int)
        })
    }

    pub fn from_wkt(wkt: &str) -> Result<SpatialRef> {
        let c_wkt = CString::new(wkt)?;
        Self::build(wkt, |c_srs| unsafe {
            let mut wkt_ptr = c_wkt.as_ptr() as *mut c_char;
            gdal_sys::OSRImportFromWkt(c_srs, &mut wkt_ptr as *mut *mut c_char as _)
        })
    }

    pub fn from_proj4(proj4_string: &str) -> Result<SpatialRef> {
        let c_proj4 = CString::new(proj4_string)?;
        Self::build(proj4_string, |c_srs| unsafe {
            gdal_sys::OSRImportFromProj4(c_srs, c_proj4.as_ptr())
        })
    }

    fn build<F>(definition: &str, import: F) -> Result<SpatialRef>
    where
        F: FnOnce(OGRSpatialReferenceH) -> OGRErr::Type,
    {
        let captured = with_error_capture(|| {
            let c_srs = unsafe { gdal_sys::OSRNewSpatialReference(ptr::null()) };
            if c_srs.is_null() {
                return Err(OGRErr::OGRERR_NOT_ENOUGH_MEMORY);
            }
            let rv = import(c_srs);
            if rv != OGRErr::OGRERR_NONE {
                unsafe { gdal_sys::OSRRelease(c_srs) };
                return Err(rv);
            }
            Ok(c_srs)
        });
        match captured.value {
            Ok(c_srs) => unsafe { Self::from_owned_c_srs(c_srs) },
            Err(_) => Err(invalid(
                format!("invalid CRS definition '{definition}'"),
                &captured.diagnostics,
            )),
        }
    }

    /// Takes ownership of a reference to `c_srs`.
    ///
    /// # Safety
    /// `c_srs` must be a valid handle whose reference the caller hands over.
    unsafe fn from_owned_c_srs(c_srs: OGRSpatialReferenceH) -> Result<SpatialRef> {
        gdal_sys::OSRSetAxisMappingStrategy(
            c_srs,
            OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        let mut c_wkt: *mut c_char = ptr::null_mut();
        let captured = with_error_capture(|| gdal_sys::OSRExportToWkt(c_srs, &mut c_wkt));
        let wkt = _take_gdal_string(c_wkt);
        match (captured.value, wkt) {
            (OGRErr::OGRERR_NONE, Some(wkt)) => Ok(SpatialRef {
                inner: Rc::new(SrsHandle { c_srs, wkt }),
            }),
            _ => {
                gdal_sys::OSRRelease(c_srs);
                Err(invalid(
                    "CRS cannot be exported to WKT".to_string(),
                    &captured.diagnostics,
                ))
            }
        }
    }

    /// Copies a spatial reference owned by someone else, e.g. a layer.
    ///
    /// # Safety
    /// `c_srs` must be a valid handle for the duration of the call.
    pub(crate) unsafe fn from_c_srs(c_srs: OGRSpatialReferenceH) -> Result<SpatialRef> {
        let cloned = gdal_sys::OSRClone(c_srs);
        if cloned.is_null() {
            return Err(OgrioError::CrsTransformError {
                msg: "OSRClone returned null".to_string(),
                native: None,
            });
        }
        Self::from_owned_c_srs(cloned)
    }

    /// The WKT definition, captured when the spatial reference was built.
    pub fn to_wkt(&self) -> &str {
        &self.inner.wkt
    }

    pub fn to_proj4(&self) -> Result<String> {
        let mut c_proj4: *mut c_char = ptr::null_mut();
        let captured =
            with_error_capture(|| unsafe { gdal_sys::OSRExportToProj4(self.c_srs(), &mut c_proj4) });
        let proj4 = _take_gdal_string(c_proj4);
        match (captured.value, proj4) {
            (OGRErr::OGRERR_NONE, Some(proj4)) => Ok(proj4.trim().to_string()),
            _ => Err(invalid(
                "CRS cannot be exported to PROJ".to_string(),
                &captured.diagnostics,
            )),
        }
    }

    /// The `AUTHORITY:CODE` identifier, e.g. `"EPSG:4326"`, if the root of
    /// the definition carries one.
    pub fn authority(&self) -> Option<String> {
        let name = _opt_string(unsafe { gdal_sys::OSRGetAuthorityName(self.c_srs(), ptr::null()) })?;
        let code = _opt_string(unsafe { gdal_sys::OSRGetAuthorityCode(self.c_srs(), ptr::null()) })?;
        Some(format!("{name}:{code}"))
    }

    pub fn is_geographic(&self) -> bool {
        unsafe { gdal_sys::OSRIsGeographic(self.c_srs()) != 0 }
    }

    pub fn is_projected(&self) -> bool {
        unsafe { gdal_sys::OSRIsProjected(self.c_srs()) != 0 }
    }

    /// `true` if both values share the same native object.
    pub fn ptr_eq(&self, other: &SpatialRef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the wrapped C pointer
    ///
    /// # Safety
    /// The pointer is only valid while `self` (or a clone) is alive, and the
    /// object behind it must not be modified.
    pub(crate) unsafe fn c_srs(&self) -> OGRSpatialReferenceH {
        self.inner.c_srs
    }
}

impl PartialEq for SpatialRef {
    /// Semantic equality as judged by `OSRIsSame`.
    fn eq(&self, other: &SpatialRef) -> bool {
        self.ptr_eq(other) || unsafe { gdal_sys::OSRIsSame(self.c_srs(), other.c_srs()) != 0 }
    }
}

impl Debug for SpatialRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.authority() {
            Some(authority) => write!(f, "SpatialRef({authority})"),
            None => write!(f, "SpatialRef({})", self.to_wkt()),
        }
    }
}
