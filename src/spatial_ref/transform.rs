use std::collections::HashMap;
use std::ffi::c_int;
use std::fmt::{Debug, Formatter};
use std::ptr;
use std::rc::Rc;

use gdal_sys::OGRCoordinateTransformationH;

use crate::capture::{log_warnings, with_error_capture};
use crate::errors::{OgrioError, Result};
use crate::spatial_ref::SpatialRef;
use crate::vector::Geometry;

struct TransformHandle {
    c_transform: OGRCoordinateTransformationH,
    source: SpatialRef,
    target: SpatialRef,
}

impl Drop for TransformHandle {
    fn drop(&mut self) {
        unsafe { gdal_sys::OCTDestroyCoordinateTransformation(self.c_transform) };
    }
}

/// A reusable transformation from one [`SpatialRef`] to another.
///
/// Building a transformation asks PROJ to pick an operation path, which is
/// comparatively slow; applying it is cheap. Clones share the native handle.
#[derive(Clone)]
pub struct CoordTransform {
    inner: Rc<TransformHandle>,
}

impl CoordTransform {
    /// Fails with [`OgrioError::CrsTransformError`] when PROJ finds no
    /// operation between `source` and `target`.
    pub fn new(source: &SpatialRef, target: &SpatialRef) -> Result<CoordTransform> {
        let captured = with_error_capture(|| unsafe {
            gdal_sys::OCTNewCoordinateTransformation(source.c_srs(), target.c_srs())
        });
        log_warnings("OCTNewCoordinateTransformation", &captured.diagnostics);
        if captured.value.is_null() {
            return Err(OgrioError::CrsTransformError {
                msg: format!("no transformation from {source:?} to {target:?}"),
                native: captured.diagnostics.last_error().cloned(),
            });
        }
        Ok(CoordTransform {
            inner: Rc::new(TransformHandle {
                c_transform: captured.value,
                source: source.clone(),
                target: target.clone(),
            }),
        })
    }

    pub fn source(&self) -> &SpatialRef {
        &self.inner.source
    }

    pub fn target(&self) -> &SpatialRef {
        &self.inner.target
    }

    /// Transforms coordinate slices in place. `z` may be empty.
    pub fn transform_coords(&self, x: &mut [f64], y: &mut [f64], z: &mut [f64]) -> Result<()> {
        let nb_coords = x.len();
        if nb_coords != y.len() || (!z.is_empty() && nb_coords != z.len()) {
            return Err(OgrioError::BadArgument(format!(
                "coordinate slices have different lengths: {} / {} / {}",
                nb_coords,
                y.len(),
                z.len()
            )));
        }
        if nb_coords == 0 {
            return Ok(());
        }
        let z_ptr = if z.is_empty() {
            ptr::null_mut()
        } else {
            z.as_mut_ptr()
        };
        let captured = with_error_capture(|| unsafe {
            gdal_sys::OCTTransform(
                self.inner.c_transform,
                nb_coords as c_int,
                x.as_mut_ptr(),
                y.as_mut_ptr(),
                z_ptr,
            )
        });
        log_warnings("OCTTransform", &captured.diagnostics);
        if captured.value == 0 {
            return Err(OgrioError::CrsTransformError {
                msg: format!(
                    "coordinates out of range for {:?} -> {:?}",
                    self.source(),
                    self.target()
                ),
                native: captured.diagnostics.last_error().cloned(),
            });
        }
        Ok(())
    }

    /// Reprojects every vertex of `geometry`.
    ///
    /// The result has the same structure as the input. Vertices are mapped
    /// independently; edges are not densified, so a straight edge in the
    /// source CRS is not necessarily straight in the target. Z values are
    /// transformed when present, M values are carried over.
    pub fn apply(&self, geometry: &Geometry) -> Result<Geometry> {
        let mut out = geometry.clone();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }

    pub fn apply_in_place(&self, geometry: &mut Geometry) -> Result<()> {
        let has_z = geometry.has_z();
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let mut zs = Vec::new();
        geometry.for_each_coord(&mut |c| {
            xs.push(c.x);
            ys.push(c.y);
            if has_z {
                zs.push(c.z.unwrap_or(0.0));
            }
        });

        self.transform_coords(&mut xs, &mut ys, &mut zs)?;

        let mut idx = 0;
        geometry.for_each_coord_mut(&mut |c| {
            c.x = xs[idx];
            c.y = ys[idx];
            if has_z && c.z.is_some() {
                c.z = Some(zs[idx]);
            }
            idx += 1;
        });
        Ok(())
    }
}

impl Debug for CoordTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordTransform")
            .field("source", self.source())
            .field("target", self.target())
            .finish()
    }
}

/// Reprojects a single geometry. Prefer a [`CoordTransform`] or a
/// [`TransformCache`] when transforming many geometries.
pub fn transform_geometry(
    source: &SpatialRef,
    target: &SpatialRef,
    geometry: &Geometry,
) -> Result<Geometry> {
    CoordTransform::new(source, target)?.apply(geometry)
}

/// Transformations keyed by their (source, target) pair.
///
/// Nothing is cached implicitly; callers that reproject between the same pair
/// of CRSs repeatedly keep one of these around.
#[derive(Debug, Default)]
pub struct TransformCache {
    transforms: HashMap<(String, String), CoordTransform>,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, source: &SpatialRef, target: &SpatialRef) -> Result<CoordTransform> {
        let key = (source.to_wkt().to_string(), target.to_wkt().to_string());
        if let Some(transform) = self.transforms.get(&key) {
            return Ok(transform.clone());
        }
        let transform = CoordTransform::new(source, target)?;
        self.transforms.insert(key, transform.clone());
        Ok(transform)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn clear(&mut self) {
        self.transforms.clear();
    }
}
