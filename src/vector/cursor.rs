use std::ffi::CString;
use std::fmt::{Debug, Formatter};
use std::ptr;
use std::rc::Rc;

use gdal_sys::{OGRErr, OGRLayerH};
use log::trace;

use crate::capture::with_error_capture;
use crate::cpl::CslStringList;
use crate::errors::{OgrioError, Result};
use crate::spatial_ref::CoordTransform;
use crate::vector::feature::{read_feature, Feature, FieldBinding, OwnedFeature};
use crate::vector::geometry::Envelope;
use crate::vector::layer::{reset_read_state, Layer, LayerCapability};
use crate::vector::options::CursorOptions;
use crate::vector::source::SourceHandle;

/// A forward-only pass over the features of a layer.
///
/// Each call to `next` pulls one native feature, decodes it, applies the
/// bounding box, offset and limit, and reprojects it. A feature that cannot
/// be decoded yields an `Err` for that item only; iteration can go on.
///
/// GDAL keeps a single read position per layer, so a cursor stops working
/// once another cursor is created on the same layer, once an operation such
/// as [`Layer::feature_count`] moves the read position, or once the data
/// source is closed. From then on every `next` yields
/// [`OgrioError::UnsupportedOperation`] and the iterator never ends, so a
/// loop that skips errors must stop on the first one. A cursor that already
/// returned `None` keeps returning `None`.
pub struct Cursor {
    source: Rc<SourceHandle>,
    c_layer: OGRLayerH,
    layer: String,
    generation: u64,
    epoch: u64,
    bindings: Vec<FieldBinding>,
    read_geometry: bool,
    keep_geometry: bool,
    bbox: Option<Envelope>,
    transform: Option<CoordTransform>,
    to_skip: usize,
    remaining: Option<usize>,
    exhausted: bool,
}

impl Cursor {
    pub(crate) fn new(layer: &Layer, options: CursorOptions) -> Result<Cursor> {
        let c_layer = layer.c_layer("cursor")?;

        let transform = match (options.target_crs, layer.srs()) {
            (None, _) => None,
            (Some(_), None) => {
                return Err(OgrioError::CrsTransformError {
                    msg: format!("layer '{}' has no CRS to reproject from", layer.name()),
                    native: None,
                })
            }
            (Some(target), Some(source)) => Some(CoordTransform::new(source, target)?),
        };

        if let Some(unknown) = options
            .ignore_fields
            .iter()
            .find(|name| layer.schema().field(name).is_none())
        {
            return Err(OgrioError::InvalidFieldName {
                field_name: unknown.to_string(),
            });
        }
        let bindings: Vec<FieldBinding> = layer
            .bindings()
            .iter()
            .filter(|b| !options.ignore_fields.contains(&b.name.as_str()))
            .cloned()
            .collect();

        // The box is checked on decoded geometries too, so they are read
        // even when the caller does not want them.
        let read_geometry = !options.ignore_geometry || options.bbox.is_some();
        let mut ignored = CslStringList::from_strings(options.ignore_fields)?;
        if !read_geometry {
            ignored.add_string("OGR_GEOMETRY")?;
        }
        let c_filter = options.attribute_filter.map(CString::new).transpose()?;
        let can_ignore = layer.test_capability(LayerCapability::IgnoreFields)?;

        let source = layer.source();
        // Older cursors lose their read position below, even if this one
        // fails to start.
        let epoch = source.bump_read_epoch(layer.name());
        let captured = with_error_capture(|| unsafe {
            match options.bbox {
                Some(bbox) => gdal_sys::OGR_L_SetSpatialFilterRect(
                    c_layer,
                    bbox.min_x,
                    bbox.min_y,
                    bbox.max_x,
                    bbox.max_y,
                ),
                None => gdal_sys::OGR_L_SetSpatialFilter(c_layer, ptr::null_mut()),
            }
            if can_ignore {
                gdal_sys::OGR_L_SetIgnoredFields(c_layer, ignored.as_ptr() as _);
            }
            let rv = gdal_sys::OGR_L_SetAttributeFilter(
                c_layer,
                c_filter.as_ref().map_or(ptr::null(), |f| f.as_ptr()),
            );
            gdal_sys::OGR_L_ResetReading(c_layer);
            rv
        });
        source.record("OGR_L_SetAttributeFilter", &captured.diagnostics);
        let failed =
            captured.value != OGRErr::OGRERR_NONE || captured.diagnostics.last_error().is_some();
        if failed {
            unsafe { reset_read_state(c_layer) };
        }
        if captured.value != OGRErr::OGRERR_NONE {
            let detail = captured
                .diagnostics
                .last_error()
                .map(|r| format!(": {}", r.message))
                .unwrap_or_default();
            return Err(OgrioError::BadArgument(format!(
                "invalid attribute filter '{}'{detail}",
                options.attribute_filter.unwrap_or_default()
            )));
        }
        captured.diagnostics.check("OGR_L_SetSpatialFilterRect")?;

        trace!("cursor #{epoch} on layer '{}'", layer.name());
        Ok(Cursor {
            source: source.clone(),
            c_layer,
            layer: layer.name().to_string(),
            generation: layer.generation(),
            epoch,
            bindings,
            read_geometry,
            keep_geometry: !options.ignore_geometry,
            bbox: options.bbox,
            transform,
            to_skip: options.offset,
            remaining: options.limit,
            exhausted: false,
        })
    }

    fn check_current(&self) -> Result<()> {
        self.source
            .check_layer(&self.layer, self.generation, "next")?;
        if self.source.read_epoch(&self.layer) != self.epoch {
            return Err(OgrioError::unsupported(
                "next",
                format!("cursor on layer '{}' was superseded", self.layer),
            ));
        }
        Ok(())
    }

    /// Pulls the next native feature, `None` at the end of the layer.
    fn pull(&mut self) -> Option<Result<Feature>> {
        let captured = with_error_capture(|| unsafe { gdal_sys::OGR_L_GetNextFeature(self.c_layer) });
        self.source
            .record("OGR_L_GetNextFeature", &captured.diagnostics);
        if captured.value.is_null() {
            self.exhausted = true;
            return match captured.diagnostics.check("OGR_L_GetNextFeature") {
                Ok(()) => None,
                Err(e) => Some(Err(e)),
            };
        }
        let owned = unsafe { OwnedFeature::from_raw(captured.value) };
        Some(unsafe { read_feature(owned.as_ptr(), &self.bindings, self.read_geometry) })
    }
}

/// Backends may treat the pushed-down box loosely, so every feature is
/// checked again. Features without geometry never match a box.
fn in_bbox(bbox: Option<&Envelope>, feature: &Feature) -> bool {
    match bbox {
        None => true,
        Some(bbox) => feature
            .geometry()
            .and_then(|g| g.envelope())
            .is_some_and(|env| env.intersects(bbox)),
    }
}

impl Iterator for Cursor {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || self.remaining == Some(0) {
            return None;
        }
        if let Err(e) = self.check_current() {
            return Some(Err(e));
        }
        loop {
            let mut feature = match self.pull()? {
                Ok(feature) => feature,
                Err(e) => return Some(Err(e)),
            };
            if !in_bbox(self.bbox.as_ref(), &feature) {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            if !self.keep_geometry {
                feature.set_geometry(None);
            }
            if let (Some(transform), Some(geometry)) = (&self.transform, feature.geometry_mut()) {
                if let Err(e) = transform.apply_in_place(geometry) {
                    return Some(Err(e));
                }
            }
            return Some(Ok(feature));
        }
    }
}

impl Debug for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("layer", &self.layer)
            .field("bbox", &self.bbox)
            .field("transform", &self.transform)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::geometry::{Coord, Geometry};

    fn with_geometry(geometry: Geometry) -> Feature {
        Feature::new().with_geometry(geometry)
    }

    #[test]
    fn bbox_is_checked_on_decoded_envelopes() {
        let bbox = Envelope::new(0.0, 0.0, 10.0, 10.0);
        let inside = with_geometry(Geometry::Point(Some(Coord::xy(5.0, 5.0))));
        let on_edge = with_geometry(Geometry::Point(Some(Coord::xy(10.0, 3.0))));
        let crossing = with_geometry(Geometry::LineString(vec![
            Coord::xy(-5.0, 5.0),
            Coord::xy(15.0, 5.0),
        ]));
        let disjoint = with_geometry(Geometry::LineString(vec![
            Coord::xy(20.0, 20.0),
            Coord::xy(30.0, 25.0),
        ]));

        assert!(in_bbox(Some(&bbox), &inside));
        assert!(in_bbox(Some(&bbox), &on_edge));
        assert!(in_bbox(Some(&bbox), &crossing));
        assert!(!in_bbox(Some(&bbox), &disjoint));
    }

    #[test]
    fn features_without_geometry_never_match_a_bbox() {
        let bbox = Envelope::new(0.0, 0.0, 10.0, 10.0);
        let bare = Feature::new().with_field("name", "x");
        let empty = with_geometry(Geometry::LineString(vec![]));

        assert!(!in_bbox(Some(&bbox), &bare));
        assert!(!in_bbox(Some(&bbox), &empty));
        assert!(in_bbox(None, &bare));
    }
}
