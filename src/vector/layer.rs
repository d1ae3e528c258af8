use std::ffi::{c_char, CString};
use std::fmt::{Debug, Formatter};
use std::ptr;
use std::rc::Rc;

use gdal_sys::{OGREnvelope, OGRErr, OGRLayerH};
use log::{debug, warn};

use crate::capture::{with_error_capture, Captured};
use crate::errors::{OgrioError, Result};
use crate::spatial_ref::SpatialRef;
use crate::utils::_string;
use crate::vector::cursor::Cursor;
use crate::vector::feature::{read_feature, write_feature, Feature, FieldBinding, OwnedFeature};
use crate::vector::geometry::Envelope;
use crate::vector::options::CursorOptions;
use crate::vector::schema::{GeometryType, LayerSchema};
use crate::vector::source::SourceHandle;

/// Optional layer features, as reported by `OGR_L_TestCapability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerCapability {
    RandomRead,
    SequentialWrite,
    RandomWrite,
    DeleteFeature,
    FastFeatureCount,
    FastGetExtent,
    FastSpatialFilter,
    IgnoreFields,
    Transactions,
    CurveGeometries,
}

impl LayerCapability {
    fn as_str(self) -> &'static str {
        match self {
            LayerCapability::RandomRead => "RandomRead",
            LayerCapability::SequentialWrite => "SequentialWrite",
            LayerCapability::RandomWrite => "RandomWrite",
            LayerCapability::DeleteFeature => "DeleteFeature",
            LayerCapability::FastFeatureCount => "FastFeatureCount",
            LayerCapability::FastGetExtent => "FastGetExtent",
            LayerCapability::FastSpatialFilter => "FastSpatialFilter",
            LayerCapability::IgnoreFields => "IgnoreFields",
            LayerCapability::Transactions => "Transactions",
            LayerCapability::CurveGeometries => "CurveGeometries",
        }
    }
}

/// A named collection of features sharing one schema.
///
/// The schema is read once, when the layer object is created. Mutations
/// require the owning data source to be opened in update mode.
pub struct Layer {
    source: Rc<SourceHandle>,
    c_layer: OGRLayerH,
    name: String,
    generation: u64,
    schema: LayerSchema,
    bindings: Vec<FieldBinding>,
}

/// Clears the filters a cursor may have left on the native layer.
///
/// # Safety
/// `c_layer` must be a valid layer handle.
pub(crate) unsafe fn reset_read_state(c_layer: OGRLayerH) {
    gdal_sys::OGR_L_SetSpatialFilter(c_layer, ptr::null_mut());
    gdal_sys::OGR_L_SetAttributeFilter(c_layer, ptr::null());
    gdal_sys::OGR_L_SetIgnoredFields(c_layer, ptr::null_mut::<*const c_char>() as _);
    gdal_sys::OGR_L_ResetReading(c_layer);
}

impl Layer {
    /// # Safety
    /// `c_layer` must be a layer of the dataset held by `source`.
    pub(crate) unsafe fn from_c_layer(source: Rc<SourceHandle>, c_layer: OGRLayerH) -> Result<Layer> {
        let name = _string(gdal_sys::OGR_L_GetName(c_layer));
        let captured = with_error_capture(|| LayerSchema::from_c_layer(c_layer));
        source.record("OGR_L_GetLayerDefn", &captured.diagnostics);
        let schema = captured.value?;
        let bindings = FieldBinding::for_layer(c_layer, &schema)?;
        let generation = source.layer_generation(&name);
        Ok(Layer {
            source,
            c_layer,
            name,
            generation,
            schema,
            bindings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema snapshot taken when this layer object was created.
    pub fn schema(&self) -> &LayerSchema {
        &self.schema
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.schema.geometry_type
    }

    pub fn srs(&self) -> Option<&SpatialRef> {
        self.schema.srs.as_ref()
    }

    /// The native handle, once the source is known to be alive.
    pub(crate) fn c_layer(&self, operation: &'static str) -> Result<OGRLayerH> {
        self.source
            .check_layer(&self.name, self.generation, operation)?;
        Ok(self.c_layer)
    }

    pub(crate) fn source(&self) -> &Rc<SourceHandle> {
        &self.source
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bindings(&self) -> &[FieldBinding] {
        &self.bindings
    }

    /// Runs a native call under error capture and files its warnings with
    /// the data source.
    fn native<T, F: FnOnce() -> T>(&self, method_name: &'static str, call: F) -> Captured<T> {
        let captured = with_error_capture(call);
        self.source.record(method_name, &captured.diagnostics);
        captured
    }

    pub fn test_capability(&self, capability: LayerCapability) -> Result<bool> {
        let c_layer = self.c_layer("test_capability")?;
        let c_capability = CString::new(capability.as_str())?;
        Ok(unsafe { gdal_sys::OGR_L_TestCapability(c_layer, c_capability.as_ptr()) } != 0)
    }

    fn require(&self, capability: LayerCapability, operation: &'static str) -> Result<OGRLayerH> {
        let c_layer = self.c_layer(operation)?;
        self.source.require_update(operation)?;
        if !self.test_capability(capability)? {
            return Err(OgrioError::unsupported(
                operation,
                format!(
                    "layer '{}' ({}) lacks {}",
                    self.name,
                    self.source.driver().name(),
                    capability.as_str()
                ),
            ));
        }
        Ok(c_layer)
    }

    /// Starts a new pass over the layer. Any cursor created earlier on this
    /// layer is superseded.
    pub fn cursor(&self, options: CursorOptions) -> Result<Cursor> {
        Cursor::new(self, options)
    }

    /// Shorthand for a cursor over every feature.
    pub fn features(&self) -> Result<Cursor> {
        self.cursor(CursorOptions::default())
    }

    fn not_found(&self, fid: u64) -> OgrioError {
        OgrioError::FeatureNotFound {
            layer: self.name.clone(),
            fid,
        }
    }

    fn build_feature(&self, c_layer: OGRLayerH, feature: &Feature, with_fid: bool) -> Result<OwnedFeature> {
        let captured = self.native("OGR_F_Create", || unsafe {
            write_feature(
                gdal_sys::OGR_L_GetLayerDefn(c_layer),
                &self.bindings,
                feature,
                with_fid,
            )
        });
        let owned = captured.value?;
        captured.diagnostics.check("OGR_F_Create")?;
        Ok(owned)
    }

    /// Appends `feature` and records the identifier the layer assigned to it,
    /// if any.
    ///
    /// The feature must carry exactly the layer's fields, with compatible
    /// values, and a geometry the layer accepts.
    pub fn insert(&self, feature: &mut Feature) -> Result<Option<u64>> {
        let c_layer = self.require(LayerCapability::SequentialWrite, "insert")?;
        feature.check_schema(&self.schema, &self.name)?;
        let owned = self.build_feature(c_layer, feature, false)?;

        let captured = self.native("OGR_L_CreateFeature", || unsafe {
            gdal_sys::OGR_L_CreateFeature(c_layer, owned.as_ptr())
        });
        captured.diagnostics.check("OGR_L_CreateFeature")?;
        if captured.value != OGRErr::OGRERR_NONE {
            return Err(OgrioError::from_ogr_err(captured.value, "OGR_L_CreateFeature"));
        }
        self.source.invalidate_envelope(&self.name);

        let fid = u64::try_from(unsafe { gdal_sys::OGR_F_GetFID(owned.as_ptr()) }).ok();
        feature.set_fid(fid);
        Ok(fid)
    }

    /// Inserts every feature, inside a single transaction when the backend
    /// offers one. On failure the transaction is rolled back; without a
    /// transaction, features inserted before the failing one stay.
    pub fn insert_many(&self, features: &mut [Feature]) -> Result<Vec<Option<u64>>> {
        let c_dataset = self.source.check_layer(&self.name, self.generation, "insert_many")?;
        self.source.require_update("insert_many")?;

        let started = self.native("GDALDatasetStartTransaction", || unsafe {
            gdal_sys::GDALDatasetStartTransaction(c_dataset, 0)
        });
        let in_transaction = started.value == OGRErr::OGRERR_NONE;
        if !in_transaction {
            debug!("no transaction available for layer '{}'", self.name);
        }

        let mut fids = Vec::with_capacity(features.len());
        for feature in features.iter_mut() {
            match self.insert(feature) {
                Ok(fid) => fids.push(fid),
                Err(e) => {
                    if in_transaction {
                        let rv = unsafe { gdal_sys::GDALDatasetRollbackTransaction(c_dataset) };
                        if rv != OGRErr::OGRERR_NONE {
                            warn!("rollback on layer '{}' failed", self.name);
                        }
                        self.source.invalidate_envelope(&self.name);
                        features.iter_mut().for_each(|f| f.set_fid(None));
                    }
                    return Err(e);
                }
            }
        }

        if in_transaction {
            let committed = self.native("GDALDatasetCommitTransaction", || unsafe {
                gdal_sys::GDALDatasetCommitTransaction(c_dataset)
            });
            committed.diagnostics.check("GDALDatasetCommitTransaction")?;
            if committed.value != OGRErr::OGRERR_NONE {
                return Err(OgrioError::from_ogr_err(
                    committed.value,
                    "GDALDatasetCommitTransaction",
                ));
            }
        }
        Ok(fids)
    }

    /// Rewrites the feature with the same fid.
    pub fn update(&self, feature: &Feature) -> Result<()> {
        let fid = feature
            .fid()
            .ok_or_else(|| OgrioError::BadArgument("update needs a feature with a fid".to_string()))?;
        let c_layer = self.require(LayerCapability::RandomWrite, "update")?;
        feature.check_schema(&self.schema, &self.name)?;
        let owned = self.build_feature(c_layer, feature, true)?;

        let captured = self.native("OGR_L_SetFeature", || unsafe {
            gdal_sys::OGR_L_SetFeature(c_layer, owned.as_ptr())
        });
        if captured.value == OGRErr::NON_EXISTING_FEATURE {
            return Err(self.not_found(fid));
        }
        captured.diagnostics.check("OGR_L_SetFeature")?;
        if captured.value != OGRErr::OGRERR_NONE {
            return Err(OgrioError::from_ogr_err(captured.value, "OGR_L_SetFeature"));
        }
        self.source.invalidate_envelope(&self.name);
        Ok(())
    }

    pub fn delete(&self, fid: u64) -> Result<()> {
        let c_layer = self.require(LayerCapability::DeleteFeature, "delete")?;
        let c_fid = i64::try_from(fid).map_err(|_| self.not_found(fid))?;

        let captured = self.native("OGR_L_DeleteFeature", || unsafe {
            gdal_sys::OGR_L_DeleteFeature(c_layer, c_fid)
        });
        if captured.value == OGRErr::NON_EXISTING_FEATURE {
            return Err(self.not_found(fid));
        }
        captured.diagnostics.check("OGR_L_DeleteFeature")?;
        if captured.value != OGRErr::OGRERR_NONE {
            return Err(OgrioError::from_ogr_err(captured.value, "OGR_L_DeleteFeature"));
        }
        self.source.invalidate_envelope(&self.name);
        Ok(())
    }

    /// Prepares the native layer for a whole-layer read that is not a
    /// cursor, superseding running cursors.
    fn claim_read_position(&self, operation: &'static str) -> Result<OGRLayerH> {
        let c_layer = self.c_layer(operation)?;
        self.source.bump_read_epoch(&self.name);
        unsafe { reset_read_state(c_layer) };
        Ok(c_layer)
    }

    /// The extent of all features, `None` for a layer without geometries.
    ///
    /// Computed on first use and cached until the layer is written to.
    pub fn envelope(&self) -> Result<Option<Envelope>> {
        self.c_layer("envelope")?;
        if let Some(cached) = self.source.cached_envelope(&self.name) {
            return Ok(cached);
        }
        let c_layer = self.claim_read_position("envelope")?;
        let mut c_envelope = OGREnvelope {
            MinX: 0.0,
            MaxX: 0.0,
            MinY: 0.0,
            MaxY: 0.0,
        };
        let captured = self.native("OGR_L_GetExtent", || unsafe {
            gdal_sys::OGR_L_GetExtent(c_layer, &mut c_envelope, 1)
        });
        let envelope = match captured.value {
            OGRErr::OGRERR_NONE => Some(Envelope::new(
                c_envelope.MinX,
                c_envelope.MinY,
                c_envelope.MaxX,
                c_envelope.MaxY,
            )),
            // Empty layers and layers without geometry column.
            OGRErr::OGRERR_FAILURE if captured.diagnostics.last_error().is_none() => None,
            err => {
                captured.diagnostics.check("OGR_L_GetExtent")?;
                return Err(OgrioError::from_ogr_err(err, "OGR_L_GetExtent"));
            }
        };
        self.source.cache_envelope(&self.name, envelope);
        Ok(envelope)
    }

    /// Number of features, counting them if the backend cannot tell.
    pub fn feature_count(&self) -> Result<u64> {
        let c_layer = self.claim_read_position("feature_count")?;
        let captured = self.native("OGR_L_GetFeatureCount", || unsafe {
            gdal_sys::OGR_L_GetFeatureCount(c_layer, 1)
        });
        captured.diagnostics.check("OGR_L_GetFeatureCount")?;
        u64::try_from(captured.value).map_err(|_| {
            OgrioError::unsupported(
                "feature_count",
                format!("layer '{}' cannot count its features", self.name),
            )
        })
    }

    /// Reads the feature with identifier `fid`.
    pub fn get(&self, fid: u64) -> Result<Feature> {
        let c_layer = self.claim_read_position("get")?;
        let c_fid = i64::try_from(fid).map_err(|_| self.not_found(fid))?;
        let captured = self.native("OGR_L_GetFeature", || unsafe {
            gdal_sys::OGR_L_GetFeature(c_layer, c_fid)
        });
        if captured.value.is_null() {
            captured.diagnostics.check("OGR_L_GetFeature")?;
            return Err(self.not_found(fid));
        }
        let owned = unsafe { OwnedFeature::from_raw(captured.value) };
        unsafe { read_feature(owned.as_ptr(), &self.bindings, true) }
    }

    /// Flushes pending writes to storage.
    pub fn sync(&self) -> Result<()> {
        let c_layer = self.c_layer("sync")?;
        let captured = self.native("OGR_L_SyncToDisk", || unsafe {
            gdal_sys::OGR_L_SyncToDisk(c_layer)
        });
        captured.diagnostics.check("OGR_L_SyncToDisk")?;
        match captured.value {
            OGRErr::OGRERR_NONE => Ok(()),
            err => Err(OgrioError::from_ogr_err(err, "OGR_L_SyncToDisk")),
        }
    }
}

impl Debug for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("geometry_type", &self.schema.geometry_type)
            .field("fields", &self.schema.fields.len())
            .finish()
    }
}
