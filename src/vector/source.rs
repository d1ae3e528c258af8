use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_int, CString};
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::ptr;
use std::rc::Rc;

use gdal_sys::{GDALDataType, GDALDatasetH, OGRErr, OGRLayerH};
use log::{debug, trace, warn};

use crate::capture::{log_warnings, with_error_capture, Diagnostics};
use crate::cpl::CslStringList;
use crate::driver::{DriverCapabilities, DriverDescriptor, DriverRegistry};
use crate::errors::{ErrorRecord, OgrioError, Result};
use crate::utils::{_path_to_c_string, _string};
use crate::vector::geometry::Envelope;
use crate::vector::layer::Layer;
use crate::vector::options::{LayerOptions, LayerRef, OpenMode, OpenOptions};
use crate::vector::schema::FieldSchema;

// Open flags from gdal.h; gdal-sys does not export these macros.
const GDAL_OF_UPDATE: std::ffi::c_uint = 0x01;
const GDAL_OF_VECTOR: std::ffi::c_uint = 0x04;
const GDAL_OF_VERBOSE_ERROR: std::ffi::c_uint = 0x40;

#[derive(Debug, Clone, Copy, Default)]
struct LayerState {
    generation: u64,
    read_epoch: u64,
    /// `Some(None)` caches the extent of an empty layer.
    envelope: Option<Option<Envelope>>,
}

/// State shared by a data source and everything derived from it.
pub(crate) struct SourceHandle {
    /// Null once closed.
    c_dataset: Cell<GDALDatasetH>,
    path: String,
    mode: OpenMode,
    driver: DriverDescriptor,
    warnings: RefCell<Vec<ErrorRecord>>,
    layers: RefCell<HashMap<String, LayerState>>,
}

impl SourceHandle {
    pub(crate) fn is_open(&self) -> bool {
        !self.c_dataset.get().is_null()
    }

    /// The native dataset, or [`OgrioError::UnsupportedOperation`] once closed.
    pub(crate) fn c_dataset(&self, operation: &'static str) -> Result<GDALDatasetH> {
        let c_dataset = self.c_dataset.get();
        if c_dataset.is_null() {
            return Err(OgrioError::closed(operation));
        }
        Ok(c_dataset)
    }

    pub(crate) fn mode(&self) -> OpenMode {
        self.mode
    }

    pub(crate) fn driver(&self) -> &DriverDescriptor {
        &self.driver
    }

    pub(crate) fn require_update(&self, operation: &'static str) -> Result<()> {
        match self.mode {
            OpenMode::Update => Ok(()),
            OpenMode::Read => Err(OgrioError::unsupported(
                operation,
                format!("'{}' is opened read-only", self.path),
            )),
        }
    }

    /// Logs the warnings of a finished capture and keeps them in the
    /// source's warning log.
    pub(crate) fn record(&self, context: &str, diagnostics: &Diagnostics) {
        log_warnings(context, diagnostics);
        self.warnings
            .borrow_mut()
            .extend(diagnostics.warnings().cloned());
    }

    pub(crate) fn layer_generation(&self, layer: &str) -> u64 {
        self.layers
            .borrow()
            .get(layer)
            .map(|s| s.generation)
            .unwrap_or_default()
    }

    /// Fails unless the source is open and the layer has not been deleted
    /// since `generation` was read.
    pub(crate) fn check_layer(
        &self,
        layer: &str,
        generation: u64,
        operation: &'static str,
    ) -> Result<GDALDatasetH> {
        let c_dataset = self.c_dataset(operation)?;
        if self.layer_generation(layer) != generation {
            return Err(OgrioError::unsupported(
                operation,
                format!("layer '{layer}' was deleted"),
            ));
        }
        Ok(c_dataset)
    }

    pub(crate) fn read_epoch(&self, layer: &str) -> u64 {
        self.layers
            .borrow()
            .get(layer)
            .map(|s| s.read_epoch)
            .unwrap_or_default()
    }

    /// Marks the native read position of `layer` as moved; cursors created
    /// before this call are superseded.
    pub(crate) fn bump_read_epoch(&self, layer: &str) -> u64 {
        let mut layers = self.layers.borrow_mut();
        let state = layers.entry(layer.to_string()).or_default();
        state.read_epoch += 1;
        state.read_epoch
    }

    pub(crate) fn cached_envelope(&self, layer: &str) -> Option<Option<Envelope>> {
        self.layers.borrow().get(layer).and_then(|s| s.envelope)
    }

    pub(crate) fn cache_envelope(&self, layer: &str, envelope: Option<Envelope>) {
        let mut layers = self.layers.borrow_mut();
        layers.entry(layer.to_string()).or_default().envelope = Some(envelope);
    }

    pub(crate) fn invalidate_envelope(&self, layer: &str) {
        if let Some(state) = self.layers.borrow_mut().get_mut(layer) {
            state.envelope = None;
        }
    }

    fn forget_layer(&self, layer: &str) {
        let mut layers = self.layers.borrow_mut();
        let state = layers.entry(layer.to_string()).or_default();
        state.generation += 1;
        state.read_epoch += 1;
        state.envelope = None;
    }

    fn close_native(&self) -> Diagnostics {
        let c_dataset = self.c_dataset.replace(ptr::null_mut());
        if c_dataset.is_null() {
            return Diagnostics::default();
        }
        debug!("closing '{}'", self.path);
        // The return value of GDALClose only exists since GDAL 3.7.
        let captured = with_error_capture(|| unsafe { gdal_sys::GDALClose(c_dataset) });
        self.record("GDALClose", &captured.diagnostics);
        captured.diagnostics
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        let diagnostics = self.close_native();
        if let Some(record) = diagnostics.last_error() {
            log::error!("closing '{}' failed: {record}", self.path);
        }
    }
}

/// An opened vector resource: a file, a directory, a database connection or
/// anything else a driver can open.
///
/// Layers and cursors obtained from a data source keep sharing its native
/// handle; [`close`](DataSource::close) (or dropping the data source)
/// releases it, after which every derived object fails with
/// [`OgrioError::UnsupportedOperation`].
///
/// ```rust, no_run
/// use ogrio::vector::{CursorOptions, DataSource, OpenOptions};
///
/// let source = DataSource::open("fixtures/points.geojson", OpenOptions::default())?;
/// let layer = source.layer(0)?;
/// for feature in layer.cursor(CursorOptions::default())? {
///     let feature = feature?;
///     println!("{:?} {:?}", feature.fid(), feature.geometry());
/// }
/// # Ok::<(), ogrio::errors::OgrioError>(())
/// ```
pub struct DataSource {
    inner: Rc<SourceHandle>,
}

impl DataSource {
    /// Opens the resource at `path`.
    ///
    /// With [`OpenOptions::driver`] set only that driver is tried. It must
    /// support reading, and appending when opening in
    /// [`OpenMode::Update`].
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<DataSource> {
        let path = path.as_ref();
        let registry = DriverRegistry::global();
        if let Some(name) = options.driver {
            let hint = registry.find(name)?;
            hint.require(DriverCapabilities::READ, "open")?;
            if options.mode == OpenMode::Update {
                hint.require(DriverCapabilities::APPEND, "open")?;
            }
        }

        let c_path = _path_to_c_string(path)?;
        let mut flags = GDAL_OF_VECTOR | GDAL_OF_VERBOSE_ERROR;
        if options.mode == OpenMode::Update {
            flags |= GDAL_OF_UPDATE;
        }
        let drivers = CslStringList::from_strings(options.driver)?;
        let open_options = CslStringList::from_strings(options.open_options.unwrap_or_default())?;

        let captured = with_error_capture(|| unsafe {
            gdal_sys::GDALOpenEx(
                c_path.as_ptr(),
                flags as _,
                drivers.as_ptr() as _,
                open_options.as_ptr() as _,
                ptr::null(),
            )
        });
        log_warnings("GDALOpenEx", &captured.diagnostics);
        if captured.value.is_null() {
            return Err(OgrioError::DataSourceOpenError {
                path: path.to_string_lossy().into_owned(),
                native: captured.diagnostics.last_error().cloned(),
            });
        }
        let source = Self::from_c_dataset(captured.value, path, options.mode)?;
        source
            .inner
            .warnings
            .borrow_mut()
            .extend(captured.diagnostics.into_warnings());
        Ok(source)
    }

    /// Creates a new resource with the named driver and opens it for update.
    ///
    /// `creation_options` are driver-specific, in the form `name=value`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        driver: &str,
        creation_options: &[&str],
    ) -> Result<DataSource> {
        let path = path.as_ref();
        let descriptor = DriverRegistry::global().find(driver)?;
        descriptor.require(DriverCapabilities::CREATE_DATASOURCE, "create")?;
        let c_driver = descriptor.c_driver()?;
        let c_path = _path_to_c_string(path)?;
        let options = CslStringList::from_strings(creation_options)?;

        let captured = with_error_capture(|| unsafe {
            gdal_sys::GDALCreate(
                c_driver,
                c_path.as_ptr(),
                0,
                0,
                0,
                GDALDataType::GDT_Unknown,
                options.as_ptr() as _,
            )
        });
        log_warnings("GDALCreate", &captured.diagnostics);
        if captured.value.is_null() {
            return Err(OgrioError::DataSourceOpenError {
                path: path.to_string_lossy().into_owned(),
                native: captured.diagnostics.last_error().cloned(),
            });
        }
        let source = Self::from_c_dataset(captured.value, path, OpenMode::Update)?;
        source
            .inner
            .warnings
            .borrow_mut()
            .extend(captured.diagnostics.into_warnings());
        Ok(source)
    }

    fn from_c_dataset(c_dataset: GDALDatasetH, path: &Path, mode: OpenMode) -> Result<DataSource> {
        let c_driver = unsafe { gdal_sys::GDALGetDatasetDriver(c_dataset) };
        let name = if c_driver.is_null() {
            String::new()
        } else {
            _string(unsafe { gdal_sys::GDALGetDriverShortName(c_driver) })
        };
        let driver = match DriverRegistry::global().find(&name) {
            Ok(driver) => driver.clone(),
            Err(e) => {
                unsafe { gdal_sys::GDALClose(c_dataset) };
                return Err(e);
            }
        };
        debug!("opened '{}' with {} ({:?})", path.display(), driver.name(), mode);
        Ok(DataSource {
            inner: Rc::new(SourceHandle {
                c_dataset: Cell::new(c_dataset),
                path: path.to_string_lossy().into_owned(),
                mode,
                driver,
                warnings: RefCell::default(),
                layers: RefCell::default(),
            }),
        })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    pub fn driver(&self) -> &DriverDescriptor {
        &self.inner.driver
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.is_open()
    }

    pub fn layer_count(&self) -> Result<usize> {
        let c_dataset = self.inner.c_dataset("layer_count")?;
        Ok(unsafe { gdal_sys::GDALDatasetGetLayerCount(c_dataset) }.max(0) as usize)
    }

    /// Layer names in the order the backend lists them.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let c_dataset = self.inner.c_dataset("list_layers")?;
        let count = unsafe { gdal_sys::GDALDatasetGetLayerCount(c_dataset) }.max(0);
        Ok((0..count)
            .map(|idx| unsafe { gdal_sys::GDALDatasetGetLayer(c_dataset, idx) })
            .filter(|c_layer| !c_layer.is_null())
            .map(|c_layer| _string(unsafe { gdal_sys::OGR_L_GetName(c_layer) }))
            .collect())
    }

    fn c_layer(&self, layer: LayerRef, operation: &'static str) -> Result<OGRLayerH> {
        let c_dataset = self.inner.c_dataset(operation)?;
        let c_layer = match layer {
            LayerRef::Name(name) => {
                let c_name = CString::new(name)?;
                unsafe { gdal_sys::GDALDatasetGetLayerByName(c_dataset, c_name.as_ptr()) }
            }
            LayerRef::Index(idx) => {
                let count = unsafe { gdal_sys::GDALDatasetGetLayerCount(c_dataset) }.max(0);
                if idx < count as usize {
                    unsafe { gdal_sys::GDALDatasetGetLayer(c_dataset, idx as c_int) }
                } else {
                    ptr::null_mut()
                }
            }
        };
        if c_layer.is_null() {
            return Err(OgrioError::LayerNotFound {
                layer: match layer {
                    LayerRef::Name(name) => name.to_string(),
                    LayerRef::Index(idx) => format!("#{idx}"),
                },
            });
        }
        Ok(c_layer)
    }

    /// Looks a layer up by name or position.
    pub fn layer<'a>(&self, layer: impl Into<LayerRef<'a>>) -> Result<Layer> {
        let c_layer = self.c_layer(layer.into(), "layer")?;
        unsafe { Layer::from_c_layer(self.inner.clone(), c_layer) }
    }

    /// Adds a layer. The data source must be opened for update and the driver
    /// must be able to create layers.
    pub fn create_layer(&self, options: LayerOptions) -> Result<Layer> {
        let c_dataset = self.inner.c_dataset("create_layer")?;
        self.inner.require_update("create_layer")?;
        self.inner
            .driver
            .require(DriverCapabilities::CREATE_LAYER, "create_layer")?;

        let c_name = CString::new(options.name)?;
        let c_srs = match options.srs {
            Some(srs) => unsafe { srs.c_srs() },
            None => ptr::null_mut(),
        };
        let layer_options = CslStringList::from_strings(options.options.unwrap_or_default())?;
        let geometry_type = options.geometry_type.to_ogr(options.dimensions);

        let captured = with_error_capture(|| unsafe {
            gdal_sys::GDALDatasetCreateLayer(
                c_dataset,
                c_name.as_ptr(),
                c_srs,
                geometry_type,
                layer_options.as_ptr() as _,
            )
        });
        self.inner.record("GDALDatasetCreateLayer", &captured.diagnostics);
        if captured.value.is_null() {
            captured.diagnostics.check("GDALDatasetCreateLayer")?;
            return Err(OgrioError::unsupported(
                "create_layer",
                format!("driver '{}' refused layer '{}'", self.driver().name(), options.name),
            ));
        }
        let c_layer = captured.value;

        if let Err(err) = self.create_fields(c_layer, options.fields) {
            self.discard_new_layer(c_dataset, c_layer, options.name);
            return Err(err);
        }
        trace!(
            "created layer '{}' with {} fields",
            options.name,
            options.fields.len()
        );
        unsafe { Layer::from_c_layer(self.inner.clone(), c_layer) }
    }

    fn create_fields(&self, c_layer: OGRLayerH, fields: &[FieldSchema]) -> Result<()> {
        for field in fields {
            let c_field_name = CString::new(field.name.as_str())?;
            let (field_type, subtype) = field.field_type.to_ogr();
            let captured = with_error_capture(|| unsafe {
                let c_field = gdal_sys::OGR_Fld_Create(c_field_name.as_ptr(), field_type);
                gdal_sys::OGR_Fld_SetSubType(c_field, subtype);
                gdal_sys::OGR_Fld_SetWidth(c_field, field.width);
                gdal_sys::OGR_Fld_SetPrecision(c_field, field.precision);
                gdal_sys::OGR_Fld_SetNullable(c_field, field.nullable as c_int);
                let rv = gdal_sys::OGR_L_CreateField(c_layer, c_field, 1);
                gdal_sys::OGR_Fld_Destroy(c_field);
                rv
            });
            self.inner.record("OGR_L_CreateField", &captured.diagnostics);
            captured.diagnostics.check("OGR_L_CreateField")?;
            if captured.value != OGRErr::OGRERR_NONE {
                return Err(OgrioError::from_ogr_err(captured.value, "OGR_L_CreateField"));
            }
        }
        Ok(())
    }

    /// Drops a layer whose fields could not all be created. The field error
    /// is the one reported, so a failure here is only logged.
    fn discard_new_layer(&self, c_dataset: GDALDatasetH, c_layer: OGRLayerH, name: &str) {
        let count = unsafe { gdal_sys::GDALDatasetGetLayerCount(c_dataset) };
        let index = (0..count)
            .find(|&idx| unsafe { gdal_sys::GDALDatasetGetLayer(c_dataset, idx) } == c_layer);
        let Some(index) = index else {
            warn!("could not find half-built layer '{name}' to remove it");
            return;
        };
        let captured =
            with_error_capture(|| unsafe { gdal_sys::GDALDatasetDeleteLayer(c_dataset, index) });
        self.inner.record("GDALDatasetDeleteLayer", &captured.diagnostics);
        if captured.value != OGRErr::OGRERR_NONE || captured.diagnostics.last_error().is_some() {
            warn!("could not remove half-built layer '{name}' from '{}'", self.path());
        } else {
            self.inner.forget_layer(name);
            debug!("removed half-built layer '{name}' from '{}'", self.path());
        }
    }

    /// Removes a layer. Layer objects already obtained for it stop working.
    pub fn delete_layer<'a>(&self, layer: impl Into<LayerRef<'a>>) -> Result<()> {
        let layer = layer.into();
        let c_dataset = self.inner.c_dataset("delete_layer")?;
        self.inner.require_update("delete_layer")?;
        self.inner
            .driver
            .require(DriverCapabilities::DELETE_LAYER, "delete_layer")?;

        let c_layer = self.c_layer(layer, "delete_layer")?;
        let name = _string(unsafe { gdal_sys::OGR_L_GetName(c_layer) });
        let count = unsafe { gdal_sys::GDALDatasetGetLayerCount(c_dataset) };
        let index = (0..count)
            .find(|&idx| unsafe { gdal_sys::GDALDatasetGetLayer(c_dataset, idx) } == c_layer)
            .ok_or_else(|| OgrioError::LayerNotFound { layer: name.clone() })?;

        let captured =
            with_error_capture(|| unsafe { gdal_sys::GDALDatasetDeleteLayer(c_dataset, index) });
        self.inner.record("GDALDatasetDeleteLayer", &captured.diagnostics);
        captured.diagnostics.check("GDALDatasetDeleteLayer")?;
        match captured.value {
            OGRErr::OGRERR_NONE => {
                self.inner.forget_layer(&name);
                debug!("deleted layer '{name}' from '{}'", self.path());
                Ok(())
            }
            OGRErr::OGRERR_UNSUPPORTED_OPERATION => Err(OgrioError::unsupported(
                "delete_layer",
                format!("driver '{}' cannot delete layers here", self.driver().name()),
            )),
            err => Err(OgrioError::from_ogr_err(err, "GDALDatasetDeleteLayer")),
        }
    }

    /// Warnings raised so far by operations on this source and the layers
    /// and cursors derived from it.
    pub fn warnings(&self) -> Vec<ErrorRecord> {
        self.inner.warnings.borrow().clone()
    }

    pub fn take_warnings(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut *self.inner.warnings.borrow_mut())
    }

    /// Flushes and releases the native handle.
    ///
    /// Returns the warnings raised while flushing. Closing an already closed
    /// source does nothing.
    pub fn close(&mut self) -> Result<Vec<ErrorRecord>> {
        let diagnostics = self.inner.close_native();
        diagnostics.check("GDALClose")?;
        Ok(diagnostics.into_warnings())
    }

    /// Opens `path`, lists its layers and closes it again.
    pub fn list_layers_at<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let mut source = DataSource::open(path, OpenOptions::default())?;
        let layers = source.list_layers()?;
        source.close()?;
        Ok(layers)
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        let diagnostics = self.inner.close_native();
        if let Some(record) = diagnostics.last_error() {
            log::error!("closing '{}' failed: {record}", self.inner.path);
        }
    }
}

impl Debug for DataSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .field("driver", &self.inner.driver.name())
            .field("closed", &!self.inner.is_open())
            .finish()
    }
}
