//! Vector driver registry.
//!
//! GDAL drivers are registered once per process. The registry records every
//! driver with vector support as a [`DriverDescriptor`], in GDAL's
//! registration order, which is also the order GDAL tries drivers in when a
//! data source is opened without a driver hint.
//!
//! ```rust, no_run
//! use ogrio::{DriverCapabilities, DriverRegistry};
//!
//! let registry = DriverRegistry::global();
//! for driver in registry.list() {
//!     println!("{} ({})", driver.name(), driver.long_name());
//! }
//! let geojson = registry.find("GeoJSON").unwrap();
//! assert!(geojson.capabilities().contains(DriverCapabilities::READ));
//! ```

use std::collections::HashSet;
use std::ffi::CString;
use std::path::Path;
use std::ptr;
use std::sync::OnceLock;

use bitflags::bitflags;
use gdal_sys::GDALDriverH;
use log::{debug, warn};

use crate::capture::{log_warnings, with_error_capture};
use crate::config::RuntimeData;
use crate::errors::{OgrioError, Result};
use crate::utils::{_opt_string, _path_to_c_string};

bitflags! {
    /// What a driver can do, as advertised in its metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DriverCapabilities: u32 {
        /// Existing resources can be opened.
        const READ = 0x01;
        /// Features can be written to new resources.
        const WRITE = 0x02;
        /// Existing resources can be opened in update mode.
        const APPEND = 0x04;
        /// Layers can be removed from a data source.
        const DELETE_LAYER = 0x08;
        /// New data sources can be created.
        const CREATE_DATASOURCE = 0x10;
        /// Layers can be added to a data source.
        const CREATE_LAYER = 0x20;
    }
}

/// An immutable description of one registered vector driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    name: String,
    long_name: String,
    extensions: Vec<String>,
    capabilities: DriverCapabilities,
}

impl DriverDescriptor {
    /// The driver's short name, e.g. `"GPKG"`. This is the identifier used for
    /// driver hints.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    /// File extensions claimed by the driver, without the leading dot.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    pub fn supports(&self, capability: DriverCapabilities) -> bool {
        self.capabilities.contains(capability)
    }

    /// Fails with [`OgrioError::UnsupportedOperation`] unless the driver has
    /// every flag in `capability`.
    pub(crate) fn require(
        &self,
        capability: DriverCapabilities,
        operation: &'static str,
    ) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(OgrioError::unsupported(
                operation,
                format!("driver '{}' lacks {:?}", self.name, capability),
            ))
        }
    }

    /// Looks up the native handle again. Drivers are never deregistered, so
    /// this only fails if GDAL was torn down behind our back.
    pub(crate) fn c_driver(&self) -> Result<GDALDriverH> {
        let c_name = CString::new(self.name.as_str())?;
        let c_driver = unsafe { gdal_sys::GDALGetDriverByName(c_name.as_ptr()) };
        if c_driver.is_null() {
            return Err(OgrioError::DriverNotFound {
                name: self.name.clone(),
            });
        }
        Ok(c_driver)
    }

    fn from_c_driver(c_driver: GDALDriverH) -> Option<DriverDescriptor> {
        let name = _opt_string(unsafe { gdal_sys::GDALGetDriverShortName(c_driver) })?;
        if !is_yes(metadata_item(c_driver, "DCAP_VECTOR")) {
            return None;
        }
        let long_name =
            _opt_string(unsafe { gdal_sys::GDALGetDriverLongName(c_driver) }).unwrap_or_default();
        let extensions = metadata_item(c_driver, "DMD_EXTENSIONS")
            .map(|exts| exts.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Some(DriverDescriptor {
            name,
            long_name,
            extensions,
            capabilities: capabilities_of(c_driver),
        })
    }
}

fn metadata_item(c_driver: GDALDriverH, key: &str) -> Option<String> {
    let c_key = CString::new(key).ok()?;
    _opt_string(unsafe { gdal_sys::GDALGetMetadataItem(c_driver, c_key.as_ptr(), ptr::null()) })
}

fn is_yes(value: Option<String>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("YES"))
}

/// Reads the capability flags of a driver.
///
/// `DCAP_OPEN` is absent for some older drivers that can nonetheless open
/// data, so its absence counts as readable. `DCAP_UPDATE`, `DCAP_CREATE_LAYER`
/// and `DCAP_DELETE_LAYER` are only published by recent GDAL releases; where
/// they are missing, `DCAP_CREATE` stands in for them.
fn capabilities_of(c_driver: GDALDriverH) -> DriverCapabilities {
    let item = |key| metadata_item(c_driver, key);
    let create = is_yes(item("DCAP_CREATE"));
    let flag_or_create = |key| match item(key) {
        Some(v) => v.eq_ignore_ascii_case("YES"),
        None => create,
    };

    let mut caps = DriverCapabilities::empty();
    caps.set(
        DriverCapabilities::READ,
        item("DCAP_OPEN").map_or(true, |v| v.eq_ignore_ascii_case("YES")),
    );
    caps.set(DriverCapabilities::WRITE, create);
    caps.set(DriverCapabilities::CREATE_DATASOURCE, create);
    caps.set(DriverCapabilities::APPEND, flag_or_create("DCAP_UPDATE"));
    caps.set(DriverCapabilities::CREATE_LAYER, flag_or_create("DCAP_CREATE_LAYER"));
    caps.set(DriverCapabilities::DELETE_LAYER, flag_or_create("DCAP_DELETE_LAYER"));
    caps
}

/// The process-wide set of vector drivers.
#[derive(Debug)]
pub struct DriverRegistry {
    drivers: Vec<DriverDescriptor>,
}

static REGISTRY: OnceLock<DriverRegistry> = OnceLock::new();

impl DriverRegistry {
    /// Returns the registry, registering GDAL's drivers on first use.
    pub fn global() -> &'static DriverRegistry {
        REGISTRY.get_or_init(DriverRegistry::initialize)
    }

    fn initialize() -> DriverRegistry {
        match RuntimeData::from_env().apply() {
            Ok(warnings) => debug!("runtime data applied with {} warnings", warnings.len()),
            Err(e) => warn!("runtime data not applied: {e}"),
        }

        let captured = with_error_capture(|| {
            unsafe { gdal_sys::GDALAllRegister() };
            let count = unsafe { gdal_sys::GDALGetDriverCount() }.max(0);
            let mut seen = HashSet::new();
            let mut drivers = Vec::new();
            for idx in 0..count {
                let c_driver = unsafe { gdal_sys::GDALGetDriver(idx) };
                if c_driver.is_null() {
                    warn!("GDAL driver #{idx} has no handle, skipping");
                    continue;
                }
                if let Some(descriptor) = DriverDescriptor::from_c_driver(c_driver) {
                    if seen.insert(descriptor.name.clone()) {
                        drivers.push(descriptor);
                    }
                }
            }
            drivers
        });
        log_warnings("driver registration", &captured.diagnostics);
        if let Some(record) = captured.diagnostics.last_error() {
            warn!("driver registration reported an error: {record}");
        }

        debug!("registered {} vector drivers", captured.value.len());
        DriverRegistry {
            drivers: captured.value,
        }
    }

    pub fn list(&self) -> &[DriverDescriptor] {
        &self.drivers
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn find(&self, name: &str) -> Result<&DriverDescriptor> {
        self.drivers
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| OgrioError::DriverNotFound {
                name: name.to_string(),
            })
    }

    /// `true` if a driver called `name` exists and has `capability`.
    pub fn supports(&self, name: &str, capability: DriverCapabilities) -> bool {
        self.find(name).is_ok_and(|d| d.supports(capability))
    }

    /// Deletes the resource at `path`, including sidecar files, through the
    /// named driver.
    pub fn remove_data_source<P: AsRef<Path>>(&self, path: P, driver: &str) -> Result<()> {
        let descriptor = self.find(driver)?;
        descriptor.require(DriverCapabilities::CREATE_DATASOURCE, "remove_data_source")?;
        let c_driver = descriptor.c_driver()?;
        let c_path = _path_to_c_string(path.as_ref())?;
        let captured =
            with_error_capture(|| unsafe { gdal_sys::GDALDeleteDataset(c_driver, c_path.as_ptr()) });
        log_warnings("GDALDeleteDataset", &captured.diagnostics);
        captured.diagnostics.check("GDALDeleteDataset")?;
        if captured.value != gdal_sys::CPLErr::CE_None {
            return Err(OgrioError::DataSourceOpenError {
                path: path.as_ref().to_string_lossy().into_owned(),
                native: captured.diagnostics.last_error().cloned(),
            });
        }
        Ok(())
    }
}
