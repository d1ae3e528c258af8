//! Vector data access on top of [GDAL/OGR](http://gdal.org/).
//!
//! A data source is opened (or created) through a driver, its layers are
//! listed and opened, and features are read with a [`vector::Cursor`] or
//! written through a [`vector::Layer`]. Geometries cross the native boundary
//! as ISO WKB and surface as the owned [`vector::Geometry`] type.
//!
//! ## Use
//!
//! ```
//! use ogrio::vector::{DataSource, OpenOptions};
//!
//! let source = DataSource::open("fixtures/one_point.geojson", OpenOptions::default())?;
//! let layer = source.layer(0)?;
//! for feature in layer.features()? {
//!     let feature = feature?;
//!     println!("{:?} {:?}", feature.field("name")?, feature.geometry());
//! }
//! # Ok::<(), ogrio::errors::OgrioError>(())
//! ```
//!
//! Native warnings raised during an operation never abort it; they are
//! logged through the `log` crate and kept on the [`DataSource`] that
//! produced them.

#![crate_name = "ogrio"]
#![crate_type = "lib"]

pub mod capture;
pub mod config;
pub mod cpl;
pub mod driver;
pub mod errors;
pub mod spatial_ref;
pub mod utils;
pub mod vector;

#[cfg(test)]
pub(crate) mod test_utils;

pub use capture::{with_error_capture, Diagnostics};
pub use driver::{DriverCapabilities, DriverDescriptor, DriverRegistry};
pub use errors::{ErrorRecord, OgrioError, Result, Severity};
pub use spatial_ref::{CoordTransform, SpatialRef};
pub use vector::{DataSource, OpenMode, OpenOptions};

/// The version string of the GDAL library this crate is linked against,
/// e.g. `"3.8.4"`.
pub fn gdal_version() -> String {
    let key = b"RELEASE_NAME\0";
    let c_version = unsafe { gdal_sys::GDALVersionInfo(key.as_ptr() as *const _) };
    utils::_opt_string(c_version).unwrap_or_default()
}
