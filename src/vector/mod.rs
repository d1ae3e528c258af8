//! Vector data access
//!
//! ## Reading
//!
//! ```rust, no_run
//! use ogrio::vector::{CursorOptions, DataSource, Envelope, OpenOptions};
//! use ogrio::spatial_ref::SpatialRef;
//!
//! let source = DataSource::open("fixtures/points.geojson", OpenOptions::default())?;
//! let layer = source.layer("points")?;
//! let mercator = SpatialRef::from_epsg(3857)?;
//! let options = CursorOptions {
//!     bbox: Some(Envelope::new(0.0, 0.0, 10.0, 10.0)),
//!     attribute_filter: Some("kind = 'tree'"),
//!     target_crs: Some(&mercator),
//!     ..Default::default()
//! };
//! for feature in layer.cursor(options)? {
//!     let feature = feature?;
//!     println!("{:?}: {:?}", feature.field("name")?, feature.geometry());
//! }
//! # Ok::<(), ogrio::errors::OgrioError>(())
//! ```
//!
//! ## Writing
//!
//! ```rust, no_run
//! use ogrio::vector::{
//!     Coord, DataSource, Feature, FieldSchema, FieldType, Geometry, GeometryType, LayerOptions,
//! };
//!
//! let source = DataSource::create("/tmp/out.gpkg", "GPKG", &[])?;
//! let fields = [FieldSchema::new("name", FieldType::String)];
//! let layer = source.create_layer(LayerOptions {
//!     name: "places",
//!     geometry_type: GeometryType::Point,
//!     fields: &fields,
//!     ..Default::default()
//! })?;
//! let mut feature = Feature::new()
//!     .with_field("name", "home")
//!     .with_geometry(Geometry::Point(Some(Coord::xy(1.0, 2.0))));
//! let fid = layer.insert(&mut feature)?;
//! # Ok::<(), ogrio::errors::OgrioError>(())
//! ```

pub use cursor::Cursor;
pub use feature::{Feature, FieldValue};
pub use geometry::{Coord, Envelope, Geometry};
pub use layer::{Layer, LayerCapability};
pub use options::{CursorOptions, LayerOptions, LayerRef, OpenMode, OpenOptions};
pub use schema::{Dimensions, FieldSchema, FieldType, GeometryType, LayerSchema};
pub use source::DataSource;

mod cursor;
mod feature;
mod geometry;
mod layer;
mod options;
mod schema;
mod source;
pub mod wkb;

#[cfg(test)]
mod tests;
