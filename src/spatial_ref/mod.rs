//! Coordinate reference systems and reprojection.
//!
//! ```rust, no_run
//! use ogrio::spatial_ref::{CoordTransform, SpatialRef};
//! use ogrio::vector::{Coord, Geometry};
//!
//! let wgs84 = SpatialRef::from_epsg(4326).unwrap();
//! let mercator = SpatialRef::from_epsg(3857).unwrap();
//! let transform = CoordTransform::new(&wgs84, &mercator).unwrap();
//! let projected = transform.apply(&Geometry::Point(Some(Coord::xy(10.0, 50.0)))).unwrap();
//! println!("{projected:?}");
//! ```

mod srs;
mod transform;

pub use srs::SpatialRef;
pub use transform::{transform_geometry, CoordTransform, TransformCache};
