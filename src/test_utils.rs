use std::path::{Path, PathBuf};

use crate::vector::{
    Coord, DataSource, Feature, FieldSchema, FieldType, Geometry, GeometryType, Layer,
    LayerOptions,
};
use crate::spatial_ref::SpatialRef;

/// A struct that contains a temporary directory and a path to a file in that directory.
pub struct TempFixture {
    _temp_dir: tempfile::TempDir,
    temp_path: PathBuf,
}

impl TempFixture {
    /// Creates a copy of the test file in a temporary directory.
    /// Returns the struct `TempFixture` that contains the temp dir (for clean-up on `drop`) as well as the path to the file.
    pub fn fixture(name: &str) -> Self {
        let staging = Self::empty(name);
        std::fs::copy(fixture(name), &staging.temp_path).unwrap();
        staging
    }

    /// Creates a temporary directory and path to a non-existent file with given `name`.
    /// Useful for writing results to during testing
    pub fn empty(name: &str) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let temp_path = _temp_dir.path().join(name);
        Self {
            _temp_dir,
            temp_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

impl AsRef<Path> for TempFixture {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

/// Returns the fully qualified path to `filename` in `${CARGO_MANIFEST_DIR}/fixtures`.
pub fn fixture(filename: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(filename)
}

/// The fields of [`places_layer`].
pub fn places_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::new("name", FieldType::String),
        FieldSchema::new("rank", FieldType::Integer64),
    ]
}

/// Creates a GeoPackage holding an empty point layer called `places` in
/// EPSG:4326.
pub fn places_layer(fixture: &TempFixture) -> (DataSource, Layer) {
    let source = DataSource::create(fixture.path(), "GPKG", &[]).unwrap();
    let wgs84 = SpatialRef::from_epsg(4326).unwrap();
    let fields = places_fields();
    let layer = source
        .create_layer(LayerOptions {
            name: "places",
            geometry_type: GeometryType::Point,
            fields: &fields,
            srs: Some(&wgs84),
            ..Default::default()
        })
        .unwrap();
    (source, layer)
}

pub fn place(name: &str, rank: i64, x: f64, y: f64) -> Feature {
    Feature::new()
        .with_field("name", name)
        .with_field("rank", rank)
        .with_geometry(Geometry::Point(Some(Coord::xy(x, y))))
}

/// Assert numerical difference between two expressions is less than
/// 64-bit machine epsilon or a specified epsilon.
///
/// # Examples:
/// ```rust, ignore
/// use std::f64::consts::{PI, E};
/// assert_near!(PI / E, 1.1557273497909217);
/// // with specified epsilon
/// assert_near!(PI / E, 1.15572734, epsilon = 1e-8);
/// ```
#[macro_export]
macro_rules! assert_near {
    ($left:expr, $right:expr) => {
        assert_near!($left, $right, epsilon = f64::EPSILON)
    };
    ($left:expr, $right:expr, epsilon = $ep:expr) => {
        assert!(
            ($left - $right).abs() < $ep,
            "|{} - {}| = {} is greater than epsilon {:.4e}",
            $left,
            $right,
            ($left - $right).abs(),
            $ep
        )
    };
}
