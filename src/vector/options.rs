use crate::spatial_ref::SpatialRef;
use crate::vector::geometry::Envelope;
use crate::vector::schema::{Dimensions, FieldSchema, GeometryType};

/// Access mode of a [`DataSource`](crate::vector::DataSource).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenMode {
    #[default]
    Read,
    Update,
}

/// Parameters for [`DataSource::open`](crate::vector::DataSource::open).
#[derive(Debug, Clone, Default)]
pub struct OpenOptions<'a> {
    pub mode: OpenMode,
    /// Only try this driver. Without a hint GDAL tries every registered
    /// driver in registration order.
    pub driver: Option<&'a str>,
    /// Driver-specific open options, in the form `name=value`.
    pub open_options: Option<&'a [&'a str]>,
}

impl<'a> OpenOptions<'a> {
    pub fn update() -> Self {
        OpenOptions {
            mode: OpenMode::Update,
            ..Default::default()
        }
    }

    pub fn with_driver(mut self, driver: &'a str) -> Self {
        self.driver = Some(driver);
        self
    }
}

/// Selects a layer by name or by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRef<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for LayerRef<'a> {
    fn from(name: &'a str) -> Self {
        LayerRef::Name(name)
    }
}

impl<'a> From<&'a String> for LayerRef<'a> {
    fn from(name: &'a String) -> Self {
        LayerRef::Name(name)
    }
}

impl From<usize> for LayerRef<'_> {
    fn from(index: usize) -> Self {
        LayerRef::Index(index)
    }
}

/// Parameters for [`DataSource::create_layer`](crate::vector::DataSource::create_layer).
#[derive(Clone, Debug)]
pub struct LayerOptions<'a> {
    /// The name of the newly created layer. May be an empty string.
    pub name: &'a str,
    pub geometry_type: GeometryType,
    pub dimensions: Dimensions,
    pub fields: &'a [FieldSchema],
    /// The SRS of the newly created layer, or `None` for no SRS.
    pub srs: Option<&'a SpatialRef>,
    /// Additional driver-specific options to pass to GDAL, in the form `name=value`.
    pub options: Option<&'a [&'a str]>,
}

impl Default for LayerOptions<'_> {
    /// A layer with no name, no fields, no SRS and unknown geometry type.
    fn default() -> Self {
        LayerOptions {
            name: "",
            geometry_type: GeometryType::Unknown,
            dimensions: Dimensions::Xy,
            fields: &[],
            srs: None,
            options: None,
        }
    }
}

/// Parameters for [`Layer::cursor`](crate::vector::Layer::cursor).
///
/// The default reads every feature with all fields and geometries, in the
/// layer CRS.
#[derive(Clone, Debug, Default)]
pub struct CursorOptions<'a> {
    /// Only yield features whose geometry envelope intersects this box,
    /// given in the layer CRS. Features without geometry are skipped.
    pub bbox: Option<Envelope>,
    /// An OGR SQL `WHERE` clause, e.g. `"population > 1000"`.
    pub attribute_filter: Option<&'a str>,
    /// Reproject geometries to this CRS.
    pub target_crs: Option<&'a SpatialRef>,
    /// Fields left out of the yielded features.
    pub ignore_fields: &'a [&'a str],
    /// Yield features without geometry.
    pub ignore_geometry: bool,
    /// Number of matching features to skip.
    pub offset: usize,
    /// Maximum number of features to yield.
    pub limit: Option<usize>,
}
