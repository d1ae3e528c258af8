use std::fs;
use std::path::Path;

use ogrio::spatial_ref::SpatialRef;
use ogrio::vector::{
    DataSource, FieldSchema, FieldType, GeometryType, LayerOptions, OpenOptions,
};
use ogrio::OgrioError;

/// Copies the point fixture into a GeoPackage, keeping only the trees.
fn run() -> Result<(), OgrioError> {
    let input = DataSource::open("fixtures/points.geojson", OpenOptions::default())?;
    let points = input.layer("points")?;

    let output_path = Path::new("/tmp/trees.gpkg");
    let _ = fs::remove_file(output_path);
    let mut output = DataSource::create(output_path, "GPKG", &[])?;
    let wgs84 = SpatialRef::from_epsg(4326)?;
    let fields = [
        FieldSchema::new("name", FieldType::String).not_null(),
        FieldSchema::new("kind", FieldType::String),
        FieldSchema::new("value", FieldType::Real),
    ];
    let trees = output.create_layer(LayerOptions {
        name: "trees",
        geometry_type: GeometryType::Point,
        fields: &fields,
        srs: Some(&wgs84),
        ..Default::default()
    })?;

    let mut batch = points
        .cursor(ogrio::vector::CursorOptions {
            attribute_filter: Some("kind = 'tree'"),
            ..Default::default()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for feature in &mut batch {
        feature.set_fid(None);
    }
    let fids = trees.insert_many(&mut batch)?;
    println!("wrote {} trees: {fids:?}", fids.len());

    for warning in output.close()? {
        eprintln!("{warning}");
    }
    Ok(())
}

fn main() {
    run().unwrap();
}
