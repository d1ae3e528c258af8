use std::env;

use ogrio::spatial_ref::SpatialRef;
use ogrio::vector::{CursorOptions, DataSource, Envelope, OpenOptions};
use ogrio::OgrioError;

fn run() -> Result<(), OgrioError> {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "fixtures/points.geojson".to_string());
    let source = DataSource::open(&path, OpenOptions::default())?;
    println!("{path} ({})", source.driver().long_name());

    for name in source.list_layers()? {
        let layer = source.layer(name.as_str())?;
        println!(
            "layer '{name}': {} features, {}, extent {:?}",
            layer.feature_count()?,
            layer.geometry_type(),
            layer.envelope()?
        );
        for field in &layer.schema().fields {
            println!("  {}: {:?}", field.name, field.field_type);
        }
    }

    // Web Mercator coordinates of everything in the first ten degrees.
    let layer = source.layer(0)?;
    let mercator = SpatialRef::from_epsg(3857)?;
    let options = CursorOptions {
        bbox: Some(Envelope::new(0.0, 0.0, 10.0, 10.0)),
        target_crs: Some(&mercator),
        limit: Some(20),
        ..Default::default()
    };
    for feature in layer.cursor(options)? {
        let feature = feature?;
        println!("#{:?} {:?}", feature.fid(), feature.geometry());
    }

    for warning in source.take_warnings() {
        eprintln!("{warning}");
    }
    Ok(())
}

fn main() {
    run().unwrap();
}
