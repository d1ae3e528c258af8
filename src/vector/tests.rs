use super::*;
use crate::assert_near;
use crate::errors::OgrioError;
use crate::spatial_ref::SpatialRef;
use crate::test_utils::{fixture, place, places_fields, places_layer, TempFixture};

fn open_points() -> DataSource {
    DataSource::open(fixture("points.geojson"), OpenOptions::default()).unwrap()
}

fn names(cursor: Cursor) -> Vec<String> {
    cursor
        .map(|feature| {
            feature
                .unwrap()
                .field("name")
                .unwrap()
                .cloned()
                .and_then(FieldValue::into_string)
                .unwrap()
        })
        .collect()
}

#[test]
fn test_open_and_list_layers() {
    let source = DataSource::open(fixture("one_point.geojson"), OpenOptions::default()).unwrap();
    assert_eq!(source.driver().name(), "GeoJSON");
    assert_eq!(source.mode(), OpenMode::Read);
    assert_eq!(source.layer_count().unwrap(), 1);
    assert_eq!(source.list_layers().unwrap(), vec!["one_point".to_string()]);
}

#[test]
fn test_open_missing_file() {
    let err = DataSource::open(fixture("nope.geojson"), OpenOptions::default()).unwrap_err();
    assert!(matches!(err, OgrioError::DataSourceOpenError { .. }));
}

#[test]
fn test_open_with_unknown_driver() {
    let options = OpenOptions::default().with_driver("NoSuchDriver");
    let err = DataSource::open(fixture("points.geojson"), options).unwrap_err();
    assert!(matches!(err, OgrioError::DriverNotFound { .. }));
}

#[test]
fn test_layer_lookup() {
    let source = open_points();
    assert_eq!(source.layer("points").unwrap().name(), "points");
    assert_eq!(source.layer(0).unwrap().name(), "points");
    assert!(matches!(
        source.layer(1).unwrap_err(),
        OgrioError::LayerNotFound { .. }
    ));
    assert!(matches!(
        source.layer("roads").unwrap_err(),
        OgrioError::LayerNotFound { .. }
    ));
}

#[test]
fn test_schema() {
    let source = open_points();
    let layer = source.layer("points").unwrap();
    let schema = layer.schema();
    assert_eq!(schema.field_names().collect::<Vec<_>>(), ["name", "kind", "value"]);
    assert_eq!(schema.field("value").unwrap().field_type, FieldType::Real);
    assert_eq!(layer.geometry_type(), GeometryType::Point);
    assert!(schema.srs.as_ref().is_some_and(SpatialRef::is_geographic));
}

#[test]
fn test_read_everything() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let features: Vec<Feature> = layer.features().unwrap().map(Result::unwrap).collect();
    assert_eq!(features.len(), 6);

    let oak = &features[0];
    assert_eq!(oak.field("kind").unwrap(), Some(&FieldValue::String("tree".into())));
    assert_eq!(oak.field("value").unwrap(), Some(&FieldValue::Real(1.5)));
    assert_eq!(oak.geometry(), Some(&Geometry::Point(Some(Coord::xy(1.0, 1.0)))));

    assert_eq!(features[3].field("value").unwrap(), None);
    assert_eq!(features[5].geometry(), None);
    assert!(matches!(
        oak.field("height").unwrap_err(),
        OgrioError::InvalidFieldName { .. }
    ));
}

#[test]
fn test_exhausted_cursor_stays_exhausted() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mut cursor = layer.features().unwrap();
    assert_eq!(cursor.by_ref().count(), 6);
    assert!(cursor.next().is_none());
    assert!(cursor.next().is_none());
}

#[test]
fn test_attribute_filter() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let cursor = layer
        .cursor(CursorOptions {
            attribute_filter: Some("kind = 'tree'"),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(cursor), ["oak", "pine", "beech", "nowhere"]);
}

#[test]
fn test_bad_attribute_filter() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let err = layer
        .cursor(CursorOptions {
            attribute_filter: Some("kind = = 'tree'"),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, OgrioError::BadArgument(_)));
}

#[test]
fn test_bbox_filter() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let bbox = Envelope::new(0.0, 0.0, 10.0, 10.0);
    let cursor = layer
        .cursor(CursorOptions {
            bbox: Some(bbox),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(cursor), ["oak", "well", "pine"]);

    let cursor = layer
        .cursor(CursorOptions {
            bbox: Some(bbox),
            attribute_filter: Some("kind = 'tree'"),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(cursor), ["oak", "pine"]);
}

#[test]
fn test_bbox_touching_edge_matches() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let cursor = layer
        .cursor(CursorOptions {
            bbox: Some(Envelope::new(5.0, 5.0, 6.0, 6.0)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(cursor), ["pine"]);
}

#[test]
fn test_offset_and_limit() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let cursor = layer
        .cursor(CursorOptions {
            offset: 1,
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(cursor), ["well", "pine"]);

    let cursor = layer
        .cursor(CursorOptions {
            limit: Some(0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(cursor.count(), 0);

    let cursor = layer
        .cursor(CursorOptions {
            offset: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(cursor.count(), 0);
}

#[test]
fn test_offset_applies_after_filters() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let cursor = layer
        .cursor(CursorOptions {
            attribute_filter: Some("kind = 'water'"),
            offset: 1,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(cursor), ["pond"]);
}

#[test]
fn test_ignore_fields_and_geometry() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mut cursor = layer
        .cursor(CursorOptions {
            ignore_fields: &["value", "kind"],
            ignore_geometry: true,
            ..Default::default()
        })
        .unwrap();
    let feature = cursor.next().unwrap().unwrap();
    assert_eq!(feature.field_names().collect::<Vec<_>>(), ["name"]);
    assert!(feature.geometry().is_none());

    let err = layer
        .cursor(CursorOptions {
            ignore_fields: &["height"],
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, OgrioError::InvalidFieldName { .. }));
}

#[test]
fn test_ignored_geometry_with_bbox() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let features: Vec<Feature> = layer
        .cursor(CursorOptions {
            bbox: Some(Envelope::new(0.0, 0.0, 10.0, 10.0)),
            ignore_geometry: true,
            ..Default::default()
        })
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(features.len(), 3);
    assert!(features.iter().all(|f| f.geometry().is_none()));
}

#[test]
fn test_reprojected_cursor() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mercator = SpatialRef::from_epsg(3857).unwrap();
    let mut cursor = layer
        .cursor(CursorOptions {
            target_crs: Some(&mercator),
            limit: Some(1),
            ..Default::default()
        })
        .unwrap();
    let feature = cursor.next().unwrap().unwrap();
    let Some(Geometry::Point(Some(coord))) = feature.geometry() else {
        panic!("expected a point, got {:?}", feature.geometry());
    };
    assert_near!(coord.x, 111319.49079327357, epsilon = 1e-3);
    assert_near!(coord.y, 111325.14286638486, epsilon = 1e-3);
    assert!(cursor.next().is_none());
}

#[test]
fn test_new_cursor_supersedes_old_one() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mut first = layer.features().unwrap();
    assert!(first.next().unwrap().is_ok());

    let mut second = layer.features().unwrap();
    assert!(matches!(
        first.next(),
        Some(Err(OgrioError::UnsupportedOperation { .. }))
    ));
    assert!(matches!(
        first.next(),
        Some(Err(OgrioError::UnsupportedOperation { .. }))
    ));
    assert!(second.next().unwrap().is_ok());

    layer.feature_count().unwrap();
    assert!(matches!(
        second.next(),
        Some(Err(OgrioError::UnsupportedOperation { .. }))
    ));
}

#[test]
fn test_failed_cursor_supersedes_old_one() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mut first = layer.features().unwrap();
    assert!(first.next().unwrap().is_ok());

    let err = layer
        .cursor(CursorOptions {
            bbox: Some(Envelope::new(4.0, 4.0, 6.0, 6.0)),
            attribute_filter: Some("kind = = 'x'"),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, OgrioError::BadArgument(_)));
    assert!(matches!(
        first.next(),
        Some(Err(OgrioError::UnsupportedOperation { .. }))
    ));

    // The rejected box does not linger on the layer.
    assert_eq!(layer.features().unwrap().count(), 6);
}

#[test]
fn test_exhausted_cursor_ignores_later_reads() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mut cursor = layer
        .cursor(CursorOptions {
            limit: Some(1),
            ..Default::default()
        })
        .unwrap();
    assert!(cursor.next().unwrap().is_ok());
    assert!(cursor.next().is_none());

    layer.feature_count().unwrap();
    let _newer = layer.features().unwrap();
    assert!(cursor.next().is_none());

    let mut drained = layer.features().unwrap();
    assert_eq!(drained.by_ref().count(), 6);
    layer.feature_count().unwrap();
    assert!(drained.next().is_none());
}

#[test]
fn test_closed_source() {
    let mut source = open_points();
    let layer = source.layer(0).unwrap();
    let mut cursor = layer.features().unwrap();
    assert!(cursor.next().unwrap().is_ok());

    source.close().unwrap();
    assert!(source.is_closed());
    assert!(source.close().unwrap().is_empty());

    for _ in 0..2 {
        assert!(matches!(
            cursor.next(),
            Some(Err(OgrioError::UnsupportedOperation { .. }))
        ));
    }
    assert!(matches!(
        layer.features().unwrap_err(),
        OgrioError::UnsupportedOperation { .. }
    ));
    assert!(layer.feature_count().is_err());
    assert!(source.list_layers().is_err());
    assert_eq!(layer.schema().field_names().count(), 3);
}

#[test]
fn test_count_envelope_and_get() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    assert_eq!(layer.feature_count().unwrap(), 6);

    let envelope = layer.envelope().unwrap().unwrap();
    assert_eq!(
        (envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y),
        (-3.0, 1.0, 20.0, 20.0)
    );

    let pine = layer
        .features()
        .unwrap()
        .map(Result::unwrap)
        .find(|f| f.field("name").unwrap() == Some(&FieldValue::String("pine".into())))
        .unwrap();
    let fetched = layer.get(pine.fid().unwrap()).unwrap();
    assert_eq!(fetched, pine);

    assert!(matches!(
        layer.get(999).unwrap_err(),
        OgrioError::FeatureNotFound { fid: 999, .. }
    ));
}

#[test]
fn test_read_only_source_refuses_writes() {
    let source = open_points();
    let layer = source.layer(0).unwrap();
    let mut feature = Feature::new()
        .with_field("name", "elm")
        .with_field("kind", "tree")
        .with_field("value", 1.0);
    assert!(matches!(
        layer.insert(&mut feature).unwrap_err(),
        OgrioError::UnsupportedOperation { .. }
    ));
    assert!(matches!(
        layer.delete(0).unwrap_err(),
        OgrioError::UnsupportedOperation { .. }
    ));
    assert!(matches!(
        source
            .create_layer(LayerOptions {
                name: "more",
                ..Default::default()
            })
            .unwrap_err(),
        OgrioError::UnsupportedOperation { .. }
    ));
}

#[test]
fn test_shapes_geometry_types() {
    let source = DataSource::open(fixture("shapes.geojson"), OpenOptions::default()).unwrap();
    let layer = source.layer("shapes").unwrap();
    let types: Vec<GeometryType> = layer
        .features()
        .unwrap()
        .map(|f| f.unwrap().geometry().unwrap().geometry_type())
        .collect();
    assert_eq!(
        types,
        [
            GeometryType::LineString,
            GeometryType::Polygon,
            GeometryType::MultiPolygon
        ]
    );
}

#[test]
fn test_create_insert_and_read_back() {
    let fixture = TempFixture::empty("places.gpkg");
    let (source, layer) = places_layer(&fixture);
    assert_eq!(source.mode(), OpenMode::Update);
    assert_eq!(layer.schema().fields, places_fields());

    let mut home = place("home", 1, 1.0, 2.0);
    let fid = layer.insert(&mut home).unwrap();
    assert!(fid.is_some());
    assert_eq!(home.fid(), fid);

    let mut work = place("work", 2, 3.0, 4.0);
    layer.insert(&mut work).unwrap();
    assert_eq!(layer.feature_count().unwrap(), 2);

    let read: Vec<Feature> = layer.features().unwrap().map(Result::unwrap).collect();
    assert_eq!(read, vec![home.clone(), work]);
    assert_eq!(layer.get(fid.unwrap()).unwrap(), home);
}

#[test]
fn test_insert_rejects_mismatched_features() {
    let fixture = TempFixture::empty("places.gpkg");
    let (_source, layer) = places_layer(&fixture);

    let mut missing = Feature::new().with_field("name", "x");
    let mut unknown = place("x", 1, 0.0, 0.0).with_field("height", 3);
    let mut wrong_type = Feature::new()
        .with_field("name", "x")
        .with_field("rank", "first");
    let mut wrong_geometry = place("x", 1, 0.0, 0.0)
        .with_geometry(Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]));

    for feature in [&mut missing, &mut unknown, &mut wrong_type, &mut wrong_geometry] {
        assert!(matches!(
            layer.insert(feature).unwrap_err(),
            OgrioError::SchemaMismatch { .. }
        ));
    }
    assert_eq!(layer.feature_count().unwrap(), 0);
}

#[test]
fn test_update_and_delete() {
    let fixture = TempFixture::empty("places.gpkg");
    let (_source, layer) = places_layer(&fixture);
    let mut home = place("home", 1, 1.0, 2.0);
    let fid = layer.insert(&mut home).unwrap().unwrap();

    let moved = place("home", 5, 7.0, 8.0).with_fid(fid);
    layer.update(&moved).unwrap();
    assert_eq!(layer.get(fid).unwrap(), moved);

    assert!(matches!(
        layer.update(&place("ghost", 0, 0.0, 0.0)).unwrap_err(),
        OgrioError::BadArgument(_)
    ));
    assert!(matches!(
        layer.update(&place("ghost", 0, 0.0, 0.0).with_fid(fid + 100)).unwrap_err(),
        OgrioError::FeatureNotFound { .. }
    ));

    layer.delete(fid).unwrap();
    assert_eq!(layer.feature_count().unwrap(), 0);
    assert!(matches!(
        layer.delete(fid).unwrap_err(),
        OgrioError::FeatureNotFound { .. }
    ));
}

#[test]
fn test_envelope_follows_writes() {
    let fixture = TempFixture::empty("places.gpkg");
    let (_source, layer) = places_layer(&fixture);
    assert_eq!(layer.envelope().unwrap(), None);

    layer.insert(&mut place("a", 1, 1.0, 2.0)).unwrap();
    layer.insert(&mut place("b", 2, -4.0, 6.0)).unwrap();
    let envelope = layer.envelope().unwrap().unwrap();
    assert_eq!(
        (envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y),
        (-4.0, 2.0, 1.0, 6.0)
    );

    layer.insert(&mut place("c", 3, 10.0, 0.0)).unwrap();
    let envelope = layer.envelope().unwrap().unwrap();
    assert_eq!(envelope.max_x, 10.0);
    assert_eq!(envelope.min_y, 0.0);
}

#[test]
fn test_insert_many_rolls_back() {
    let fixture = TempFixture::empty("places.gpkg");
    let (_source, layer) = places_layer(&fixture);

    let mut batch = vec![place("a", 1, 0.0, 0.0), place("b", 2, 1.0, 1.0)];
    let fids = layer.insert_many(&mut batch).unwrap();
    assert_eq!(fids.len(), 2);
    assert!(batch.iter().all(|f| f.fid().is_some()));

    let mut broken = vec![
        place("c", 3, 2.0, 2.0),
        Feature::new().with_field("name", "no rank"),
    ];
    assert!(layer.insert_many(&mut broken).is_err());
    assert!(broken.iter().all(|f| f.fid().is_none()));
    assert_eq!(layer.feature_count().unwrap(), 2);
}

#[test]
fn test_null_and_typed_values() {
    let fixture = TempFixture::empty("typed.gpkg");
    let source = DataSource::create(fixture.path(), "GPKG", &[]).unwrap();
    let fields = [
        FieldSchema::new("flag", FieldType::Boolean),
        FieldSchema::new("day", FieldType::Date),
        FieldSchema::new("note", FieldType::String),
    ];
    let layer = source
        .create_layer(LayerOptions {
            name: "typed",
            geometry_type: GeometryType::None,
            fields: &fields,
            ..Default::default()
        })
        .unwrap();
    let day = chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    let mut feature = Feature::new()
        .with_field("flag", true)
        .with_field("day", day)
        .with_null("note");
    let fid = layer.insert(&mut feature).unwrap().unwrap();

    let read = layer.get(fid).unwrap();
    assert_eq!(read.field("flag").unwrap(), Some(&FieldValue::Boolean(true)));
    assert_eq!(read.field("day").unwrap(), Some(&FieldValue::Date(day)));
    assert_eq!(read.field("note").unwrap(), None);
    assert_eq!(read.geometry(), None);
}

#[test]
fn test_delete_layer_invalidates_handles() {
    let fixture = TempFixture::empty("places.gpkg");
    let (source, layer) = places_layer(&fixture);
    layer.insert(&mut place("a", 1, 0.0, 0.0)).unwrap();
    let mut cursor = layer.features().unwrap();

    source.delete_layer("places").unwrap();
    assert!(source.list_layers().unwrap().is_empty());
    assert!(matches!(
        cursor.next(),
        Some(Err(OgrioError::UnsupportedOperation { .. }))
    ));
    assert!(matches!(
        layer.feature_count().unwrap_err(),
        OgrioError::UnsupportedOperation { .. }
    ));
    assert!(matches!(
        source.delete_layer("places").unwrap_err(),
        OgrioError::LayerNotFound { .. }
    ));
}

#[test]
fn test_create_layer_removes_layer_on_field_error() {
    let fixture = TempFixture::empty("fields.gpkg");
    let source = DataSource::create(fixture.path(), "GPKG", &[]).unwrap();
    let duplicated = [
        FieldSchema::new("name", FieldType::String),
        FieldSchema::new("name", FieldType::String),
    ];
    assert!(source
        .create_layer(LayerOptions {
            name: "places",
            geometry_type: GeometryType::Point,
            fields: &duplicated,
            ..Default::default()
        })
        .is_err());
    assert!(source.list_layers().unwrap().is_empty());

    let fields = places_fields();
    let layer = source
        .create_layer(LayerOptions {
            name: "places",
            geometry_type: GeometryType::Point,
            fields: &fields,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(layer.schema().fields, places_fields());
}

#[test]
fn test_reopen_for_update() {
    let fixture = TempFixture::empty("places.gpkg");
    {
        let (mut source, layer) = places_layer(&fixture);
        layer.insert(&mut place("a", 1, 0.0, 0.0)).unwrap();
        source.close().unwrap();
    }
    let source = DataSource::open(fixture.path(), OpenOptions::update()).unwrap();
    let layer = source.layer("places").unwrap();
    layer.insert(&mut place("b", 2, 1.0, 1.0)).unwrap();
    assert_eq!(layer.feature_count().unwrap(), 2);
    assert_eq!(
        DataSource::list_layers_at(fixture.path()).unwrap(),
        vec!["places".to_string()]
    );
}
