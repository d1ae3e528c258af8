use ogrio::{DriverCapabilities, DriverRegistry, OgrioError};

#[test]
fn test_registry_lists_vector_drivers() {
    let registry = DriverRegistry::global();
    assert!(!registry.is_empty());
    assert_eq!(registry.len(), registry.list().len());

    let geojson = registry.find("GeoJSON").unwrap();
    assert_eq!(geojson.name(), "GeoJSON");
    assert!(geojson.supports(DriverCapabilities::READ));
    assert!(geojson.extensions().iter().any(|ext| ext == "geojson"));

    let gpkg = registry.find("GPKG").unwrap();
    assert!(gpkg.supports(DriverCapabilities::READ | DriverCapabilities::CREATE_LAYER));
    assert!(registry.supports("GPKG", DriverCapabilities::DELETE_LAYER));
}

#[test]
fn test_raster_only_drivers_are_not_listed() {
    let registry = DriverRegistry::global();
    assert!(matches!(
        registry.find("GTiff").unwrap_err(),
        OgrioError::DriverNotFound { .. }
    ));
    assert!(!registry.supports("NoSuchDriver", DriverCapabilities::READ));
}

#[test]
fn test_remove_data_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.gpkg");
    let mut source = ogrio::DataSource::create(&path, "GPKG", &[]).unwrap();
    source.close().unwrap();
    assert!(path.exists());

    DriverRegistry::global()
        .remove_data_source(&path, "GPKG")
        .unwrap();
    assert!(!path.exists());
}
