use std::path::PathBuf;

use crate::archive;
use crate::dataset::FeatureCollection;
use crate::domain::Job;
use crate::error::GeodataError;
use crate::store::Store;
use crate::tiles::TilingClient;

/// Write the shapefile bundle directory and its zip archive. Always
/// regenerates. Returns the zip path, which is the publishable artifact.
pub fn export_shapefile(
    store: &Store,
    job: &Job,
    collection: &FeatureCollection,
) -> Result<PathBuf, GeodataError> {
    let bundle_dir = store.shapefile_dir(job);
    Store::ensure_dir(&bundle_dir)?;
    collection.write_shapefile(store.shapefile_path(job).as_std_path())?;

    let zip_path = store.shapefile_zip_path(job);
    archive::zip_directory(bundle_dir.as_std_path(), zip_path.as_std_path())?;
    Ok(zip_path.into_std_path_buf())
}

/// Write the collection as GeoJSON in WGS84. Skips the write when the file
/// already exists, unless `overwrite` is set.
pub fn export_geojson(
    store: &Store,
    job: &Job,
    collection: &FeatureCollection,
    overwrite: bool,
) -> Result<PathBuf, GeodataError> {
    let path = store.geojson_path(job);
    if path.as_std_path().is_file() && !overwrite {
        return Ok(path.into_std_path_buf());
    }

    let mut reprojected = collection.clone();
    reprojected.reproject_to_wgs84()?;
    reprojected.write_geojson(path.as_std_path())?;
    Ok(path.into_std_path_buf())
}

/// Produce the tiled-vector artifact from an already-exported GeoJSON file.
pub fn export_pmtiles(
    store: &Store,
    job: &Job,
    geojson_path: &std::path::Path,
    tiler: &dyn TilingClient,
) -> Result<PathBuf, GeodataError> {
    let path = store.pmtiles_path(job);
    Store::ensure_dir(&store.processed_dir(job))?;
    tiler.generate_tiles(geojson_path, path.as_std_path(), &job.name_string())?;
    Ok(path.into_std_path_buf())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use geo_types::{Geometry, MultiPolygon, polygon};
    use indexmap::IndexMap;

    use crate::dataset::{AttrValue, Crs, Feature};

    use super::*;

    fn sample_collection() -> FeatureCollection {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ];
        let mut attributes = IndexMap::new();
        attributes.insert("GEOID".to_string(), AttrValue::Text("17019".to_string()));
        FeatureCollection {
            features: vec![Feature {
                attributes,
                geometry: Geometry::MultiPolygon(MultiPolygon(vec![square])),
            }],
            crs: Crs::NAD83,
            schema: vec!["GEOID".to_string()],
        }
    }

    #[test]
    fn geojson_export_is_idempotent_without_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(temp.path(), None).unwrap();
        let job = Job::new("2020", "county", "500k");
        let collection = sample_collection();

        let path = export_geojson(&store, &job, &collection, true).unwrap();
        fs::write(&path, "sentinel").unwrap();

        let again = export_geojson(&store, &job, &collection, false).unwrap();
        assert_eq!(again, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "sentinel");

        export_geojson(&store, &job, &collection, true).unwrap();
        assert_ne!(fs::read_to_string(&path).unwrap(), "sentinel");
    }

    #[test]
    fn shapefile_export_produces_bundle_and_zip() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(temp.path(), None).unwrap();
        let job = Job::new("2020", "county", "500k");

        let zip_path = export_shapefile(&store, &job, &sample_collection()).unwrap();
        assert!(zip_path.is_file());
        assert!(store.shapefile_path(&job).as_std_path().is_file());
        assert!(
            store
                .shapefile_dir(&job)
                .as_std_path()
                .join("county-2020-500k.dbf")
                .is_file()
        );
    }
}
