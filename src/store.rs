use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::Job;
use crate::error::GeodataError;

/// Filesystem layout for the content cache and export output. Raw downloads
/// are never deleted by the pipeline; cleanup is manual.
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
    destination: Option<Utf8PathBuf>,
}

impl Store {
    pub fn new(cache_root: &Path, destination: Option<&Path>) -> Result<Self, GeodataError> {
        let cache_root = to_utf8(cache_root)?;
        let destination = destination.map(to_utf8).transpose()?;
        Ok(Self {
            cache_root,
            destination,
        })
    }

    /// Where raw archives for one job are cached.
    pub fn raw_dir(&self, job: &Job) -> Utf8PathBuf {
        self.cache_root
            .join(job.geography())
            .join("raw")
            .join(job.year())
            .join(job.scale())
    }

    /// Where exported artifacts for one job land. Defaults to
    /// `{cache}/{geography}/processed` unless a destination override is set.
    pub fn processed_dir(&self, job: &Job) -> Utf8PathBuf {
        match &self.destination {
            Some(dir) => dir.clone(),
            None => self.cache_root.join(job.geography()).join("processed"),
        }
    }

    pub fn shapefile_dir(&self, job: &Job) -> Utf8PathBuf {
        self.processed_dir(job)
            .join(format!("{}-shp", job.name_string()))
    }

    pub fn shapefile_path(&self, job: &Job) -> Utf8PathBuf {
        self.shapefile_dir(job)
            .join(format!("{}.shp", job.name_string()))
    }

    pub fn shapefile_zip_path(&self, job: &Job) -> Utf8PathBuf {
        self.processed_dir(job)
            .join(format!("{}-shp.zip", job.name_string()))
    }

    pub fn geojson_path(&self, job: &Job) -> Utf8PathBuf {
        self.processed_dir(job)
            .join(format!("{}.geojson", job.name_string()))
    }

    pub fn pmtiles_path(&self, job: &Job) -> Utf8PathBuf {
        self.processed_dir(job)
            .join(format!("{}.pmtiles", job.name_string()))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), GeodataError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| GeodataError::Filesystem(err.to_string()))
    }
}

fn to_utf8(path: &Path) -> Result<Utf8PathBuf, GeodataError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| GeodataError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Path::new(".cache"), None).unwrap();
        let job = Job::new("2020", "county", "500k");

        assert_eq!(store.raw_dir(&job), ".cache/county/raw/2020/500k");
        assert_eq!(
            store.geojson_path(&job),
            ".cache/county/processed/county-2020-500k.geojson"
        );
        assert_eq!(
            store.shapefile_path(&job),
            ".cache/county/processed/county-2020-500k-shp/county-2020-500k.shp"
        );
        assert_eq!(
            store.shapefile_zip_path(&job),
            ".cache/county/processed/county-2020-500k-shp.zip"
        );
    }

    #[test]
    fn destination_override() {
        let store = Store::new(Path::new(".cache"), Some(Path::new("/tmp/out"))).unwrap();
        let job = Job::new("2020", "county", "500k");
        assert_eq!(store.pmtiles_path(&job), "/tmp/out/county-2020-500k.pmtiles");
    }
}
