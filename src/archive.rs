use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::error::GeodataError;

/// Unpack one downloaded archive into its containing directory and derive
/// the geometry file(s) it is expected to hold by extension substitution.
///
/// The derived `.shp` path is not verified here; if the archive did not
/// actually contain it, the merger surfaces the read failure.
pub fn expand_archive(archive_path: &Path) -> Result<Vec<PathBuf>, GeodataError> {
    let target_dir = archive_path
        .parent()
        .ok_or_else(|| GeodataError::Filesystem("archive has no parent directory".to_string()))?;
    extract_zip(archive_path, target_dir)?;
    Ok(vec![archive_path.with_extension("shp")])
}

fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), GeodataError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| GeodataError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|_| GeodataError::ArchiveCorrupt(zip_path.to_path_buf()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|_| GeodataError::ArchiveCorrupt(zip_path.to_path_buf()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(GeodataError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Zip every file directly inside a directory (the shapefile bundle layout
/// is flat) into `dest`, overwriting any previous archive.
pub fn zip_directory(dir: &Path, dest: &Path) -> Result<(), GeodataError> {
    let file =
        fs::File::create(dest).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|err| GeodataError::Filesystem(err.to_string()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| GeodataError::Filesystem("non-utf8 file name".to_string()))?;
        writer
            .start_file(name, options)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        let mut source =
            fs::File::open(&path).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        io::copy(&mut source, &mut writer)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    }

    writer
        .finish()
        .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn expand_derives_shp_path() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("cb_2020_us_county_500k.zip");

        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("cb_2020_us_county_500k.dbf", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"stub").unwrap();
        writer.finish().unwrap();

        let derived = expand_archive(&zip_path).unwrap();
        assert_eq!(derived, vec![zip_path.with_extension("shp")]);
        assert!(temp.path().join("cb_2020_us_county_500k.dbf").is_file());
    }

    #[test]
    fn corrupt_archive_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("broken.zip");
        fs::write(&zip_path, b"not a zip at all").unwrap();

        let err = expand_archive(&zip_path).unwrap_err();
        assert_matches!(err, GeodataError::ArchiveCorrupt(_));
    }

    #[test]
    fn zip_directory_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let bundle = temp.path().join("bundle");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("a.shp"), b"shp").unwrap();
        fs::write(bundle.join("a.dbf"), b"dbf").unwrap();

        let dest = temp.path().join("bundle.zip");
        zip_directory(&bundle, &dest).unwrap();

        let archive = ZipArchive::new(fs::File::open(&dest).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["a.dbf", "a.shp"]);
    }
}
