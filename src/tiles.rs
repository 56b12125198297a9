use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GeodataError;

/// Source bookkeeping fields stripped from the tile output; consumers of the
/// tiles only need the derived HEROP_ID/BBOX/LABEL attributes.
const EXCLUDED_FIELDS: &[&str] = &[
    "STATEFP", "COUNTYFP", "COUNTYNS", "TRACTCE", "BLKGRPCE", "STATENS", "STATE", "AFFGEOID",
    "CENSUSAREA", "GEOID", "GEO_ID", "STUSPS", "NAME", "LSAD", "ALAND", "AWATER", "minx", "miny",
    "maxx", "maxy",
];

pub trait TilingClient: Send + Sync {
    /// Turn one GeoJSON file into a single tiled-vector (PMTiles) file.
    fn generate_tiles(
        &self,
        geojson_path: &Path,
        output_path: &Path,
        layer_name: &str,
    ) -> Result<(), GeodataError>;
}

pub struct TippecanoeClient {
    binary: PathBuf,
}

impl TippecanoeClient {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    fn build_args(geojson_path: &Path, output_path: &Path, layer_name: &str) -> Vec<String> {
        // Zoom 10 is the minimum that preserves block-group shapes, the
        // densest geography this pipeline handles.
        let mut args = vec!["-z10".to_string()];
        for field in EXCLUDED_FIELDS {
            args.push("-x".to_string());
            args.push((*field).to_string());
        }
        args.extend(
            [
                "--no-simplification-of-shared-nodes",
                "--coalesce-densest-as-needed",
                "--extend-zooms-if-still-dropping",
                "--projection",
                "EPSG:4326",
                "-o",
            ]
            .map(String::from),
        );
        args.push(output_path.to_string_lossy().to_string());
        args.push("-l".to_string());
        args.push(layer_name.to_string());
        args.push("--force".to_string());
        args.push(geojson_path.to_string_lossy().to_string());
        args
    }
}

impl TilingClient for TippecanoeClient {
    fn generate_tiles(
        &self,
        geojson_path: &Path,
        output_path: &Path,
        layer_name: &str,
    ) -> Result<(), GeodataError> {
        let args = Self::build_args(geojson_path, output_path, layer_name);
        tracing::debug!(binary = %self.binary.display(), ?args, "invoking tippecanoe");

        let output = Command::new(&self.binary).args(&args).output().map_err(|err| {
            GeodataError::ExternalToolFailed {
                tool: self.binary.to_string_lossy().to_string(),
                code: -1,
                stderr: err.to_string(),
            }
        })?;

        if output.status.success() {
            return Ok(());
        }
        Err(GeodataError::ExternalToolFailed {
            tool: self.binary.to_string_lossy().to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tippecanoe_flag_set() {
        let args = TippecanoeClient::build_args(
            Path::new("county-2020-500k.geojson"),
            Path::new("county-2020-500k.pmtiles"),
            "county-2020-500k",
        );

        assert_eq!(args[0], "-z10");
        assert!(args.contains(&"--no-simplification-of-shared-nodes".to_string()));
        assert!(args.contains(&"--coalesce-densest-as-needed".to_string()));
        assert!(args.contains(&"--extend-zooms-if-still-dropping".to_string()));
        assert!(args.contains(&"--force".to_string()));

        let excluded: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "-x")
            .map(|(_, field)| field)
            .collect();
        assert_eq!(excluded.len(), EXCLUDED_FIELDS.len());
        assert_eq!(args.last().unwrap(), "county-2020-500k.geojson");
    }

    #[test]
    fn missing_binary_surfaces_as_tool_failure() {
        let client = TippecanoeClient::new(PathBuf::from("/nonexistent/tippecanoe"));
        let err = client
            .generate_tiles(
                Path::new("in.geojson"),
                Path::new("out.pmtiles"),
                "layer",
            )
            .unwrap_err();
        assert!(matches!(err, GeodataError::ExternalToolFailed { .. }));
    }
}
