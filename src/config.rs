use std::path::PathBuf;

use crate::error::GeodataError;

pub const DEFAULT_MIRROR_URL: &str = "https://www2.census.gov/geo";
pub const DEFAULT_REGION: &str = "us-east-2";

/// Bucket/prefix pair the shared uploads manifest belongs to. Publishing to
/// any other destination skips the manifest so test runs never pollute it.
pub const CANONICAL_BUCKET: &str = "herop-geodata";
pub const CANONICAL_PREFIX: &str = "census";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
}

impl S3Config {
    pub fn is_canonical_destination(&self) -> bool {
        self.bucket == CANONICAL_BUCKET && self.prefix == CANONICAL_PREFIX
    }
}

/// Process-wide configuration, resolved once at startup from the environment
/// and passed by reference into every component that needs it.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mirror_url: String,
    pub tippecanoe_path: Option<PathBuf>,
    pub s3: Option<S3Config>,
    pub lookups_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let s3 = match (
            env_non_empty("AWS_BUCKET_NAME"),
            env_non_empty("AWS_ACCESS_KEY_ID"),
            env_non_empty("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(access_key), Some(secret_key)) => Some(S3Config {
                bucket,
                region: env_non_empty("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
                prefix: env_non_empty("S3_UPLOAD_PREFIX").unwrap_or_default(),
                access_key,
                secret_key,
            }),
            _ => None,
        };

        Self {
            mirror_url: env_non_empty("MIRROR_URL")
                .unwrap_or_else(|| DEFAULT_MIRROR_URL.to_string()),
            tippecanoe_path: env_non_empty("TIPPECANOE_PATH").map(PathBuf::from),
            s3,
            lookups_dir: PathBuf::from("lookups"),
            cache_dir: PathBuf::from(".cache"),
        }
    }

    /// The shared record of published URLs lives next to the lookup tables.
    pub fn manifest_path(&self) -> PathBuf {
        self.lookups_dir.join("uploads-list.csv")
    }

    pub fn require_tippecanoe(&self) -> Result<&PathBuf, GeodataError> {
        self.tippecanoe_path.as_ref().ok_or_else(|| {
            GeodataError::ConfigurationMissing(
                "TIPPECANOE_PATH is not set, but is needed to support PMTiles output".to_string(),
            )
        })
    }

    pub fn require_s3(&self) -> Result<&S3Config, GeodataError> {
        self.s3.as_ref().ok_or_else(|| {
            GeodataError::ConfigurationMissing(
                "AWS_BUCKET_NAME, AWS_ACCESS_KEY_ID, and AWS_SECRET_ACCESS_KEY are required for upload"
                    .to_string(),
            )
        })
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
