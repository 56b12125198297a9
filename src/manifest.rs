use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::Job;
use crate::error::GeodataError;

/// One row of `uploads-list.csv`, the durable record of published URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub geography: String,
    pub year: String,
    pub scale: String,
    pub url: String,
    pub uploaded: String,
}

impl UploadRecord {
    pub fn new(job: &Job, url: &str) -> Self {
        Self {
            geography: job.geography().to_string(),
            year: job.year().to_string(),
            scale: job.scale().to_string(),
            url: url.to_string(),
            uploaded: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub fn read_manifest(path: &Path) -> Result<Vec<UploadRecord>, GeodataError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let mut reader =
        csv::Reader::from_path(path).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<UploadRecord>, _>>()
        .map_err(|err| GeodataError::Filesystem(err.to_string()))
}

/// Record one published URL: any previous row for the same URL is dropped,
/// the new row appended, and the whole manifest re-sorted by
/// (geography, year, scale) and rewritten. Not safe against concurrent
/// pipeline invocations; callers must serialize externally.
pub fn record_upload(path: &Path, record: UploadRecord) -> Result<(), GeodataError> {
    let mut rows: Vec<UploadRecord> = read_manifest(path)?
        .into_iter()
        .filter(|row| row.url != record.url)
        .collect();
    rows.push(record);
    rows.sort_by(|a, b| {
        (&a.geography, &a.year, &a.scale).cmp(&(&b.geography, &b.year, &b.scale))
    });

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    for row in &rows {
        writer
            .serialize(row)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| GeodataError::Filesystem(err.to_string()))
}
