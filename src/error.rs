use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeodataError {
    #[error("download failed for {url}: {message}")]
    TransferFailed { url: String, message: String },

    #[error("source server returned status {status} for {url}")]
    TransferStatus { status: u16, url: String },

    #[error("corrupt or unreadable archive {0}")]
    ArchiveCorrupt(PathBuf),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("missing attribute(s) during enrichment: {0}")]
    MissingAttribute(String),

    #[error("{tool} exited with {code}: {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("no matching source information for {geography} -> {year} -> {scale}")]
    InvalidJobCombination {
        year: String,
        scale: String,
        geography: String,
    },

    #[error("upload failed for {path}: {message}")]
    UploadFailed { path: PathBuf, message: String },

    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("failed to parse lookup file {path}: {message}")]
    LookupParse { path: PathBuf, message: String },

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("unsupported geometry type in {0}")]
    UnsupportedGeometry(PathBuf),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
