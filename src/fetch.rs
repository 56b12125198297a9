use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::app::ProgressSink;
use crate::error::GeodataError;

const CHUNK_SIZE: usize = 64 * 1024;

pub trait SourceClient: Send + Sync {
    /// Retrieve one remote file into the cache. Returns the local path.
    ///
    /// A cache hit (`destination` exists, `no_cache` unset) performs no
    /// network activity. Downloads stream through a temp file and are
    /// renamed into place only when complete, so a truncated transfer can
    /// never be mistaken for a cached file later.
    fn download(
        &self,
        url: &str,
        destination: &Path,
        no_cache: bool,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, GeodataError>;
}

#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
}

impl HttpSourceClient {
    pub fn new() -> Result<Self, GeodataError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("herop-geodata/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeodataError::Filesystem(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| GeodataError::TransferFailed {
                url: String::new(),
                message: err.to_string(),
            })?;

        Ok(Self { client })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, GeodataError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(GeodataError::TransferFailed {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

impl SourceClient for HttpSourceClient {
    fn download(
        &self,
        url: &str,
        destination: &Path,
        no_cache: bool,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, GeodataError> {
        let label = destination
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(url)
            .to_string();

        if destination.is_file() && !no_cache {
            sink.detail(&format!(" - {label}: using cached file"));
            return Ok(destination.to_path_buf());
        }

        let parent = destination
            .parent()
            .ok_or_else(|| GeodataError::Filesystem("destination has no parent".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| GeodataError::Filesystem(err.to_string()))?;

        let mut response = self.send_with_retries(url)?;
        if !response.status().is_success() {
            return Err(GeodataError::TransferStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let total = response.content_length();

        let mut temp = tempfile::Builder::new()
            .prefix(".download")
            .tempfile_in(parent)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;

        let mut buffer = [0u8; CHUNK_SIZE];
        let mut seen = 0u64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| GeodataError::TransferFailed {
                    url: url.to_string(),
                    message: err.to_string(),
                })?;
            if read == 0 {
                break;
            }
            temp.write_all(&buffer[..read])
                .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
            seen += read as u64;
            sink.bytes(&label, seen, total);
        }
        sink.bytes_done();

        if destination.exists() {
            fs::remove_file(destination).map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        }
        temp.persist(destination)
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;

        Ok(destination.to_path_buf())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
