use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::S3Config;
use crate::error::GeodataError;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

pub trait ObjectStorageClient: Send + Sync {
    /// Upload one local file under the configured prefix and return its
    /// public URL.
    fn upload(&self, path: &Path, verbose: bool) -> Result<String, GeodataError>;
}

pub struct S3Client {
    config: S3Config,
    client: reqwest::blocking::Client,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self, GeodataError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn object_key(&self, filename: &str) -> String {
        if self.config.prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.config.prefix, filename)
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.config.bucket, self.config.region, key
        )
    }

    fn authorization_header(
        &self,
        host: &str,
        canonical_uri: &str,
        amz_date: &str,
        date_stamp: &str,
    ) -> Result<String, GeodataError> {
        let canonical_request = format!(
            "PUT\n{canonical_uri}\n\nhost:{host}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}"
        );
        let scope = format!("{date_stamp}/{}/s3/aws4_request", self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac_sha256(
            format!("AWS4{}", self.config.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        )?;
        for part in [self.config.region.as_str(), "s3", "aws4_request"] {
            key = hmac_sha256(&key, part.as_bytes())?;
        }
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.config.access_key
        ))
    }
}

impl ObjectStorageClient for S3Client {
    fn upload(&self, path: &Path, verbose: bool) -> Result<String, GeodataError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| GeodataError::UploadFailed {
                path: path.to_path_buf(),
                message: "invalid file name".to_string(),
            })?;
        let key = self.object_key(filename);
        let canonical_uri = format!("/{}", uri_encode_path(&key));
        let host = format!(
            "{}.s3.{}.amazonaws.com",
            self.config.bucket, self.config.region
        );
        let url = self.public_url(&key);

        let file = fs::File::open(path).map_err(|err| GeodataError::UploadFailed {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let size = file
            .metadata()
            .map_err(|err| GeodataError::UploadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
            .len();

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let authorization =
            self.authorization_header(&host, &canonical_uri, &amz_date, &date_stamp)?;

        let progress = Arc::new(UploadProgress::new(filename, size, verbose));
        let reader = ProgressReader {
            inner: file,
            progress: Arc::clone(&progress),
        };
        let body = reqwest::blocking::Body::sized(reader, size);

        let response = self
            .client
            .put(&url)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("authorization", authorization)
            .body(body)
            .send()
            .map_err(|err| GeodataError::UploadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        progress.finish();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "upload rejected".to_string());
            return Err(GeodataError::UploadFailed {
                path: path.to_path_buf(),
                message: format!("status {status}: {message}"),
            });
        }

        Ok(url)
    }
}

/// Running byte total for one upload. The reqwest body reader advances it
/// from whatever thread drives the request, so the counter sits behind a
/// mutex.
pub struct UploadProgress {
    filename: String,
    size: u64,
    seen: Mutex<u64>,
    verbose: bool,
}

impl UploadProgress {
    pub fn new(filename: &str, size: u64, verbose: bool) -> Self {
        Self {
            filename: filename.to_string(),
            size,
            seen: Mutex::new(0),
            verbose,
        }
    }

    pub fn add(&self, bytes: u64) -> u64 {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *seen += bytes;
        let total = *seen;
        drop(seen);

        if self.verbose && self.size > 0 {
            let percentage = (total as f64 / self.size as f64) * 100.0;
            print!(
                "\r - {}  {:.2} / {:.2} MB  ({percentage:.2}%)",
                self.filename,
                to_mb(total),
                to_mb(self.size)
            );
            let _ = io::stdout().flush();
        }
        total
    }

    fn finish(&self) {
        if self.verbose {
            println!();
        }
    }

    pub fn seen(&self) -> u64 {
        match self.seen.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

struct ProgressReader<R> {
    inner: R,
    progress: Arc<UploadProgress>,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 {
            self.progress.add(read as u64);
        }
        Ok(read)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, GeodataError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| GeodataError::Filesystem(err.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn uri_encode_path(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::config::S3Config;

    fn client() -> S3Client {
        S3Client::new(S3Config {
            bucket: "herop-geodata".to_string(),
            region: "us-east-2".to_string(),
            prefix: "census".to_string(),
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn url_derivation() {
        let client = client();
        let key = client.object_key("county-2020-500k.pmtiles");
        assert_eq!(key, "census/county-2020-500k.pmtiles");
        assert_eq!(
            client.public_url(&key),
            "https://herop-geodata.s3.us-east-2.amazonaws.com/census/county-2020-500k.pmtiles"
        );
    }

    #[test]
    fn empty_prefix_omits_separator() {
        let client = S3Client::new(S3Config {
            bucket: "scratch".to_string(),
            region: "us-east-1".to_string(),
            prefix: String::new(),
            access_key: "key".to_string(),
            secret_key: "secret".to_string(),
        })
        .unwrap();
        assert_eq!(client.object_key("a.zip"), "a.zip");
    }

    #[test]
    fn uri_encoding_preserves_slashes() {
        assert_eq!(
            uri_encode_path("census/county 2020.zip"),
            "census/county%202020.zip"
        );
    }

    #[test]
    fn progress_counter_accumulates_across_threads() {
        let progress = Arc::new(UploadProgress::new("file.zip", 1024, false));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let progress = Arc::clone(&progress);
                thread::spawn(move || {
                    for _ in 0..64 {
                        progress.add(4);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(progress.seen(), 1024);
    }
}
