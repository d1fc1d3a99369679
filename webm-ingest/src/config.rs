//! Ingest configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default reserved path prefix for chunked (DASH) ingestion.
pub const DASH_PATH_PREFIX: &str = "/dash";

/// How POSTs under [`DASH_PATH_PREFIX`] are classified.
///
/// Older test servers wrote `/dash` uploads to the file named by `X-Content-Id`;
/// later ones number them by arrival order. Both are kept selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DashMode {
    /// Destination derived from the ingest sequence counter.
    #[default]
    Sequenced,
    /// Destination taken from the sanitized `X-Content-Id` header.
    ContentId,
}

/// Handling of raw media POSTs that declare `Content-Length: 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum EmptyRawPostPolicy {
    /// Respond 400 and leave the output file untouched.
    #[default]
    Reject,
    /// Respond 200 without writing anything.
    Accept,
}

/// Configuration of the ingest dispatcher.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory all output files are written to.
    pub output_dir: PathBuf,
    /// Base name used for sequenced manifest, header and chunk files.
    pub stream_name: String,
    /// Multipart field carrying the uploaded payload.
    pub upload_field_name: String,
    /// `Content-Type` accepted for whole-file raw POSTs.
    pub raw_media_type: String,
    /// File that raw and multipart uploads are appended to.
    pub raw_output_file: String,
    pub dash_mode: DashMode,
    pub empty_raw_post: EmptyRawPostPolicy,
    /// Deadline for each read from a request body.
    pub read_timeout: Duration,
    /// Largest `Content-Length` accepted.
    pub max_upload_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            stream_name: "webmlive".to_string(),
            upload_field_name: "webm_file".to_string(),
            raw_media_type: "video/webm".to_string(),
            raw_output_file: "test.webm".to_string(),
            dash_mode: DashMode::default(),
            empty_raw_post: EmptyRawPostPolicy::default(),
            read_timeout: Duration::from_secs(30),
            max_upload_bytes: 256 * 1024 * 1024, // 256MB
        }
    }
}

impl IngestConfig {
    /// Full path of the append-mode output file.
    pub fn raw_output_path(&self) -> PathBuf {
        self.output_dir.join(&self.raw_output_file)
    }

    /// Reject settings that would make output naming escape `output_dir` or
    /// make every request fail.
    pub fn validate(&self) -> Result<()> {
        if !is_bare_file_name(&self.stream_name) {
            return Err(Error::config(format!(
                "stream name must be a plain file name, got '{}'",
                self.stream_name
            )));
        }
        if !is_bare_file_name(&self.raw_output_file) {
            return Err(Error::config(format!(
                "raw output file must be a plain file name, got '{}'",
                self.raw_output_file
            )));
        }
        if self.upload_field_name.trim().is_empty() {
            return Err(Error::config("upload field name must not be empty"));
        }
        match self.raw_media_type.split_once('/') {
            Some((ty, sub)) if !ty.trim().is_empty() && !sub.trim().is_empty() => {}
            _ => {
                return Err(Error::config(format!(
                    "raw media type must look like type/subtype, got '{}'",
                    self.raw_media_type
                )));
            }
        }
        if self.read_timeout.is_zero() {
            return Err(Error::config("read timeout must be greater than zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::config("max upload size must be greater than zero"));
        }
        Ok(())
    }
}

fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
