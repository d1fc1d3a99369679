//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::api::ApiServerConfig;
use crate::config::{DashMode, EmptyRawPostPolicy, IngestConfig};

/// HTTP ingest test server for a live WebM/DASH encoder.
#[derive(Debug, Clone, Parser)]
#[command(name = "webm-ingest", version, about)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "INGEST_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "INGEST_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Directory uploads are written to
    #[arg(long, env = "INGEST_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Base name of sequenced DASH files
    #[arg(long, env = "INGEST_STREAM_NAME", default_value = "webmlive")]
    pub stream_name: String,

    /// Multipart form field holding the upload
    #[arg(long, env = "INGEST_UPLOAD_FIELD", default_value = "webm_file")]
    pub upload_field_name: String,

    /// Content-Type accepted for raw uploads
    #[arg(long, env = "INGEST_RAW_MEDIA_TYPE", default_value = "video/webm")]
    pub raw_media_type: String,

    /// File raw and multipart uploads are appended to
    #[arg(long, env = "INGEST_RAW_OUTPUT_FILE", default_value = "test.webm")]
    pub raw_output_file: String,

    /// How /dash uploads are named: sequenced or content-id
    ///
    /// Encoders with separate audio and video representations need content-id.
    #[arg(long, env = "INGEST_DASH_MODE", default_value = "sequenced")]
    pub dash_mode: DashMode,

    /// Raw POSTs with Content-Length 0: reject or accept
    #[arg(long, env = "INGEST_EMPTY_RAW_POST", default_value = "reject")]
    pub empty_raw_post: EmptyRawPostPolicy,

    /// Seconds to wait for each read from a request body
    #[arg(long, env = "INGEST_READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// Largest accepted Content-Length in bytes
    #[arg(long, env = "INGEST_MAX_UPLOAD_BYTES", default_value_t = 268_435_456)]
    pub max_upload_bytes: u64,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, env = "INGEST_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    pub fn server_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_address: self.bind_address.clone(),
            port: self.port,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            output_dir: self.output_dir.clone(),
            stream_name: self.stream_name.clone(),
            upload_field_name: self.upload_field_name.clone(),
            raw_media_type: self.raw_media_type.clone(),
            raw_output_file: self.raw_output_file.clone(),
            dash_mode: self.dash_mode,
            empty_raw_post: self.empty_raw_post,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_ingest_defaults() {
        let args = Args::try_parse_from(["webm-ingest"]).unwrap();
        let defaults = IngestConfig::default();
        let config = args.ingest_config();

        assert_eq!(args.port, 8000);
        assert_eq!(config.output_dir, defaults.output_dir);
        assert_eq!(config.stream_name, defaults.stream_name);
        assert_eq!(config.upload_field_name, defaults.upload_field_name);
        assert_eq!(config.raw_output_file, defaults.raw_output_file);
        assert_eq!(config.dash_mode, defaults.dash_mode);
        assert_eq!(config.read_timeout, defaults.read_timeout);
        assert_eq!(config.max_upload_bytes, defaults.max_upload_bytes);
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "webm-ingest",
            "-p",
            "9000",
            "--dash-mode",
            "content-id",
            "--empty-raw-post",
            "accept",
            "--output-dir",
            "/tmp/out",
            "--read-timeout-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(args.server_config().port, 9000);
        let config = args.ingest_config();
        assert_eq!(config.dash_mode, DashMode::ContentId);
        assert_eq!(config.empty_raw_post, EmptyRawPostPolicy::Accept);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_unknown_dash_mode() {
        assert!(Args::try_parse_from(["webm-ingest", "--dash-mode", "bogus"]).is_err());
    }

    #[test]
    fn test_command_is_well_formed() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
