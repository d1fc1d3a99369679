//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// The first three variants form the ingest taxonomy: they are produced while
/// handling an upload and are mapped to a status code by the response policy.
/// The remaining variants only occur outside request handling (start-up,
/// configuration, logging).
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported request. Never retried; always a 4xx.
    #[error("{0}")]
    Classification(String),

    /// Storage or body I/O failure. The client is expected to retry the segment.
    #[error("{0}")]
    Write(String),

    /// Chunked-ingest ordering violation.
    #[error("{0}")]
    Sequence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    pub fn sequence(msg: impl Into<String>) -> Self {
        Self::Sequence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short name of the error kind, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Classification(_) => "classification",
            Self::Write(_) => "write",
            Self::Sequence(_) => "sequence",
            Self::Configuration(_) => "configuration",
            Self::IoPath { .. } => "io",
            Self::ApiError(_) => "api",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_display_is_the_bare_detail() {
        assert_eq!(
            Error::classification("unsupported content type").to_string(),
            "unsupported content type"
        );
        assert_eq!(Error::write("truncated body").to_string(), "truncated body");
        assert_eq!(Error::sequence("out of order").kind(), "sequence");
    }

    #[test]
    fn test_io_path_display() {
        let err = Error::io_path(
            "creating directory",
            Path::new("/tmp/out"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("creating directory"));
        assert!(msg.contains("/tmp/out"));
        assert_eq!(err.kind(), "io");
    }
}
