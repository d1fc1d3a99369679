//! Upload classification.

use form_multipart::{boundary_from_content_type, validate_boundary};

use crate::config::{DASH_PATH_PREFIX, DashMode, EmptyRawPostPolicy, IngestConfig};
use crate::ingest::headers::{UploadHeaders, media_type};
use crate::ingest::sequencer::SegmentKind;
use crate::ingest::writer::{WriteMode, is_part_file_name};
use crate::{Error, Result};

const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// How an upload is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestMode {
    /// Whole-file POST of the raw media type, appended to the raw output file.
    RawMediaAppend,
    /// Form upload; the payload is the named field.
    MultipartUpload { boundary: String, field_name: String },
    /// Overwrite of the file named by the sanitized `X-Content-Id`.
    PathAddressedWrite { file_name: String },
    /// Chunked ingest numbered by the sequencer.
    SequencedChunk { hint: Option<SegmentKind> },
}

impl IngestMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawMediaAppend => "raw_media_append",
            Self::MultipartUpload { .. } => "multipart_upload",
            Self::PathAddressedWrite { .. } => "path_addressed_write",
            Self::SequencedChunk { .. } => "sequenced_chunk",
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        match self {
            Self::RawMediaAppend | Self::MultipartUpload { .. } => WriteMode::Append,
            Self::PathAddressedWrite { .. } | Self::SequencedChunk { .. } => WriteMode::Truncate,
        }
    }

    /// Whether this mode belongs to the chunked `/dash` family.
    pub fn is_chunked(&self) -> bool {
        matches!(
            self,
            Self::PathAddressedWrite { .. } | Self::SequencedChunk { .. }
        )
    }
}

/// Result of classifying an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPlan {
    pub mode: IngestMode,
    pub declared_length: u64,
}

/// Picks an [`IngestMode`] from request metadata.
///
/// Classification is a pure function of the path, the headers and the
/// configuration; it never touches the body or the filesystem.
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    dash_mode: DashMode,
    upload_field_name: String,
    raw_media_type: String,
    raw_output_file: String,
    empty_raw_post: EmptyRawPostPolicy,
    max_upload_bytes: u64,
}

impl ContentClassifier {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            dash_mode: config.dash_mode,
            upload_field_name: config.upload_field_name.clone(),
            raw_media_type: media_type(&config.raw_media_type),
            raw_output_file: config.raw_output_file.clone(),
            empty_raw_post: config.empty_raw_post,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn classify(&self, path: &str, headers: &UploadHeaders) -> Result<IngestPlan> {
        let mode = self.classify_mode(path, headers)?;
        let declared_length = self.declared_length(headers)?;

        if declared_length == 0 {
            match mode {
                IngestMode::RawMediaAppend
                    if self.empty_raw_post == EmptyRawPostPolicy::Accept => {}
                IngestMode::RawMediaAppend | IngestMode::MultipartUpload { .. } => {
                    return Err(Error::classification("missing or zero content-length"));
                }
                _ => {}
            }
        }

        Ok(IngestPlan {
            mode,
            declared_length,
        })
    }

    fn classify_mode(&self, path: &str, headers: &UploadHeaders) -> Result<IngestMode> {
        if path.starts_with(DASH_PATH_PREFIX) {
            return match self.dash_mode {
                DashMode::Sequenced => Ok(IngestMode::SequencedChunk {
                    hint: headers.content_id().and_then(SegmentKind::from_content_id),
                }),
                DashMode::ContentId => {
                    let content_id = headers
                        .content_id()
                        .ok_or_else(|| Error::classification("missing content id"))?;
                    let file_name = sanitize_content_id(content_id)?;
                    // Raw uploads and in-flight overwrites own these names.
                    if file_name == self.raw_output_file || is_part_file_name(&file_name) {
                        return Err(Error::classification(format!(
                            "reserved content id '{file_name}'"
                        )));
                    }
                    Ok(IngestMode::PathAddressedWrite { file_name })
                }
            };
        }

        let content_type = headers.content_type().unwrap_or_default();
        let essence = media_type(content_type);

        if essence == MULTIPART_FORM_DATA {
            let boundary = boundary_from_content_type(content_type)
                .ok_or_else(|| Error::classification("missing multipart boundary"))?;
            validate_boundary(&boundary)
                .map_err(|e| Error::classification(format!("bad multipart boundary: {e}")))?;
            return Ok(IngestMode::MultipartUpload {
                boundary,
                field_name: self.upload_field_name.clone(),
            });
        }

        if !essence.is_empty() && essence == self.raw_media_type {
            return Ok(IngestMode::RawMediaAppend);
        }

        Err(Error::classification("unsupported content type"))
    }

    fn declared_length(&self, headers: &UploadHeaders) -> Result<u64> {
        let raw = headers
            .content_length()
            .ok_or_else(|| Error::classification("missing or zero content-length"))?;
        let length: u64 = raw
            .parse()
            .map_err(|_| Error::classification(format!("invalid content-length '{raw}'")))?;

        if length > self.max_upload_bytes {
            return Err(Error::classification(format!(
                "content-length {length} exceeds the {} byte upload limit",
                self.max_upload_bytes
            )));
        }
        Ok(length)
    }
}

/// Reduce a client-supplied content id to its final path component.
///
/// Both `/` and `\` count as separators, so no directory part a client sends
/// can reach the filesystem. `.` and `..` are treated as empty.
pub fn sanitize_content_id(content_id: &str) -> Result<String> {
    let base = content_id
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::classification("empty content id"));
    }
    Ok(base.to_string())
}
