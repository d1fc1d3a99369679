//! Mapping of ingest results to HTTP replies.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::Error;
use crate::Result;
use crate::ingest::classifier::IngestMode;
use crate::ingest::writer::IngestOutcome;

/// Body of a successful whole-file or form upload.
pub const POST_OK: &str = "Post OK";

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// Status and plain-text body for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReply {
    pub status: StatusCode,
    pub body: String,
}

impl IngestReply {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Build the reply for an upload.
///
/// `mode` is `None` when the request failed classification.
pub fn reply(mode: Option<&IngestMode>, result: &Result<IngestOutcome>) -> IngestReply {
    match result {
        Ok(_) => {
            let body = match mode {
                Some(mode) if mode.is_chunked() => "",
                _ => POST_OK,
            };
            IngestReply::new(StatusCode::OK, body)
        }
        Err(e) => IngestReply::new(status_for(e), e.to_string()),
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Classification(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for IngestReply {
    fn into_response(self) -> Response {
        (
            self.status,
            [(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8))],
            self.body,
        )
            .into_response()
    }
}
