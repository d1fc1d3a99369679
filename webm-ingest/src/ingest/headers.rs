//! Typed access to upload request headers.

use axum::http::HeaderMap;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};

/// Header carrying the client-chosen segment id.
pub const X_CONTENT_ID: &str = "x-content-id";

/// Case-insensitive view over request headers.
///
/// When a header is repeated the last occurrence wins. Values that are not
/// visible ASCII are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct UploadHeaders {
    map: HeaderMap,
}

impl UploadHeaders {
    pub fn new(map: HeaderMap) -> Self {
        Self { map }
    }

    /// Last value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get_all(name)
            .iter()
            .last()
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE.as_str())
    }

    pub fn content_length(&self) -> Option<&str> {
        self.get(CONTENT_LENGTH.as_str())
    }

    pub fn content_id(&self) -> Option<&str> {
        self.get(X_CONTENT_ID)
    }
}

impl From<HeaderMap> for UploadHeaders {
    fn from(map: HeaderMap) -> Self {
        Self::new(map)
    }
}

/// Lower-cased `type/subtype` of a `Content-Type` value, without parameters.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
