use crate::MultipartError;

/// Longest boundary allowed by RFC 2046 section 5.1.1.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Check a boundary against the `bchars` grammar of RFC 2046.
///
/// Spaces are allowed inside the boundary but not as its final character.
pub fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.is_empty() {
        return Err(MultipartError::InvalidBoundary("empty"));
    }
    if boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MultipartError::InvalidBoundary("longer than 70 characters"));
    }
    if boundary.ends_with(' ') {
        return Err(MultipartError::InvalidBoundary("ends with a space"));
    }
    if !boundary.bytes().all(is_bchar) {
        return Err(MultipartError::InvalidBoundary("contains a character outside bchars"));
    }
    Ok(())
}

#[inline]
fn is_bchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?' | b' '
        )
}

/// Extract the `boundary` parameter from a `Content-Type` value.
///
/// Only the parameter is looked up; the caller is responsible for checking
/// that the media type is `multipart/form-data`.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
}

/// Strip surrounding double quotes and resolve `\x` escapes.
pub(crate) fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
