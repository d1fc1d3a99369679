use bytes::Bytes;
use memchr::memmem;

use crate::MultipartError;
use crate::boundary::{unquote, validate_boundary};

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Upper bound for the header block of a single part.
pub const MAX_PART_HEADER_BYTES: usize = 8 * 1024;

/// A single `form-data` part.
///
/// `data` is a slice of the original body, so parts do not copy payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A parsed `multipart/form-data` body.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    parts: Vec<Part>,
}

impl FormData {
    /// Parse a complete form body.
    ///
    /// Parsing is strict: the opening delimiter must start a line, every
    /// delimiter must be followed by CRLF (optionally after transport padding)
    /// or by `--`, each part needs a `form-data` disposition with a name, and
    /// the closing delimiter must be present. A preamble before the first
    /// delimiter and an epilogue after the last one are ignored.
    pub fn parse(body: Bytes, boundary: &str) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;

        let delimiter = [b"--".as_slice(), boundary.as_bytes()].concat();
        let inner_delimiter = [b"\r\n--".as_slice(), boundary.as_bytes()].concat();
        let finder = memmem::Finder::new(&inner_delimiter);
        let buf = &body[..];

        let mut pos = if buf.starts_with(&delimiter) {
            0
        } else {
            finder
                .find(buf)
                .map(|i| i + CRLF.len())
                .ok_or(MultipartError::MissingOpeningBoundary)?
        };

        let mut parts = Vec::new();
        loop {
            let after = pos + delimiter.len();
            let rest = &buf[after..];
            if rest.starts_with(b"--") {
                break;
            }

            let padding = rest
                .iter()
                .take_while(|b| **b == b' ' || **b == b'\t')
                .count();
            if !rest[padding..].starts_with(CRLF) {
                return Err(if rest.len() < padding + CRLF.len() {
                    MultipartError::MissingClosingBoundary
                } else {
                    MultipartError::MalformedDelimiter(after)
                });
            }

            let (headers, content_start) = parse_headers(buf, after + padding + CRLF.len())?;
            let content_end = finder
                .find(&buf[content_start..])
                .map(|i| content_start + i)
                .ok_or(MultipartError::MissingClosingBoundary)?;

            parts.push(Part::from_headers(
                &headers,
                body.slice(content_start..content_end),
            )?);
            pos = content_end + CRLF.len();
        }

        if parts.is_empty() {
            return Err(MultipartError::EmptyForm);
        }
        Ok(Self { parts })
    }

    /// All parts in body order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// First part whose field name equals `name`.
    pub fn field(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Consume the form and return the first part named `name`.
    pub fn into_field(self, name: &str) -> Option<Part> {
        self.parts.into_iter().find(|p| p.name == name)
    }
}

impl Part {
    fn from_headers(headers: &[(String, String)], data: Bytes) -> Result<Self, MultipartError> {
        let disposition = header(headers, "content-disposition")
            .ok_or(MultipartError::MissingDisposition)?;

        let mut params = split_params(disposition).into_iter();
        let kind = params.next().unwrap_or_default().trim();
        if !kind.eq_ignore_ascii_case("form-data") {
            return Err(MultipartError::MissingDisposition);
        }

        let mut name = None;
        let mut filename = None;
        for param in params {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("name") {
                name = Some(unquote(value.trim()));
            } else if key.eq_ignore_ascii_case("filename") {
                filename = Some(unquote(value.trim()));
            }
        }

        Ok(Self {
            name: name.ok_or(MultipartError::MissingName)?,
            filename,
            content_type: header(headers, "content-type").map(str::to_string),
            data,
        })
    }
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse the header block starting at `start`.
///
/// Returns the headers and the offset where the part content begins.
fn parse_headers(
    buf: &[u8],
    start: usize,
) -> Result<(Vec<(String, String)>, usize), MultipartError> {
    let rest = &buf[start..];
    if rest.starts_with(CRLF) {
        return Ok((Vec::new(), start + CRLF.len()));
    }

    let end = match memmem::find(rest, HEADER_END) {
        Some(end) if end > MAX_PART_HEADER_BYTES => {
            return Err(MultipartError::HeadersTooLarge(MAX_PART_HEADER_BYTES));
        }
        Some(end) => end,
        None if rest.len() > MAX_PART_HEADER_BYTES => {
            return Err(MultipartError::HeadersTooLarge(MAX_PART_HEADER_BYTES));
        }
        None => return Err(MultipartError::MissingClosingBoundary),
    };

    let block = std::str::from_utf8(&rest[..end])
        .map_err(|_| MultipartError::MalformedHeader("non UTF-8 header block".to_string()))?;

    let mut headers = Vec::new();
    for line in block.split("\r\n") {
        // Obsolete line folding is rejected rather than joined.
        if line.starts_with([' ', '\t']) {
            return Err(MultipartError::MalformedHeader(line.to_string()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MultipartError::MalformedHeader(line.to_string()))?;
        if name.trim().is_empty() {
            return Err(MultipartError::MalformedHeader(line.to_string()));
        }
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok((headers, start + end + HEADER_END.len()))
}

/// Split a header value on `;`, ignoring separators inside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                out.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&value[start..]);
    out
}
