//! Strict `multipart/form-data` parsing.
//!
//! The parser works on a fully buffered body and hands out zero-copy
//! [`Part`]s backed by the original [`bytes::Bytes`]. Boundaries are checked
//! against RFC 2046 before any scanning happens, and malformed delimiters or a
//! missing closing delimiter are reported as errors instead of being skipped.
//!
//! ```
//! use bytes::Bytes;
//! use form_multipart::FormData;
//!
//! let body = Bytes::from_static(
//!     b"--xyz\r\nContent-Disposition: form-data; name=\"webm_file\"\r\n\r\nDATA\r\n--xyz--\r\n",
//! );
//! let form = FormData::parse(body, "xyz").unwrap();
//! assert_eq!(&form.field("webm_file").unwrap().data[..], b"DATA");
//! ```

mod boundary;
mod error;
mod parser;

pub use boundary::{MAX_BOUNDARY_LEN, boundary_from_content_type, validate_boundary};
pub use error::MultipartError;
pub use parser::{FormData, MAX_PART_HEADER_BYTES, Part};
