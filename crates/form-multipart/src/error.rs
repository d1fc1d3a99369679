use thiserror::Error;

/// Errors produced while parsing a `multipart/form-data` body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("invalid boundary: {0}")]
    InvalidBoundary(&'static str),

    #[error("body does not contain an opening boundary delimiter")]
    MissingOpeningBoundary,

    #[error("malformed boundary delimiter at offset {0}")]
    MalformedDelimiter(usize),

    #[error("body ends before the closing boundary delimiter")]
    MissingClosingBoundary,

    #[error("part headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("malformed part header line: {0}")]
    MalformedHeader(String),

    #[error("part has no form-data content-disposition")]
    MissingDisposition,

    #[error("content-disposition has no name parameter")]
    MissingName,

    #[error("form contains no parts")]
    EmptyForm,
}
