//! Error types for the doconv-core library.

use thiserror::Error;

/// Main error type for a conversion request.
///
/// Every variant is terminal: the pipeline never retries and never returns
/// partial output alongside an error.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Operation identifier is unknown, or the input format does not match
    /// the operation's source format.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The source document contains no bytes.
    #[error("source document is empty")]
    EmptyInput,

    /// Source bytes do not conform to the expected container format.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Intermediate content could not be serialized into the target format.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The caller cancelled the request between two units.
    #[error("conversion cancelled after {completed} unit(s)")]
    Cancelled { completed: u32 },

    /// Background worker failed before producing a result.
    #[error("worker failed: {0}")]
    Worker(String),
}

/// Errors raised by format readers and the watermark remover while loading
/// source bytes.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The PDF container could not be read (header, xref table or trailer).
    #[error("failed to parse PDF: {0}")]
    Pdf(String),

    /// The PDF is encrypted and the empty user password does not open it.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// The OOXML zip container is corrupt.
    #[error("corrupt archive: {0}")]
    Archive(String),

    /// A part required by the package format is missing.
    #[error("missing required part: {0}")]
    MissingPart(String),

    /// A package part is not well-formed XML.
    #[error("malformed XML in {part}: {reason}")]
    Xml { part: String, reason: String },
}

/// Errors raised by format writers.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// PDF serialization failed.
    #[error("failed to write PDF: {0}")]
    Pdf(String),

    /// Zip packaging failed.
    #[error("failed to write archive: {0}")]
    Archive(String),

    /// Intermediate content violates its ordering invariant.
    #[error("invalid content model: {0}")]
    InvalidContent(String),
}

impl From<lopdf::Error> for ParseError {
    fn from(err: lopdf::Error) -> Self {
        ParseError::Pdf(err.to_string())
    }
}

impl From<zip::result::ZipError> for ParseError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::FileNotFound => {
                ParseError::MissingPart("archive entry".to_string())
            }
            other => ParseError::Archive(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for EncodingError {
    fn from(err: zip::result::ZipError) -> Self {
        EncodingError::Archive(err.to_string())
    }
}

impl From<std::io::Error> for EncodingError {
    fn from(err: std::io::Error) -> Self {
        EncodingError::Archive(err.to_string())
    }
}

/// Result type for the doconv library.
pub type Result<T> = std::result::Result<T, ConversionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_wraps_into_conversion_error() {
        let err: ConversionError = ParseError::NoPages.into();
        assert!(matches!(err, ConversionError::Parse(ParseError::NoPages)));
        assert_eq!(err.to_string(), "parse error: PDF has no pages");
    }

    #[test]
    fn test_missing_zip_entry_is_missing_part() {
        let err: ParseError = zip::result::ZipError::FileNotFound.into();
        assert!(matches!(err, ParseError::MissingPart(_)));
    }

    #[test]
    fn test_cancelled_display() {
        let err = ConversionError::Cancelled { completed: 2 };
        assert!(err.to_string().contains("2 unit"));
    }
}
