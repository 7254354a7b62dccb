//! Intermediate content model shared by every reader and writer.

use serde::{Deserialize, Serialize};

use crate::error::EncodingError;
use crate::ooxml::package::PackageReader;

/// Document container formats accepted and produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// ISO 32000 byte stream.
    Pdf,
    /// WordprocessingML package.
    Docx,
    /// PresentationML package.
    Pptx,
}

impl DocumentFormat {
    /// MIME content type of this format.
    pub fn content_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }

    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => ".pdf",
            DocumentFormat::Docx => ".docx",
            DocumentFormat::Pptx => ".pptx",
        }
    }

    /// Map a file extension (with or without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "pptx" => Some(DocumentFormat::Pptx),
            _ => None,
        }
    }

    /// Detect the format from the content of a buffer.
    ///
    /// OOXML packages are told apart by which main part the archive's central
    /// directory lists. Parts nested inside embedded objects are not entries
    /// of the outer package and do not count.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let head = &bytes[..bytes.len().min(1024)];
        if find_subslice(head, b"%PDF-").is_some() {
            return Some(DocumentFormat::Pdf);
        }
        if !bytes.starts_with(b"PK\x03\x04") {
            return None;
        }
        let package = PackageReader::open(bytes).ok()?;
        if package.has_part("ppt/presentation.xml") {
            Some(DocumentFormat::Pptx)
        } else if package.has_part("word/document.xml") {
            Some(DocumentFormat::Docx)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Pptx => "pptx",
        };
        f.write_str(name)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Source bytes with their declared format.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    bytes: Vec<u8>,
    format: DocumentFormat,
}

impl SourceDocument {
    /// Wrap bytes with an explicitly declared format.
    pub fn new(bytes: Vec<u8>, format: DocumentFormat) -> Self {
        Self { bytes, format }
    }

    /// Wrap bytes, detecting the format from their content and declaring
    /// `fallback` when nothing is recognized.
    pub fn detect_or(bytes: Vec<u8>, fallback: DocumentFormat) -> Self {
        let format = DocumentFormat::sniff(&bytes).unwrap_or(fallback);
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A raw sub-resource embedded in a unit (currently images only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// MIME type of `data`.
    pub media_type: String,
    /// Width in pixels, when known.
    pub width: Option<u32>,
    /// Height in pixels, when known.
    pub height: Option<u32>,
    /// Encoded resource bytes.
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// One page, slide or section of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// 1-based index matching source pagination.
    pub index: u32,
    /// Plain text runs in reading order.
    pub runs: Vec<String>,
    /// Embedded resources, collected only on request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<EmbeddedResource>,
}

impl Unit {
    /// Create a unit holding a single text run.
    pub fn with_text(index: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            runs: vec![text.into()],
            resources: Vec::new(),
        }
    }

    /// All runs joined with single spaces.
    pub fn text(&self) -> String {
        self.runs.join(" ")
    }
}

/// Format-agnostic document model produced by readers and consumed by writers.
///
/// Unit indices are contiguous and strictly increasing from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateContent {
    units: Vec<Unit>,
}

impl IntermediateContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build content from units, checking the index invariant.
    pub fn from_units(units: Vec<Unit>) -> Result<Self, EncodingError> {
        for (pos, unit) in units.iter().enumerate() {
            let expected = pos as u32 + 1;
            if unit.index != expected {
                return Err(EncodingError::InvalidContent(format!(
                    "unit at position {} has index {}, expected {}",
                    pos, unit.index, expected
                )));
            }
        }
        Ok(Self { units })
    }

    /// Append a unit, assigning it the next index.
    pub fn push(&mut self, runs: Vec<String>, resources: Vec<EmbeddedResource>) -> u32 {
        let index = self.units.len() as u32 + 1;
        self.units.push(Unit {
            index,
            runs,
            resources,
        });
        index
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Output of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Encoded output document.
    pub bytes: Vec<u8>,
    /// Format of `bytes`.
    pub format: DocumentFormat,
}

impl ConversionResult {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
