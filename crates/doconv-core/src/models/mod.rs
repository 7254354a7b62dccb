//! Data models: configuration and the intermediate content model.

pub mod config;
pub mod content;

pub use config::{DoconvConfig, OfficeConfig, PdfConfig, TextStrategy, WatermarkConfig};
pub use content::{
    ConversionResult, DocumentFormat, EmbeddedResource, IntermediateContent, SourceDocument, Unit,
};
