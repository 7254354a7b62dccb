//! Core library for client-side document conversion.
//!
//! This crate provides:
//! - PDF text extraction and text-to-PDF rendering on top of lopdf
//! - DOCX and PPTX package reading and writing
//! - PDF watermark removal over the object graph
//! - A conversion orchestrator with per-unit progress events and cancellation

pub mod convert;
pub mod error;
pub mod models;
pub mod ooxml;
pub mod pdf;
pub mod pipeline;
pub mod progress;

#[cfg(test)]
mod test_support;

pub use convert::{
    ConversionRequest, Converter, DocumentInfo, OperationKind, Plan, convert, convert_str, inspect,
};
pub use error::{ConversionError, EncodingError, ParseError, Result};
pub use models::{
    ConversionResult, DoconvConfig, DocumentFormat, EmbeddedResource, IntermediateContent,
    OfficeConfig, PdfConfig, SourceDocument, TextStrategy, Unit, WatermarkConfig,
};
pub use ooxml::{DocxReader, DocxWriter, PptxReader, PptxWriter};
pub use pdf::{PdfReader, PdfWriter, RemovalReport, WatermarkKind, WatermarkRemover};
pub use pipeline::{DocumentReader, DocumentWriter, UnitSink, UnitSource};
pub use progress::{
    CancellationFlag, ChannelProgress, NoopProgress, ProgressEvent, ProgressSink, Stage, UnitKind,
    UnitPosition,
};
