//! Conversion orchestrator.
//!
//! A request names one of five operations. Each operation either pairs a
//! format reader with a format writer, or runs the watermark remover; the
//! orchestrator drives that plan unit by unit, reporting progress and checking
//! for cancellation between units.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConversionError, Result};
use crate::models::{
    ConversionResult, DoconvConfig, DocumentFormat, IntermediateContent, SourceDocument,
};
use crate::ooxml::{DocxReader, DocxWriter, PptxReader, PptxWriter};
use crate::pdf::{PdfReader, PdfWriter, WatermarkRemover};
use crate::pipeline::{DocumentReader, DocumentWriter};
use crate::progress::{CancellationFlag, PipelineContext, ProgressSink, Stage, UnitKind};

/// The operations the pipeline supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    PdfToWord,
    WordToPdf,
    PdfToPpt,
    PptToPdf,
    PdfWatermark,
}

/// How an operation is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Read the source into the content model, then write the target.
    Transcode {
        from: DocumentFormat,
        to: DocumentFormat,
    },
    /// Clean the PDF object graph in place.
    RemoveWatermark,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::PdfToWord,
        OperationKind::WordToPdf,
        OperationKind::PdfToPpt,
        OperationKind::PptToPdf,
        OperationKind::PdfWatermark,
    ];

    /// Wire identifier, e.g. `pdf-to-word`.
    pub fn id(self) -> &'static str {
        match self {
            OperationKind::PdfToWord => "pdf-to-word",
            OperationKind::WordToPdf => "word-to-pdf",
            OperationKind::PdfToPpt => "pdf-to-ppt",
            OperationKind::PptToPdf => "ppt-to-pdf",
            OperationKind::PdfWatermark => "pdf-watermark",
        }
    }

    pub fn source_format(self) -> DocumentFormat {
        match self {
            OperationKind::WordToPdf => DocumentFormat::Docx,
            OperationKind::PptToPdf => DocumentFormat::Pptx,
            OperationKind::PdfToWord | OperationKind::PdfToPpt | OperationKind::PdfWatermark => {
                DocumentFormat::Pdf
            }
        }
    }

    pub fn target_format(self) -> DocumentFormat {
        match self {
            OperationKind::PdfToWord => DocumentFormat::Docx,
            OperationKind::PdfToPpt => DocumentFormat::Pptx,
            OperationKind::WordToPdf | OperationKind::PptToPdf | OperationKind::PdfWatermark => {
                DocumentFormat::Pdf
            }
        }
    }

    pub fn plan(self) -> Plan {
        match self {
            OperationKind::PdfWatermark => Plan::RemoveWatermark,
            _ => Plan::Transcode {
                from: self.source_format(),
                to: self.target_format(),
            },
        }
    }
}

impl FromStr for OperationKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        OperationKind::ALL
            .into_iter()
            .find(|op| op.id() == s)
            .ok_or_else(|| ConversionError::UnsupportedOperation(s.to_string()))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A source document paired with the operation to run on it.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub document: SourceDocument,
    pub operation: OperationKind,
}

impl ConversionRequest {
    pub fn new(document: SourceDocument, operation: OperationKind) -> Self {
        Self {
            document,
            operation,
        }
    }

    /// Wrap raw bytes, declaring them as the operation's source format.
    pub fn from_bytes(bytes: Vec<u8>, operation: OperationKind) -> Self {
        Self::new(
            SourceDocument::new(bytes, operation.source_format()),
            operation,
        )
    }

    /// Check the request before any reader runs.
    ///
    /// Bytes that sniff as a different known format are rejected even when
    /// the declared format matches; unrecognizable bytes are left for the
    /// reader to reject with a parse error.
    pub fn validate(&self) -> Result<()> {
        if self.document.is_empty() {
            return Err(ConversionError::EmptyInput);
        }

        let expected = self.operation.source_format();
        let declared = self.document.format();
        let actual = DocumentFormat::sniff(self.document.bytes()).unwrap_or(declared);
        if declared != expected || actual != expected {
            return Err(ConversionError::UnsupportedOperation(format!(
                "{} expects {} input, got {}",
                self.operation, expected, actual
            )));
        }
        Ok(())
    }
}

/// Format and size of a document, without converting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub format: DocumentFormat,
    pub unit_kind: UnitKind,
    pub units: u32,
}

/// Runs conversion requests with a fixed configuration.
///
/// A converter holds no per-request state, so one instance can serve
/// concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    config: DoconvConfig,
}

impl Converter {
    pub fn new(config: DoconvConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DoconvConfig {
        &self.config
    }

    /// Run a request to completion.
    pub fn convert(
        &self,
        request: &ConversionRequest,
        progress: &dyn ProgressSink,
    ) -> Result<ConversionResult> {
        self.execute(request, &mut PipelineContext::new(progress, None))
    }

    /// Run a request that stops at the next unit boundary once `cancel` is set.
    pub fn convert_cancellable(
        &self,
        request: &ConversionRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> Result<ConversionResult> {
        self.execute(request, &mut PipelineContext::new(progress, Some(cancel)))
    }

    /// Run a request on a blocking worker, streaming progress through a
    /// channel sink.
    #[cfg(feature = "native")]
    pub async fn convert_async(
        &self,
        request: ConversionRequest,
        progress: crate::progress::ChannelProgress,
        cancel: Option<CancellationFlag>,
    ) -> Result<ConversionResult> {
        let converter = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut ctx = PipelineContext::new(&progress, cancel.as_ref());
            converter.execute(&request, &mut ctx)
        })
        .await
        .map_err(|e| ConversionError::Worker(e.to_string()))?
    }

    /// Detect a document's format and count its units.
    pub fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo> {
        if bytes.is_empty() {
            return Err(ConversionError::EmptyInput);
        }
        let format = DocumentFormat::sniff(bytes).ok_or_else(|| {
            ConversionError::UnsupportedOperation("unrecognized document format".to_string())
        })?;
        let reader = self.reader(format);
        let source = reader.open(bytes)?;
        Ok(DocumentInfo {
            format,
            unit_kind: reader.unit_kind(),
            units: source.unit_count(),
        })
    }

    fn execute(
        &self,
        request: &ConversionRequest,
        ctx: &mut PipelineContext<'_>,
    ) -> Result<ConversionResult> {
        request.validate()?;
        let operation = request.operation;
        let bytes = request.document.bytes();
        info!("Starting {} ({} bytes)", operation, bytes.len());
        ctx.stage(Stage::Starting);

        let output = match operation.plan() {
            Plan::Transcode { from, to } => self.transcode(bytes, from, to, ctx)?,
            Plan::RemoveWatermark => self.remove_watermark(bytes, ctx)?,
        };

        info!("Finished {}: {} bytes", operation, output.len());
        Ok(ConversionResult {
            bytes: output,
            format: operation.target_format(),
        })
    }

    fn transcode(
        &self,
        bytes: &[u8],
        from: DocumentFormat,
        to: DocumentFormat,
        ctx: &mut PipelineContext<'_>,
    ) -> Result<Vec<u8>> {
        let reader = self.reader(from);
        let writer = self.writer(to);
        debug!("Transcoding {} -> {}", reader.format(), writer.format());

        ctx.stage(Stage::Loading);
        let mut source = reader.open(bytes)?;
        let total = source.unit_count();
        debug!("Source has {} {:?} unit(s)", total, reader.unit_kind());

        let mut content = IntermediateContent::new();
        for index in 1..=total {
            ctx.unit(Stage::Reading, reader.unit_kind(), index, total)?;
            let unit = source.read_unit(index)?;
            content.push(unit.runs, unit.resources);
        }

        let mut sink = writer.begin(total);
        for unit in content.units() {
            ctx.unit(Stage::Writing, writer.unit_kind(), unit.index, total)?;
            sink.write_unit(unit)?;
        }

        ctx.stage(Stage::Saving);
        Ok(sink.finish()?)
    }

    fn remove_watermark(&self, bytes: &[u8], ctx: &mut PipelineContext<'_>) -> Result<Vec<u8>> {
        let remover = WatermarkRemover::from_config(&self.config.watermark);

        ctx.stage(Stage::Loading);
        let loaded = remover.load(bytes)?;

        ctx.stage(Stage::Scanning);
        let mut scanned = loaded.scan();

        let total = scanned.page_count();
        for page in 1..=total {
            ctx.unit(Stage::Cleaning, UnitKind::Page, page, total)?;
            scanned.clean_page(page)?;
        }

        ctx.stage(Stage::Saving);
        let (output, report) = scanned.save()?;
        debug!(
            "Watermark report: {} removal(s) on {} page(s)",
            report.total(),
            report.pages_changed()
        );
        Ok(output)
    }

    fn reader(&self, format: DocumentFormat) -> Box<dyn DocumentReader> {
        match format {
            DocumentFormat::Pdf => Box::new(PdfReader::from_config(&self.config.pdf)),
            DocumentFormat::Docx => Box::new(DocxReader::from_config(&self.config.office)),
            DocumentFormat::Pptx => Box::new(PptxReader::from_config(&self.config.office)),
        }
    }

    fn writer(&self, format: DocumentFormat) -> Box<dyn DocumentWriter> {
        match format {
            DocumentFormat::Pdf => Box::new(PdfWriter::from_config(&self.config.pdf)),
            DocumentFormat::Docx => Box::new(DocxWriter::new()),
            DocumentFormat::Pptx => Box::new(PptxWriter::from_config(&self.config.office)),
        }
    }
}

/// Convert with the default configuration.
pub fn convert(
    document: SourceDocument,
    operation: OperationKind,
    progress: &dyn ProgressSink,
) -> Result<ConversionResult> {
    Converter::default().convert(&ConversionRequest::new(document, operation), progress)
}

/// Convert using a wire operation identifier such as `pdf-to-ppt`.
///
/// An unknown identifier fails before anything else happens.
pub fn convert_str(
    document: SourceDocument,
    operation: &str,
    progress: &dyn ProgressSink,
) -> Result<ConversionResult> {
    let operation: OperationKind = operation.parse()?;
    convert(document, operation, progress)
}

/// Detect a document's format and count its units with the default
/// configuration.
pub fn inspect(bytes: &[u8]) -> Result<DocumentInfo> {
    Converter::default().inspect(bytes)
}
