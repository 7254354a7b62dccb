//! Reader and writer seams of the conversion pipeline.
//!
//! Readers open a container and hand out units one at a time; writers accept
//! units one at a time and serialize at the end. The orchestrator sits between
//! the two so it can report progress per unit and keep units in index order.

use crate::error::{EncodingError, ParseError};
use crate::models::{DocumentFormat, IntermediateContent, Unit};
use crate::progress::UnitKind;

/// Per-format extractor producing the intermediate content model.
pub trait DocumentReader {
    /// Format this reader accepts.
    fn format(&self) -> DocumentFormat;

    /// What one unit of this format is.
    fn unit_kind(&self) -> UnitKind;

    /// Parse the container and prepare unit extraction.
    fn open<'a>(&self, bytes: &'a [u8]) -> Result<Box<dyn UnitSource + 'a>, ParseError>;

    /// Read every unit without progress reporting.
    fn read(&self, bytes: &[u8]) -> Result<IntermediateContent, ParseError> {
        let mut source = self.open(bytes)?;
        let mut content = IntermediateContent::new();
        for index in 1..=source.unit_count() {
            let unit = source.read_unit(index)?;
            content.push(unit.runs, unit.resources);
        }
        Ok(content)
    }
}

/// An opened source document.
pub trait UnitSource {
    /// Number of units; never zero for a successfully opened source.
    fn unit_count(&self) -> u32;

    /// Extract unit `index` (1-based). Called in increasing index order.
    fn read_unit(&mut self, index: u32) -> Result<Unit, ParseError>;
}

/// Per-format encoder consuming the intermediate content model.
pub trait DocumentWriter {
    /// Format this writer produces.
    fn format(&self) -> DocumentFormat;

    /// What one unit becomes in the output.
    fn unit_kind(&self) -> UnitKind;

    /// Start a new output document that will receive `unit_count` units.
    fn begin(&self, unit_count: u32) -> Box<dyn UnitSink>;

    /// Encode a complete content model without progress reporting.
    fn write(&self, content: &IntermediateContent) -> Result<Vec<u8>, EncodingError> {
        let mut sink = self.begin(content.len() as u32);
        for unit in content.units() {
            sink.write_unit(unit)?;
        }
        sink.finish()
    }
}

/// An output document under construction.
pub trait UnitSink {
    /// Append the next unit. Units arrive in index order.
    fn write_unit(&mut self, unit: &Unit) -> Result<(), EncodingError>;

    /// Serialize the document.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncodingError>;
}

/// Reject a unit whose index does not follow the previous one.
pub(crate) fn expect_next_index(unit: &Unit, written: u32) -> Result<(), EncodingError> {
    if unit.index != written + 1 {
        return Err(EncodingError::InvalidContent(format!(
            "unit {} arrived after unit {}",
            unit.index, written
        )));
    }
    Ok(())
}
