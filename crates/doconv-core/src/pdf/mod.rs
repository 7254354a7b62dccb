//! PDF reading, writing and watermark removal on top of lopdf.

mod objects;
mod reader;
mod watermark;
mod writer;

pub use reader::PdfReader;
pub use watermark::{
    LoadedPdf, PageRemoval, RemovalReport, ScannedPdf, WatermarkKind, WatermarkRemover,
};
pub use writer::PdfWriter;
