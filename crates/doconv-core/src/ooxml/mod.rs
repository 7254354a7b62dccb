//! DOCX and PPTX packages: zip containers of XML parts.

mod docx;
pub(crate) mod package;
mod pptx;
mod templates;

pub use docx::{DocxReader, DocxWriter};
pub use pptx::{PptxReader, PptxWriter};
