//! PDF encoding of the intermediate content model.
//!
//! Each unit becomes exactly one page. Text is set in Helvetica with
//! WinAnsiEncoding and wrapped on word boundaries to the text width. Lines
//! past the bottom margin are clipped.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, StringFormat, dictionary};
use tracing::{debug, trace, warn};

use crate::error::EncodingError;
use crate::models::{DocumentFormat, PdfConfig, Unit};
use crate::pipeline::{DocumentWriter, UnitSink, expect_next_index};
use crate::progress::UnitKind;

/// Line height as a multiple of the font size.
const LEADING: f32 = 1.2;

/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Body lines reserved for the heading on the first page.
const HEADING_LINES: usize = 3;

/// Writes one PDF page per unit.
pub struct PdfWriter {
    config: PdfConfig,
}

impl PdfWriter {
    pub fn new() -> Self {
        Self::from_config(&PdfConfig::default())
    }

    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Draw `heading` at twice the body size above the first page's text.
    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.config.heading = Some(heading.into());
        self
    }
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentWriter for PdfWriter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn unit_kind(&self) -> UnitKind {
        UnitKind::Page
    }

    fn begin(&self, unit_count: u32) -> Box<dyn UnitSink> {
        debug!("Starting PDF output for {} units", unit_count);
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        Box::new(PdfSink {
            layout: PageLayout::new(&self.config),
            heading: self.config.heading.clone(),
            doc,
            pages_id,
            font_id,
            kids: Vec::new(),
            written: 0,
        })
    }
}

/// Page geometry derived from the configuration.
struct PageLayout {
    width: f32,
    height: f32,
    margin: f32,
    font_size: f32,
    chars_per_line: usize,
    lines_per_page: usize,
}

impl PageLayout {
    fn new(config: &PdfConfig) -> Self {
        let font_size = config.font_size.max(1.0);
        let text_width = (config.page_width - 2.0 * config.margin).max(font_size);
        let text_height = (config.page_height - 2.0 * config.margin).max(font_size);

        Self {
            width: config.page_width,
            height: config.page_height,
            margin: config.margin,
            font_size,
            chars_per_line: ((text_width / (font_size * AVG_GLYPH_WIDTH)) as usize).max(1),
            lines_per_page: ((text_height / (font_size * LEADING)) as usize).max(1),
        }
    }

    fn leading(&self) -> f32 {
        self.font_size * LEADING
    }

    /// Baseline of the first body line.
    fn top_baseline(&self) -> f32 {
        self.height - self.margin - self.font_size
    }
}

struct PdfSink {
    layout: PageLayout,
    heading: Option<String>,
    doc: Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    kids: Vec<Object>,
    written: u32,
}

impl PdfSink {
    fn add_page(&mut self, lines: &[String], heading: Option<&str>) -> Result<(), EncodingError> {
        let layout = &self.layout;
        let mut operations = Vec::new();
        let mut baseline = layout.top_baseline();

        if let Some(heading) = heading {
            let size = layout.font_size * 2.0;
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Real(size)]),
                Operation::new(
                    "Td",
                    vec![
                        Object::Real(layout.margin),
                        Object::Real(layout.height - layout.margin - size),
                    ],
                ),
                Operation::new("Tj", vec![pdf_string(heading)]),
                Operation::new("ET", vec![]),
            ]);
            baseline -= layout.leading() * HEADING_LINES as f32;
        }

        if !lines.is_empty() {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Real(layout.font_size)]),
                Operation::new("TL", vec![Object::Real(layout.leading())]),
                Operation::new("Td", vec![Object::Real(layout.margin), Object::Real(baseline)]),
            ]);
            for (i, line) in lines.iter().enumerate() {
                if i > 0 {
                    operations.push(Operation::new("T*", vec![]));
                }
                operations.push(Operation::new("Tj", vec![pdf_string(line)]));
            }
            operations.push(Operation::new("ET", vec![]));
        }

        let content = Content { operations }
            .encode()
            .map_err(|e| EncodingError::Pdf(e.to_string()))?;
        let content_id = self
            .doc
            .add_object(lopdf::Stream::new(dictionary! {}, content));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => self.font_id },
            },
        });
        self.kids.push(page_id.into());
        Ok(())
    }
}

impl UnitSink for PdfSink {
    fn write_unit(&mut self, unit: &Unit) -> Result<(), EncodingError> {
        expect_next_index(unit, self.written)?;

        let lines = wrap_text(&unit.text(), self.layout.chars_per_line);
        let heading = if unit.index == 1 {
            self.heading.take()
        } else {
            None
        };

        let capacity = if heading.is_some() {
            self.layout.lines_per_page.saturating_sub(HEADING_LINES).max(1)
        } else {
            self.layout.lines_per_page
        };

        let kept = capacity.min(lines.len());
        if kept < lines.len() {
            warn!(
                "Unit {} clipped: {} of {} line(s) do not fit on the page",
                unit.index,
                lines.len() - kept,
                lines.len()
            );
        }
        self.add_page(&lines[..kept], heading.as_deref())?;

        trace!("Unit {} set with {} line(s)", unit.index, kept);
        self.written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncodingError> {
        let mut sink = *self;
        let count = sink.kids.len() as i64;
        let media_box = vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(sink.layout.width),
            Object::Real(sink.layout.height),
        ];
        sink.doc.objects.insert(
            sink.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => sink.kids,
                "Count" => count,
                "MediaBox" => media_box,
            }),
        );

        let catalog_id = sink.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => sink.pages_id,
        });
        let info_id = sink.doc.add_object(dictionary! {
            "Producer" => Object::string_literal("doconv"),
        });
        sink.doc.trailer.set("Root", catalog_id);
        sink.doc.trailer.set("Info", info_id);
        sink.doc.compress();

        let mut buf = Vec::new();
        sink.doc
            .save_to(&mut buf)
            .map_err(|e| EncodingError::Pdf(e.to_string()))?;
        debug!("Wrote PDF: {} pages, {} bytes", count, buf.len());
        Ok(buf)
    }
}

/// Break text into lines of at most `width` characters on word boundaries.
///
/// Newlines in the input are kept as line breaks; words longer than a line
/// are split.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        let mut line_len = 0;
        for word in paragraph.split_whitespace() {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(width) {
                let piece_len = piece.len();
                if line_len > 0 && line_len + 1 + piece_len > width {
                    lines.push(std::mem::take(&mut line));
                    line_len = 0;
                }
                if line_len > 0 {
                    line.push(' ');
                    line_len += 1;
                }
                line.extend(piece);
                line_len += piece_len;
            }
        }
        lines.push(line);
    }
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

fn pdf_string(text: &str) -> Object {
    Object::String(encode_win_ansi(text), StringFormat::Literal)
}

/// Encode text for a WinAnsiEncoding font. Unmappable characters become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}' => c as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntermediateContent;
    use crate::pdf::PdfReader;
    use crate::pipeline::DocumentReader;
    use pretty_assertions::assert_eq;

    fn content(texts: &[&str]) -> IntermediateContent {
        let units = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Unit::with_text(i as u32 + 1, *t))
            .collect();
        IntermediateContent::from_units(units).unwrap()
    }

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).unwrap().get_pages().len()
    }

    #[test]
    fn test_one_page_per_unit() {
        let bytes = PdfWriter::new()
            .write(&content(&["First page", "Second page", "Third page"]))
            .unwrap();
        assert_eq!(page_count(&bytes), 3);

        let read = PdfReader::new().read(&bytes).unwrap();
        let texts: Vec<String> = read.units().iter().map(Unit::text).collect();
        assert_eq!(texts, vec!["First page", "Second page", "Third page"]);
    }

    #[test]
    fn test_long_unit_clipped_to_one_page() {
        let long = vec!["overflow"; 2000].join(" ");
        let bytes = PdfWriter::new()
            .write(&content(&[long.as_str(), "Tail"]))
            .unwrap();
        assert_eq!(page_count(&bytes), 2);

        let read = PdfReader::new().read(&bytes).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.units()[1].text(), "Tail");

        let first = read.units()[0].text();
        assert!(first.starts_with("overflow overflow"));
        assert!(first.split_whitespace().count() < 2000);
    }

    #[test]
    fn test_empty_unit_still_gets_a_page() {
        let bytes = PdfWriter::new().write(&content(&["", "x"])).unwrap();
        assert_eq!(page_count(&bytes), 2);
    }

    #[test]
    fn test_heading_only_on_first_page() {
        let bytes = PdfWriter::new()
            .with_heading("Report")
            .write(&content(&["body one", "body two"]))
            .unwrap();
        let read = PdfReader::new().read(&bytes).unwrap();
        assert_eq!(read.units()[0].text(), "Report body one");
        assert_eq!(read.units()[1].text(), "body two");
    }

    #[test]
    fn test_out_of_order_unit_rejected() {
        let mut sink = PdfWriter::new().begin(2);
        let err = sink.write_unit(&Unit::with_text(2, "early")).unwrap_err();
        assert!(matches!(err, EncodingError::InvalidContent(_)));
    }

    #[test]
    fn test_wrap_text_respects_width_and_newlines() {
        let lines = wrap_text("aaa bbb ccc\n\nddd", 7);
        assert_eq!(lines, vec!["aaa bbb", "ccc", "", "ddd"]);
    }

    #[test]
    fn test_wrap_text_splits_long_words() {
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn test_encode_win_ansi() {
        assert_eq!(encode_win_ansi("a€ä中"), vec![b'a', 0x80, 0xE4, b'?']);
    }
}
