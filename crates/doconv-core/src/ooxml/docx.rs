//! WordprocessingML reading and writing.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use super::package::{self, PackageReader, PackageWriter, xml_error, xml_text};
use super::templates::{self, CT_CORE_PROPERTIES, CT_DOCUMENT, NS_WORDPROCESSING, XML_DECLARATION};
use crate::error::{EncodingError, ParseError};
use crate::models::{DocumentFormat, EmbeddedResource, OfficeConfig, Unit};
use crate::pipeline::{DocumentReader, DocumentWriter, UnitSink, UnitSource, expect_next_index};
use crate::progress::UnitKind;

const DOCUMENT_PART: &str = "word/document.xml";
const MEDIA_PREFIX: &str = "word/media/";

/// Reads a DOCX package as a single section unit.
#[derive(Debug, Clone, Default)]
pub struct DocxReader {
    extract_media: bool,
}

impl DocxReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &OfficeConfig) -> Self {
        Self {
            extract_media: config.extract_media,
        }
    }

    /// Collect `word/media/` parts as embedded resources.
    pub fn with_media(mut self, extract: bool) -> Self {
        self.extract_media = extract;
        self
    }
}

impl DocumentReader for DocxReader {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Docx
    }

    fn unit_kind(&self) -> UnitKind {
        UnitKind::Section
    }

    fn open<'a>(&self, bytes: &'a [u8]) -> Result<Box<dyn UnitSource + 'a>, ParseError> {
        let mut package = PackageReader::open(bytes)?;
        let xml = package.read_part(DOCUMENT_PART)?;
        let text = document_text(&xml)?;

        let resources = if self.extract_media {
            let mut media: Vec<String> = package
                .part_names()
                .into_iter()
                .filter(|name| name.starts_with(MEDIA_PREFIX) && !name.ends_with('/'))
                .collect();
            media.sort();
            media
                .into_iter()
                .map(|name| {
                    let data = package.read_part(&name)?;
                    Ok(package::media_resource(&name, data))
                })
                .collect::<Result<Vec<EmbeddedResource>, ParseError>>()?
        } else {
            Vec::new()
        };

        debug!(
            "DOCX body: {} chars, {} media parts",
            text.len(),
            resources.len()
        );
        Ok(Box::new(DocxSource {
            unit: Some(Unit {
                index: 1,
                runs: vec![text],
                resources,
            }),
        }))
    }
}

struct DocxSource {
    unit: Option<Unit>,
}

impl UnitSource for DocxSource {
    fn unit_count(&self) -> u32 {
        1
    }

    fn read_unit(&mut self, index: u32) -> Result<Unit, ParseError> {
        match (index, self.unit.take()) {
            (1, Some(unit)) => Ok(unit),
            _ => Err(ParseError::MissingPart(format!(
                "{} section {}",
                DOCUMENT_PART, index
            ))),
        }
    }
}

/// Body text with markup stripped: one line per paragraph, tabs and breaks
/// kept as whitespace.
fn document_text(xml: &[u8]) -> Result<String, ParseError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" | b"ptab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| xml_error(DOCUMENT_PART, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(DOCUMENT_PART, e)),
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}

/// Writes units into the body of a DOCX package, separated by page breaks.
#[derive(Debug, Clone, Default)]
pub struct DocxWriter;

impl DocxWriter {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentWriter for DocxWriter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Docx
    }

    fn unit_kind(&self) -> UnitKind {
        UnitKind::Section
    }

    fn begin(&self, unit_count: u32) -> Box<dyn UnitSink> {
        debug!("Starting DOCX output for {} units", unit_count);
        Box::new(DocxSink {
            body: String::new(),
            written: 0,
        })
    }
}

struct DocxSink {
    body: String,
    written: u32,
}

impl UnitSink for DocxSink {
    fn write_unit(&mut self, unit: &Unit) -> Result<(), EncodingError> {
        expect_next_index(unit, self.written)?;

        if self.written > 0 {
            self.body
                .push_str(r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#);
        }

        let text = unit.text();
        let mut lines = text.lines().peekable();
        if lines.peek().is_none() {
            self.body.push_str("<w:p/>");
        }
        for line in lines {
            if line.is_empty() {
                self.body.push_str("<w:p/>");
            } else {
                self.body.push_str(&format!(
                    r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
                    xml_text(line)
                ));
            }
        }

        self.written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncodingError> {
        let document = format!(
            concat!(
                r#"{decl}<w:document xmlns:w="{ns}"><w:body>{body}"#,
                r#"<w:sectPr><w:pgSz w:w="12240" w:h="15840"/>"#,
                r#"<w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720" w:gutter="0"/>"#,
                r#"</w:sectPr></w:body></w:document>"#,
            ),
            decl = XML_DECLARATION,
            ns = NS_WORDPROCESSING,
            body = self.body,
        );

        let mut writer = PackageWriter::new();
        writer.add_part(
            "[Content_Types].xml",
            templates::content_types(&[
                (DOCUMENT_PART.to_string(), CT_DOCUMENT),
                ("docProps/core.xml".to_string(), CT_CORE_PROPERTIES),
            ])
            .as_bytes(),
        )?;
        writer.add_part(
            "_rels/.rels",
            templates::relationships(&[
                (
                    "rId1".to_string(),
                    package::REL_OFFICE_DOCUMENT,
                    DOCUMENT_PART.to_string(),
                ),
                (
                    "rId2".to_string(),
                    package::REL_CORE_PROPERTIES,
                    "docProps/core.xml".to_string(),
                ),
            ])
            .as_bytes(),
        )?;
        writer.add_part(DOCUMENT_PART, document.as_bytes())?;
        writer.add_part("docProps/core.xml", templates::core_properties().as_bytes())?;

        let bytes = writer.finish()?;
        debug!("Wrote DOCX: {} sections, {} bytes", self.written, bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntermediateContent;
    use crate::test_support::{docx_with_paragraphs, zip_package};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_paragraphs_become_lines() {
        let bytes = docx_with_paragraphs(&["First paragraph", "Second &amp; last"]);
        let content = DocxReader::new().read(&bytes).unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content.units()[0].index, 1);
        assert_eq!(
            content.units()[0].text(),
            "First paragraph\nSecond & last"
        );
    }

    #[test]
    fn test_tabs_and_breaks_kept_as_whitespace() {
        let xml = format!(
            r#"<w:document xmlns:w="{NS_WORDPROCESSING}"><w:body><w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p><w:p/></w:body></w:document>"#
        );
        assert_eq!(document_text(xml.as_bytes()).unwrap(), "a\tb\nc\n");
    }

    #[test]
    fn test_missing_document_part() {
        let bytes = zip_package(&[("[Content_Types].xml", "<Types/>")]);
        let err = DocxReader::new().read(&bytes).unwrap_err();
        assert!(matches!(err, ParseError::MissingPart(part) if part == DOCUMENT_PART));
    }

    #[test]
    fn test_corrupt_container() {
        let err = DocxReader::new().read(b"PK\x03\x04broken").unwrap_err();
        assert!(matches!(err, ParseError::Archive(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let bytes = zip_package(&[(DOCUMENT_PART, "<w:document><w:body></w:document>")]);
        let err = DocxReader::new().read(&bytes).unwrap_err();
        assert!(matches!(err, ParseError::Xml { .. }));
    }

    #[test]
    fn test_media_collected_on_request() {
        let bytes = zip_package(&[
            (DOCUMENT_PART, "<w:document/>"),
            ("word/media/image1.emf", "not really an image"),
        ]);
        let without = DocxReader::new().read(&bytes).unwrap();
        assert!(without.units()[0].resources.is_empty());

        let with = DocxReader::new().with_media(true).read(&bytes).unwrap();
        let resources = &with.units()[0].resources;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].media_type, "image/x-emf");
        assert_eq!(resources[0].width, None);
    }

    #[test]
    fn test_writer_output_reads_back() {
        let content = IntermediateContent::from_units(vec![
            Unit::with_text(1, "Page one\nsecond line"),
            Unit::with_text(2, "Page <two> & more"),
        ])
        .unwrap();
        let bytes = DocxWriter::new().write(&content).unwrap();

        assert_eq!(DocumentFormat::sniff(&bytes), Some(DocumentFormat::Docx));
        let read = DocxReader::new().read(&bytes).unwrap();
        assert_eq!(
            read.units()[0].text(),
            "Page one\nsecond line\n\n\nPage <two> & more"
        );
    }

    #[test]
    fn test_writer_emits_required_parts() {
        let content = IntermediateContent::from_units(vec![Unit::with_text(1, "x")]).unwrap();
        let bytes = DocxWriter::new().write(&content).unwrap();
        let mut package = PackageReader::open(&bytes).unwrap();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            DOCUMENT_PART,
            "docProps/core.xml",
        ] {
            assert!(package.has_part(part), "missing {part}");
        }
        let targets: Vec<String> = package
            .relationships("")
            .unwrap()
            .into_iter()
            .map(|rel| rel.target)
            .collect();
        assert_eq!(targets, vec![DOCUMENT_PART, "docProps/core.xml"]);
    }

    #[test]
    fn test_page_break_between_units() {
        let content = IntermediateContent::from_units(vec![
            Unit::with_text(1, "a"),
            Unit::with_text(2, "b"),
        ])
        .unwrap();
        let bytes = DocxWriter::new().write(&content).unwrap();
        let mut package = PackageReader::open(&bytes).unwrap();
        let xml = String::from_utf8(package.read_part(DOCUMENT_PART).unwrap()).unwrap();
        assert_eq!(xml.matches(r#"w:type="page""#).count(), 1);
    }
}
