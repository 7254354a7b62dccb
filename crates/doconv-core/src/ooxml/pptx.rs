//! PresentationML reading and writing.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, trace};

use super::package::{self, PackageReader, PackageWriter, xml_error, xml_text};
use super::templates::{
    self, CT_CORE_PROPERTIES, CT_PRESENTATION, CT_SLIDE, CT_SLIDE_LAYOUT, CT_SLIDE_MASTER,
    CT_THEME, NS_DRAWING, NS_PRESENTATION, NS_RELATIONSHIPS, XML_DECLARATION,
};
use crate::error::{EncodingError, ParseError};
use crate::models::{DocumentFormat, OfficeConfig, Unit};
use crate::pipeline::{DocumentReader, DocumentWriter, UnitSink, UnitSource, expect_next_index};
use crate::progress::UnitKind;

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const SLIDE_PREFIX: &str = "ppt/slides/slide";

/// Text box offset from the slide's top-left corner (0.5in).
const TEXT_OFFSET_EMU: i64 = 457_200;

/// Reads a PPTX package into one unit per slide.
#[derive(Debug, Clone, Default)]
pub struct PptxReader {
    extract_media: bool,
}

impl PptxReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &OfficeConfig) -> Self {
        Self {
            extract_media: config.extract_media,
        }
    }

    /// Collect pictures referenced from each slide as embedded resources.
    pub fn with_media(mut self, extract: bool) -> Self {
        self.extract_media = extract;
        self
    }
}

impl DocumentReader for PptxReader {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pptx
    }

    fn unit_kind(&self) -> UnitKind {
        UnitKind::Slide
    }

    fn open<'a>(&self, bytes: &'a [u8]) -> Result<Box<dyn UnitSource + 'a>, ParseError> {
        let mut package = PackageReader::open(bytes)?;

        let mut slides = if package.has_part(PRESENTATION_PART) {
            presentation_order(&mut package)?
        } else {
            Vec::new()
        };
        if slides.is_empty() {
            slides = numeric_order(&package);
            trace!("No slide list in presentation, using part names");
        }
        if slides.is_empty() {
            return Err(ParseError::MissingPart(format!("{}1.xml", SLIDE_PREFIX)));
        }

        debug!("PPTX has {} slides", slides.len());
        Ok(Box::new(PptxSource {
            package,
            slides,
            extract_media: self.extract_media,
        }))
    }
}

struct PptxSource<'a> {
    package: PackageReader<'a>,
    slides: Vec<String>,
    extract_media: bool,
}

impl UnitSource for PptxSource<'_> {
    fn unit_count(&self) -> u32 {
        self.slides.len() as u32
    }

    fn read_unit(&mut self, index: u32) -> Result<Unit, ParseError> {
        let part = (index as usize)
            .checked_sub(1)
            .and_then(|i| self.slides.get(i))
            .ok_or_else(|| ParseError::MissingPart(format!("slide {}", index)))?
            .clone();

        let xml = self.package.read_part(&part)?;
        let text = slide_text(&part, &xml)?;

        let mut resources = Vec::new();
        if self.extract_media {
            for rel in self.package.relationships(&part)? {
                if rel.external || rel.rel_type != package::REL_IMAGE {
                    continue;
                }
                let data = self.package.read_part(&rel.target)?;
                resources.push(package::media_resource(&rel.target, data));
            }
        }

        trace!("Slide {} ({}): {} chars", index, part, text.len());
        Ok(Unit {
            index,
            runs: vec![text],
            resources,
        })
    }
}

/// Slide parts in `p:sldIdLst` order, resolved through the presentation's
/// relationships.
fn presentation_order(package: &mut PackageReader<'_>) -> Result<Vec<String>, ParseError> {
    let xml = package.read_part(PRESENTATION_PART)?;
    let rels = package.relationships(PRESENTATION_PART)?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut slides = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sldId" => {
                // the relationship id is the namespaced `id`, not the numeric one
                let rel_id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
                    .map(|a| a.unescape_value().map(Cow::into_owned))
                    .transpose()
                    .map_err(|err| xml_error(PRESENTATION_PART, err))?;
                let Some(rel_id) = rel_id else {
                    continue;
                };
                let rel = rels
                    .iter()
                    .find(|r| r.id == rel_id)
                    .ok_or_else(|| ParseError::MissingPart(format!("slide {}", rel_id)))?;
                slides.push(rel.target.clone());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PRESENTATION_PART, e)),
            _ => {}
        }
    }

    Ok(slides)
}

/// `ppt/slides/slideN.xml` parts sorted by N.
fn numeric_order(package: &PackageReader<'_>) -> Vec<String> {
    let mut numbered: Vec<(u32, String)> = package
        .part_names()
        .into_iter()
        .filter_map(|name| {
            let number = name
                .strip_prefix(SLIDE_PREFIX)?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((number, name))
        })
        .collect();
    numbered.sort();
    numbered.into_iter().map(|(_, name)| name).collect()
}

/// Text of every paragraph on a slide, joined with single spaces.
fn slide_text(part: &str, xml: &[u8]) -> Result<String, ParseError> {
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
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" {
                    current.push(' ');
                }
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| xml_error(part, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = std::mem::take(&mut current);
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(paragraph.trim().to_string());
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }

    Ok(paragraphs.join(" "))
}

/// Writes one slide per unit, each holding a single full-slide text box.
#[derive(Debug, Clone)]
pub struct PptxWriter {
    config: OfficeConfig,
}

impl PptxWriter {
    pub fn new() -> Self {
        Self::from_config(&OfficeConfig::default())
    }

    pub fn from_config(config: &OfficeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Default for PptxWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentWriter for PptxWriter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pptx
    }

    fn unit_kind(&self) -> UnitKind {
        UnitKind::Slide
    }

    fn begin(&self, unit_count: u32) -> Box<dyn UnitSink> {
        debug!("Starting PPTX output for {} slides", unit_count);
        Box::new(PptxSink {
            config: self.config.clone(),
            slides: Vec::with_capacity(unit_count as usize),
        })
    }
}

struct PptxSink {
    config: OfficeConfig,
    slides: Vec<String>,
}

impl PptxSink {
    fn slide_xml(&self, text: &str) -> String {
        let cx = self.config.slide_width * 9 / 10;
        let cy = self.config.slide_height * 9 / 10;
        let size = self.config.slide_font_size * 100;
        let color = xml_text(&self.config.slide_text_color);

        let mut paragraphs = String::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                paragraphs.push_str(&format!(r#"<a:p><a:endParaRPr lang="en-US" sz="{size}"/></a:p>"#));
            } else {
                paragraphs.push_str(&format!(
                    r#"<a:p><a:r><a:rPr lang="en-US" sz="{size}" dirty="0"><a:solidFill><a:srgbClr val="{color}"/></a:solidFill></a:rPr><a:t>{}</a:t></a:r></a:p>"#,
                    xml_text(line)
                ));
            }
        }
        if paragraphs.is_empty() {
            paragraphs.push_str(&format!(r#"<a:p><a:endParaRPr lang="en-US" sz="{size}"/></a:p>"#));
        }

        format!(
            concat!(
                r#"{decl}<p:sld xmlns:a="{a}" xmlns:r="{r}" xmlns:p="{p}"><p:cSld><p:spTree>"#,
                r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr>"#,
                r#"<p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>"#,
                r#"<p:sp><p:nvSpPr><p:cNvPr id="2" name="TextBox 1"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr>"#,
                r#"<p:spPr><a:xfrm><a:off x="{off}" y="{off}"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom><a:noFill/></p:spPr>"#,
                r#"<p:txBody><a:bodyPr wrap="square" rtlCol="0"><a:normAutofit/></a:bodyPr><a:lstStyle/>{paragraphs}</p:txBody></p:sp>"#,
                r#"</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#,
            ),
            decl = XML_DECLARATION,
            a = NS_DRAWING,
            r = NS_RELATIONSHIPS,
            p = NS_PRESENTATION,
            off = TEXT_OFFSET_EMU,
            cx = cx,
            cy = cy,
            paragraphs = paragraphs,
        )
    }

    fn presentation_xml(&self) -> String {
        let mut ids = String::new();
        for i in 0..self.slides.len() {
            // rId1 is the master and rId2 the theme
            ids.push_str(&format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, i + 3));
        }
        format!(
            concat!(
                r#"{decl}<p:presentation xmlns:a="{a}" xmlns:r="{r}" xmlns:p="{p}" saveSubsetFonts="1">"#,
                r#"<p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst>"#,
                r#"<p:sldIdLst>{ids}</p:sldIdLst>"#,
                r#"<p:sldSz cx="{cx}" cy="{cy}"/><p:notesSz cx="6858000" cy="9144000"/>"#,
                r#"</p:presentation>"#,
            ),
            decl = XML_DECLARATION,
            a = NS_DRAWING,
            r = NS_RELATIONSHIPS,
            p = NS_PRESENTATION,
            ids = ids,
            cx = self.config.slide_width,
            cy = self.config.slide_height,
        )
    }
}

impl UnitSink for PptxSink {
    fn write_unit(&mut self, unit: &Unit) -> Result<(), EncodingError> {
        expect_next_index(unit, self.slides.len() as u32)?;
        let xml = self.slide_xml(&unit.text());
        self.slides.push(xml);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncodingError> {
        let slide_count = self.slides.len();

        let mut overrides = vec![
            (PRESENTATION_PART.to_string(), CT_PRESENTATION),
            ("ppt/slideMasters/slideMaster1.xml".to_string(), CT_SLIDE_MASTER),
            ("ppt/slideLayouts/slideLayout1.xml".to_string(), CT_SLIDE_LAYOUT),
            ("ppt/theme/theme1.xml".to_string(), CT_THEME),
            ("docProps/core.xml".to_string(), CT_CORE_PROPERTIES),
        ];
        let mut presentation_rels = vec![
            (
                "rId1".to_string(),
                package::REL_SLIDE_MASTER,
                "slideMasters/slideMaster1.xml".to_string(),
            ),
            (
                "rId2".to_string(),
                package::REL_THEME,
                "theme/theme1.xml".to_string(),
            ),
        ];
        for n in 1..=slide_count {
            overrides.push((format!("{}{}.xml", SLIDE_PREFIX, n), CT_SLIDE));
            presentation_rels.push((
                format!("rId{}", n + 2),
                package::REL_SLIDE,
                format!("slides/slide{}.xml", n),
            ));
        }

        let mut writer = PackageWriter::new();
        writer.add_part(
            "[Content_Types].xml",
            templates::content_types(&overrides).as_bytes(),
        )?;
        writer.add_part(
            "_rels/.rels",
            templates::relationships(&[
                (
                    "rId1".to_string(),
                    package::REL_OFFICE_DOCUMENT,
                    PRESENTATION_PART.to_string(),
                ),
                (
                    "rId2".to_string(),
                    package::REL_CORE_PROPERTIES,
                    "docProps/core.xml".to_string(),
                ),
            ])
            .as_bytes(),
        )?;
        writer.add_part(PRESENTATION_PART, self.presentation_xml().as_bytes())?;
        writer.add_part(
            "ppt/_rels/presentation.xml.rels",
            templates::relationships(&presentation_rels).as_bytes(),
        )?;

        let layout_rel = templates::relationships(&[(
            "rId1".to_string(),
            package::REL_SLIDE_LAYOUT,
            "../slideLayouts/slideLayout1.xml".to_string(),
        )]);
        for (i, slide) in self.slides.iter().enumerate() {
            let n = i + 1;
            writer.add_part(&format!("{}{}.xml", SLIDE_PREFIX, n), slide.as_bytes())?;
            writer.add_part(
                &format!("ppt/slides/_rels/slide{}.xml.rels", n),
                layout_rel.as_bytes(),
            )?;
        }

        writer.add_part(
            "ppt/slideMasters/slideMaster1.xml",
            templates::slide_master().as_bytes(),
        )?;
        writer.add_part(
            "ppt/slideMasters/_rels/slideMaster1.xml.rels",
            templates::relationships(&[
                (
                    "rId1".to_string(),
                    package::REL_SLIDE_LAYOUT,
                    "../slideLayouts/slideLayout1.xml".to_string(),
                ),
                (
                    "rId2".to_string(),
                    package::REL_THEME,
                    "../theme/theme1.xml".to_string(),
                ),
            ])
            .as_bytes(),
        )?;
        writer.add_part(
            "ppt/slideLayouts/slideLayout1.xml",
            templates::slide_layout().as_bytes(),
        )?;
        writer.add_part(
            "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
            templates::relationships(&[(
                "rId1".to_string(),
                package::REL_SLIDE_MASTER,
                "../slideMasters/slideMaster1.xml".to_string(),
            )])
            .as_bytes(),
        )?;
        writer.add_part("ppt/theme/theme1.xml", templates::theme().as_bytes())?;
        writer.add_part("docProps/core.xml", templates::core_properties().as_bytes())?;

        let bytes = writer.finish()?;
        debug!("Wrote PPTX: {} slides, {} bytes", slide_count, bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntermediateContent;
    use crate::test_support::{pptx_with_slides, zip_package};
    use pretty_assertions::assert_eq;

    fn texts(content: &IntermediateContent) -> Vec<String> {
        content.units().iter().map(Unit::text).collect()
    }

    #[test]
    fn test_one_unit_per_slide_in_order() {
        let bytes = pptx_with_slides(&["Intro", "Middle", "End"]);
        let content = PptxReader::new().read(&bytes).unwrap();
        assert_eq!(texts(&content), vec!["Intro", "Middle", "End"]);
    }

    #[test]
    fn test_slide_list_order_wins_over_part_names() {
        let slide = |text: &str| {
            format!(
                r#"<p:sld xmlns:a="{NS_DRAWING}" xmlns:p="{NS_PRESENTATION}"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
            )
        };
        let presentation = format!(
            r#"<p:presentation xmlns:p="{NS_PRESENTATION}" xmlns:r="{NS_RELATIONSHIPS}"><p:sldIdLst><p:sldId id="256" r:id="rId7"/><p:sldId id="257" r:id="rId3"/></p:sldIdLst></p:presentation>"#
        );
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId3" Type="x" Target="slides/slide1.xml"/><Relationship Id="rId7" Type="x" Target="slides/slide2.xml"/></Relationships>"#;
        let first = slide("first part");
        let second = slide("second part");
        let bytes = zip_package(&[
            (PRESENTATION_PART, &presentation),
            ("ppt/_rels/presentation.xml.rels", rels),
            ("ppt/slides/slide1.xml", &first),
            ("ppt/slides/slide2.xml", &second),
        ]);

        let content = PptxReader::new().read(&bytes).unwrap();
        assert_eq!(texts(&content), vec!["second part", "first part"]);
    }

    #[test]
    fn test_numeric_fallback_order() {
        let slide = |text: &str| {
            format!(
                r#"<p:sld xmlns:a="{NS_DRAWING}" xmlns:p="{NS_PRESENTATION}"><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:sld>"#
            )
        };
        let (s2, s10, s1) = (slide("two"), slide("ten"), slide("one"));
        let bytes = zip_package(&[
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let content = PptxReader::new().read(&bytes).unwrap();
        assert_eq!(texts(&content), vec!["one", "two", "ten"]);
    }

    #[test]
    fn test_paragraphs_joined_with_spaces() {
        let xml = format!(
            r#"<p:sld xmlns:a="{NS_DRAWING}" xmlns:p="{NS_PRESENTATION}"><p:sp><a:p><a:r><a:t>Title</a:t></a:r></a:p></p:sp><p:sp><a:p><a:r><a:t>Bullet</a:t></a:r><a:br/><a:r><a:t>one</a:t></a:r></a:p><a:p/></p:sp></p:sld>"#
        );
        assert_eq!(slide_text("s", xml.as_bytes()).unwrap(), "Title Bullet one");
    }

    #[test]
    fn test_listed_slide_missing() {
        let bytes = zip_package(&[
            (
                PRESENTATION_PART,
                r#"<p:presentation xmlns:p="p" xmlns:r="r"><p:sldIdLst><p:sldId id="256" r:id="rId1"/></p:sldIdLst></p:presentation>"#,
            ),
            (
                "ppt/_rels/presentation.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Type="x" Target="slides/slide1.xml"/></Relationships>"#,
            ),
        ]);
        let err = PptxReader::new().read(&bytes).unwrap_err();
        assert!(matches!(err, ParseError::MissingPart(part) if part == "ppt/slides/slide1.xml"));
    }

    #[test]
    fn test_no_slides_is_error() {
        let bytes = zip_package(&[("ppt/presentation.xml", "<p:presentation xmlns:p=\"p\"/>")]);
        assert!(matches!(
            PptxReader::new().read(&bytes),
            Err(ParseError::MissingPart(_))
        ));
    }

    #[test]
    fn test_writer_output_reads_back() {
        let content = IntermediateContent::from_units(vec![
            Unit::with_text(1, "Alpha"),
            Unit::with_text(2, "Beta & <Gamma>"),
            Unit::with_text(3, ""),
        ])
        .unwrap();
        let bytes = PptxWriter::new().write(&content).unwrap();

        assert_eq!(DocumentFormat::sniff(&bytes), Some(DocumentFormat::Pptx));
        let read = PptxReader::new().read(&bytes).unwrap();
        assert_eq!(texts(&read), vec!["Alpha", "Beta & <Gamma>", ""]);
    }

    #[test]
    fn test_writer_emits_master_layout_and_theme() {
        let content = IntermediateContent::from_units(vec![Unit::with_text(1, "x")]).unwrap();
        let bytes = PptxWriter::new().write(&content).unwrap();
        let package = PackageReader::open(&bytes).unwrap();
        for part in [
            "[Content_Types].xml",
            "ppt/presentation.xml",
            "ppt/slides/slide1.xml",
            "ppt/slides/_rels/slide1.xml.rels",
            "ppt/slideMasters/slideMaster1.xml",
            "ppt/slideLayouts/slideLayout1.xml",
            "ppt/theme/theme1.xml",
        ] {
            assert!(package.has_part(part), "missing {part}");
        }
    }

    #[test]
    fn test_slide_uses_configured_font() {
        let config = OfficeConfig {
            slide_font_size: 20,
            slide_text_color: "FF0000".to_string(),
            ..OfficeConfig::default()
        };
        let content = IntermediateContent::from_units(vec![Unit::with_text(1, "Red")]).unwrap();
        let bytes = PptxWriter::from_config(&config).write(&content).unwrap();
        let mut package = PackageReader::open(&bytes).unwrap();
        let slide = String::from_utf8(package.read_part("ppt/slides/slide1.xml").unwrap()).unwrap();
        assert!(slide.contains(r#"sz="2000""#));
        assert!(slide.contains(r#"<a:srgbClr val="FF0000"/>"#));
    }
}
