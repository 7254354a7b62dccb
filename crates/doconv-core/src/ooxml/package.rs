//! Open Packaging Conventions plumbing: zip parts, relationships, XML text.

use std::borrow::Cow;
use std::io::{Cursor, Read, Write};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::trace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EncodingError, ParseError};
use crate::models::EmbeddedResource;

pub(crate) const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub(crate) const REL_CORE_PROPERTIES: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";
pub(crate) const REL_SLIDE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
pub(crate) const REL_SLIDE_LAYOUT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout";
pub(crate) const REL_SLIDE_MASTER: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster";
pub(crate) const REL_THEME: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme";
pub(crate) const REL_IMAGE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

/// Read access to the parts of a zip package held in memory.
pub(crate) struct PackageReader<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> PackageReader<'a> {
    pub(crate) fn open(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ParseError::Archive(e.to_string()))?;
        trace!("Opened package with {} entries", archive.len());
        Ok(Self { archive })
    }

    pub(crate) fn has_part(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    pub(crate) fn part_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    /// Raw bytes of a part; `MissingPart` when the package has no such entry.
    pub(crate) fn read_part(&mut self, name: &str) -> Result<Vec<u8>, ParseError> {
        let mut file = self.archive.by_name(name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => ParseError::MissingPart(name.to_string()),
            other => ParseError::Archive(other.to_string()),
        })?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| ParseError::Archive(format!("{}: {}", name, e)))?;
        Ok(data)
    }

    /// Relationships declared by `part`, with targets resolved to part names.
    /// A part without a relationships part has none.
    pub(crate) fn relationships(&mut self, part: &str) -> Result<Vec<Relationship>, ParseError> {
        let rels_name = rels_part_for(part);
        if !self.has_part(&rels_name) {
            return Ok(Vec::new());
        }
        let data = self.read_part(&rels_name)?;
        parse_relationships(&rels_name, part, &data)
    }
}

/// A single relationship from a source part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Absolute part name, without a leading slash.
    pub target: String,
    pub external: bool,
}

fn parse_relationships(
    rels_name: &str,
    source: &str,
    data: &[u8],
) -> Result<Vec<Relationship>, ParseError> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut rels = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let attr = |key: &str| -> Result<String, ParseError> {
                    match e.try_get_attribute(key) {
                        Ok(Some(a)) => a
                            .unescape_value()
                            .map(Cow::into_owned)
                            .map_err(|err| xml_error(rels_name, err)),
                        Ok(None) => Ok(String::new()),
                        Err(err) => Err(xml_error(rels_name, err)),
                    }
                };
                let external = attr("TargetMode")? == "External";
                let target = attr("Target")?;
                rels.push(Relationship {
                    id: attr("Id")?,
                    rel_type: attr("Type")?,
                    target: if external {
                        target
                    } else {
                        resolve_target(source, &target)
                    },
                    external,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(rels_name, e)),
            _ => {}
        }
    }

    Ok(rels)
}

/// `ppt/slides/slide1.xml` -> `ppt/slides/_rels/slide1.xml.rels`.
pub(crate) fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target against the part that declares it.
pub(crate) fn resolve_target(source: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = source.split('/').collect();
    segments.pop();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub(crate) fn xml_error(part: &str, err: impl std::fmt::Display) -> ParseError {
    ParseError::Xml {
        part: part.to_string(),
        reason: err.to_string(),
    }
}

/// Escape text for element content, dropping characters XML 1.0 forbids.
pub(crate) fn xml_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..))
        .collect();
    quick_xml::escape::escape(cleaned.as_str()).into_owned()
}

/// Media type guessed from a part's extension.
pub(crate) fn media_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "emf" => "image/x-emf",
        "wmf" => "image/x-wmf",
        _ => "application/octet-stream",
    }
}

/// Wrap a media part as an embedded resource, probing raster dimensions.
pub(crate) fn media_resource(name: &str, data: Vec<u8>) -> EmbeddedResource {
    let dimensions = image::ImageReader::new(Cursor::new(&data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok());
    EmbeddedResource {
        media_type: media_type_for(name).to_string(),
        width: dimensions.map(|(w, _)| w),
        height: dimensions.map(|(_, h)| h),
        data,
    }
}

/// Builds a zip package part by part.
pub(crate) struct PackageWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl PackageWriter {
    pub(crate) fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    pub(crate) fn add_part(&mut self, name: &str, data: &[u8]) -> Result<(), EncodingError> {
        self.zip.start_file(name, self.options)?;
        self.zip.write_all(data)?;
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>, EncodingError> {
        Ok(self.zip.finish()?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::zip_package;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rels_part_for() {
        assert_eq!(
            rels_part_for("ppt/slides/slide1.xml"),
            "ppt/slides/_rels/slide1.xml.rels"
        );
        assert_eq!(rels_part_for("doc.xml"), "_rels/doc.xml.rels");
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("ppt/presentation.xml", "slides/slide2.xml"),
            "ppt/slides/slide2.xml"
        );
        assert_eq!(
            resolve_target("ppt/slides/slide1.xml", "../media/image1.png"),
            "ppt/media/image1.png"
        );
        assert_eq!(resolve_target("ppt/slides/slide1.xml", "/ppt/x.xml"), "ppt/x.xml");
    }

    #[test]
    fn test_relationships_are_resolved() {
        let bytes = zip_package(&[
            ("ppt/presentation.xml", "<p:presentation/>"),
            (
                "ppt/_rels/presentation.xml.rels",
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
                <Relationship Id="rId1" Type="t1" Target="slides/slide1.xml"/>
                <Relationship Id="rId2" Type="t2" Target="https://example.com" TargetMode="External"/>
                </Relationships>"#,
            ),
        ]);
        let mut package = PackageReader::open(&bytes).unwrap();
        let rels = package.relationships("ppt/presentation.xml").unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].target, "ppt/slides/slide1.xml");
        assert!(rels[1].external);
        assert_eq!(rels[1].target, "https://example.com");
    }

    #[test]
    fn test_missing_part() {
        let bytes = zip_package(&[("a.xml", "<a/>")]);
        let mut package = PackageReader::open(&bytes).unwrap();
        let err = package.read_part("b.xml").unwrap_err();
        assert!(matches!(err, ParseError::MissingPart(name) if name == "b.xml"));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            PackageReader::open(b"plain text"),
            Err(ParseError::Archive(_))
        ));
    }

    #[test]
    fn test_xml_text_escapes_and_strips_controls() {
        assert_eq!(xml_text("a<b & c>\u{0}"), "a&lt;b &amp; c&gt;");
    }

    #[test]
    fn test_writer_round_trip() {
        let mut writer = PackageWriter::new();
        writer.add_part("x/y.xml", b"<y/>").unwrap();
        let bytes = writer.finish().unwrap();
        let mut package = PackageReader::open(&bytes).unwrap();
        assert_eq!(package.read_part("x/y.xml").unwrap(), b"<y/>");
    }
}
