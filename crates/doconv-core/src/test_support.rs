//! In-memory PDF, DOCX and PPTX fixtures for unit tests.

use std::io::{Cursor, Write};

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Builds a small PDF page by page with a shared resources dictionary.
pub(crate) struct PdfFixture {
    doc: Document,
    resources: Dictionary,
    pages: Vec<(Vec<u8>, Vec<Object>)>,
}

impl PdfFixture {
    /// Start a document whose resources already hold Helvetica as `/F1`.
    pub(crate) fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources = dictionary! {
            "Font" => dictionary! { "F1" => Object::Reference(font_id) },
        };
        Self {
            doc,
            resources,
            pages: Vec::new(),
        }
    }

    pub(crate) fn add_object<T: Into<Object>>(&mut self, obj: T) -> ObjectId {
        self.doc.add_object(obj)
    }

    /// Register `name` under a resource category such as `ExtGState`.
    pub(crate) fn resource(&mut self, category: &str, name: &str, obj: Object) -> &mut Self {
        if !self.resources.has(category.as_bytes()) {
            self.resources.set(category, Dictionary::new());
        }
        if let Ok(Object::Dictionary(dict)) = self.resources.get_mut(category.as_bytes()) {
            dict.set(name, obj);
        }
        self
    }

    pub(crate) fn page(&mut self, content: &[u8]) -> &mut Self {
        self.pages.push((content.to_vec(), Vec::new()));
        self
    }

    pub(crate) fn page_with_annots(&mut self, content: &[u8], annots: Vec<Object>) -> &mut Self {
        self.pages.push((content.to_vec(), annots));
        self
    }

    pub(crate) fn build(&mut self) -> Vec<u8> {
        let mut doc = std::mem::replace(&mut self.doc, Document::with_version("1.5"));
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for (content, annots) in &self.pages {
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.clone()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
                "Contents" => Object::Reference(content_id),
                "Resources" => self.resources.clone(),
            };
            if !annots.is_empty() {
                page.set("Annots", annots.clone());
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }
}

/// One page per content stream.
pub(crate) fn pdf_with_content(pages: &[&[u8]]) -> Vec<u8> {
    let mut fixture = PdfFixture::new();
    for content in pages {
        fixture.page(content);
    }
    fixture.build()
}

/// One page per text, each with a single line.
pub(crate) fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
    let contents: Vec<Vec<u8>> = texts
        .iter()
        .map(|text| format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET").into_bytes())
        .collect();
    let refs: Vec<&[u8]> = contents.iter().map(Vec::as_slice).collect();
    pdf_with_content(&refs)
}

/// A single page drawing an XObject registered as `name`.
pub(crate) fn pdf_with_xobject(content: &[u8], name: &str, xobject: Stream) -> Vec<u8> {
    let mut fixture = PdfFixture::new();
    let id = fixture.add_object(xobject);
    fixture.resource("XObject", name, Object::Reference(id));
    fixture.page(content);
    fixture.build()
}

/// Zip the given `(path, contents)` entries into a package.
pub(crate) fn zip_package(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Append an uncompressed entry to an existing zip package.
pub(crate) fn with_stored_part(package: Vec<u8>, name: &str, data: &[u8]) -> Vec<u8> {
    let mut zip = ZipWriter::new_append(Cursor::new(package)).unwrap();
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file(name, options).unwrap();
    zip.write_all(data).unwrap();
    zip.finish().unwrap().into_inner()
}

/// A DOCX package with one paragraph per entry of `paragraphs`.
pub(crate) fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{p}</w:t></w:r></w:p>"))
        .collect();
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    );
    zip_package(&[
        ("[Content_Types].xml", "<Types/>"),
        ("word/document.xml", &document),
    ])
}

/// A PPTX package with one slide per entry; each slide holds one text box.
pub(crate) fn pptx_with_slides(slides: &[&str]) -> Vec<u8> {
    let mut entries: Vec<(String, String)> = Vec::new();
    let mut ids = String::new();
    let mut rels = String::new();
    for (i, text) in slides.iter().enumerate() {
        let n = i + 1;
        ids.push_str(&format!("<p:sldId id=\"{}\" r:id=\"rId{}\"/>", 255 + n, n));
        rels.push_str(&format!(
            "<Relationship Id=\"rId{n}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide\" Target=\"slides/slide{n}.xml\"/>"
        ));
        entries.push((
            format!("ppt/slides/slide{n}.xml"),
            format!(
                "<p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
                 xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\">\
                 <p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p>\
                 </p:txBody></p:sp></p:spTree></p:cSld></p:sld>"
            ),
        ));
    }
    entries.push((
        "ppt/presentation.xml".to_string(),
        format!(
            "<p:presentation xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
             <p:sldIdLst>{ids}</p:sldIdLst></p:presentation>"
        ),
    ));
    entries.push((
        "ppt/_rels/presentation.xml.rels".to_string(),
        format!(
            "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{rels}</Relationships>"
        ),
    ));
    let refs: Vec<(&str, &str)> = entries
        .iter()
        .map(|(n, b)| (n.as_str(), b.as_str()))
        .collect();
    zip_package(&refs)
}
