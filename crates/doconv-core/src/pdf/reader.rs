//! PDF text and image extraction using lopdf and pdf-extract.

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::objects::{self, LoadedDocument};
use crate::error::ParseError;
use crate::models::{DocumentFormat, EmbeddedResource, PdfConfig, TextStrategy, Unit};
use crate::pipeline::{DocumentReader, UnitSource};
use crate::progress::UnitKind;

/// Reads a PDF into one unit per page.
pub struct PdfReader {
    strategy: TextStrategy,
    extract_images: bool,
}

impl PdfReader {
    /// Create a reader using the content-stream strategy and no images.
    pub fn new() -> Self {
        Self::from_config(&PdfConfig::default())
    }

    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            strategy: config.text_strategy,
            extract_images: config.extract_images,
        }
    }

    /// Set the text extraction strategy.
    pub fn with_strategy(mut self, strategy: TextStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Collect page images as embedded resources.
    pub fn with_images(mut self, extract: bool) -> Self {
        self.extract_images = extract;
        self
    }
}

impl Default for PdfReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentReader for PdfReader {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn unit_kind(&self) -> UnitKind {
        UnitKind::Page
    }

    fn open<'a>(&self, bytes: &'a [u8]) -> Result<Box<dyn UnitSource + 'a>, ParseError> {
        let LoadedDocument { doc, page_ids, raw } = objects::load_document(bytes)?;

        let layout_text = match self.strategy {
            TextStrategy::ContentStream => None,
            TextStrategy::Layout => match pdf_extract::extract_text_from_mem_by_pages(&raw) {
                Ok(pages) if pages.len() == page_ids.len() => Some(pages),
                Ok(pages) => {
                    warn!(
                        "Text layer reported {} pages, document has {}; using content streams",
                        pages.len(),
                        page_ids.len()
                    );
                    None
                }
                Err(e) => {
                    warn!("Text layer extraction failed ({}); using content streams", e);
                    None
                }
            },
        };

        Ok(Box::new(PdfSource {
            doc,
            page_ids,
            layout_text,
            extract_images: self.extract_images,
        }))
    }
}

struct PdfSource {
    doc: Document,
    page_ids: Vec<ObjectId>,
    layout_text: Option<Vec<String>>,
    extract_images: bool,
}

impl UnitSource for PdfSource {
    fn unit_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    fn read_unit(&mut self, index: u32) -> Result<Unit, ParseError> {
        let slot = (index as usize).checked_sub(1);
        let page_id = *slot
            .and_then(|i| self.page_ids.get(i))
            .ok_or_else(|| ParseError::Pdf(format!("page {} out of range", index)))?;

        let layout_text = slot.and_then(|i| self.layout_text.as_ref()?.get(i));
        let text = match layout_text {
            Some(page_text) => normalize_whitespace(page_text),
            None => content_stream_text(&self.doc, page_id),
        };

        let resources = if self.extract_images {
            page_images(&self.doc, page_id)
        } else {
            Vec::new()
        };

        debug!(
            "Page {}: {} chars, {} images",
            index,
            text.len(),
            resources.len()
        );

        Ok(Unit {
            index,
            runs: vec![text],
            resources,
        })
    }
}

/// Text fragments of a page content stream, in stream order.
pub(crate) fn content_stream_text(doc: &Document, page_id: ObjectId) -> String {
    let data = match doc.get_page_content(page_id) {
        Ok(data) => data,
        Err(e) => {
            warn!("Unreadable content stream on page {:?}: {}", page_id, e);
            return String::new();
        }
    };
    let content = match Content::decode(&data) {
        Ok(content) => content,
        Err(e) => {
            warn!("Undecodable content stream on page {:?}: {}", page_id, e);
            return String::new();
        }
    };

    objects::join_fragments(content.operations.iter().filter_map(objects::shown_text))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Image XObjects referenced from a page's resources.
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<EmbeddedResource> {
    let Some(resources) = objects::page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Vec::new();
    };
    let Ok((_, Object::Dictionary(xobj_dict))) = doc.dereference(xobjects) else {
        return Vec::new();
    };

    xobj_dict
        .iter()
        .filter_map(|(_name, obj_ref)| doc.dereference(obj_ref).ok())
        .filter_map(|(_, obj)| image_from_object(doc, obj))
        .collect()
}

fn image_from_object(doc: &Document, obj: &Object) -> Option<EmbeddedResource> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;

    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    trace!("Found image object: {}x{}", width, height);

    if let Ok(filter) = dict.get(b"Filter") {
        let filter_name = match filter {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
            _ => None,
        };

        match filter_name {
            Some(b"DCTDecode") => {
                // JPEG data passes through untouched
                return Some(EmbeddedResource {
                    media_type: "image/jpeg".to_string(),
                    width: Some(width),
                    height: Some(height),
                    data: stream.content.clone(),
                });
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                trace!("Skipping image with unsupported filter");
                return None;
            }
            _ => {}
        }
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
            Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
            _ => None,
        })
        .unwrap_or(b"DeviceRGB");

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);

    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    let image = raw_to_image(&data, width, height, color_space)?;
    let mut png = Vec::new();
    if let Err(e) = image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png) {
        warn!("Failed to re-encode page image: {}", e);
        return None;
    }

    Some(EmbeddedResource {
        media_type: "image/png".to_string(),
        width: Some(width),
        height: Some(height),
        data: png,
    })
}

fn raw_to_image(data: &[u8], width: u32, height: u32, color_space: &[u8]) -> Option<DynamicImage> {
    let Some(pixels) = usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h))
    else {
        trace!("Image dimensions {}x{} overflow", width, height);
        return None;
    };
    let rgb_len = pixels.checked_mul(3)?;

    match color_space {
        b"DeviceRGB" | b"RGB" if data.len() >= rgb_len => {
            ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data[..rgb_len].to_vec())
                .map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" if data.len() >= pixels => {
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!(
                "Could not decode image: data_len={}, colorspace={:?}",
                data.len(),
                String::from_utf8_lossy(color_space)
            );
            None
        }
    }
}
