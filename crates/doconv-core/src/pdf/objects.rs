//! Object-graph helpers shared by the PDF reader and the watermark remover.

use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::ParseError;

/// A loaded, decrypted document with its pages in order.
pub(crate) struct LoadedDocument {
    pub doc: Document,
    pub page_ids: Vec<ObjectId>,
    /// Unencrypted bytes of the document, for consumers that parse on their own.
    pub raw: Vec<u8>,
}

/// Load a PDF, opening empty-password encryption and rejecting page-less files.
pub(crate) fn load_document(data: &[u8]) -> Result<LoadedDocument, ParseError> {
    let mut doc = Document::load_mem(data)?;

    let raw = if doc.is_encrypted() {
        if doc.decrypt("").is_err() {
            return Err(ParseError::Encrypted);
        }
        debug!("Decrypted PDF with empty password");
        doc.trailer.remove(b"Encrypt");

        let mut decrypted = Vec::new();
        doc.save_to(&mut decrypted)
            .map_err(|e| ParseError::Pdf(format!("failed to save decrypted PDF: {}", e)))?;
        decrypted
    } else {
        data.to_vec()
    };

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(ParseError::NoPages);
    }

    debug!("Loaded PDF with {} pages", page_ids.len());
    Ok(LoadedDocument { doc, page_ids, raw })
}

/// Resources dictionary for a page, following `/Parent` inheritance.
pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut node_id = page_id;
    // Page trees deeper than this are malformed or cyclic.
    for _ in 0..64 {
        let dict = doc.get_object(node_id).ok()?.as_dict().ok()?;
        if let Ok(resources) = dict.get(b"Resources") {
            if let Ok((_, Object::Dictionary(res_dict))) = doc.dereference(resources) {
                return Some(res_dict.clone());
            }
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => node_id = *parent_id,
            _ => return None,
        }
    }
    None
}

/// Look up `name` in the `category` sub-dictionary of a resources dictionary.
pub(crate) fn resource_entry<'a>(
    doc: &'a Document,
    resources: &'a Dictionary,
    category: &[u8],
    name: &[u8],
) -> Option<&'a Object> {
    let (_, category_obj) = doc.dereference(resources.get(category).ok()?).ok()?;
    let entry = category_obj.as_dict().ok()?.get(name).ok()?;
    doc.dereference(entry).ok().map(|(_, obj)| obj)
}

/// Resolve an object to a dictionary, looking through references and streams.
pub(crate) fn as_dictionary<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match doc.dereference(obj).ok()?.1 {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Numeric value of an integer or real object.
pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Decode a PDF string: UTF-16BE when it carries a byte-order mark, otherwise
/// one character per byte.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Kerning adjustment (thousandths of an em) wide enough to read as a space.
const TJ_SPACE_THRESHOLD: f32 = -250.0;

/// Text shown by a single text-showing operator, if it is one.
pub(crate) fn shown_text(op: &Operation) -> Option<String> {
    match op.operator.as_str() {
        "Tj" | "'" | "\"" => match op.operands.last()? {
            Object::String(bytes, _) => Some(decode_text(bytes)),
            _ => None,
        },
        "TJ" => {
            let items = op.operands.first()?.as_array().ok()?;
            let mut text = String::new();
            for item in items {
                match item {
                    Object::String(bytes, _) => text.push_str(&decode_text(bytes)),
                    other => {
                        if number(other).is_some_and(|n| n <= TJ_SPACE_THRESHOLD)
                            && !text.ends_with(' ')
                        {
                            text.push(' ');
                        }
                    }
                }
            }
            Some(text)
        }
        _ => None,
    }
}

/// Join trimmed text fragments with single spaces, skipping blank ones.
pub(crate) fn join_fragments<I>(fragments: I) -> String
where
    I: IntoIterator<Item = String>,
{
    fragments
        .into_iter()
        .filter_map(|f| {
            let trimmed = f.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::StringFormat;

    #[test]
    fn test_decode_text_utf16() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_text(&bytes), "Hi");
    }

    #[test]
    fn test_decode_text_single_byte() {
        assert_eq!(decode_text(b"Caf\xe9"), "Café");
    }

    #[test]
    fn test_shown_text_tj_array_inserts_space() {
        let op = Operation::new(
            "TJ",
            vec![Object::Array(vec![
                Object::String(b"Hello".to_vec(), StringFormat::Literal),
                Object::Integer(-400),
                Object::String(b"World".to_vec(), StringFormat::Literal),
                Object::Integer(-20),
                Object::String(b"!".to_vec(), StringFormat::Literal),
            ])],
        );
        assert_eq!(shown_text(&op).as_deref(), Some("Hello World!"));
    }

    #[test]
    fn test_shown_text_ignores_other_operators() {
        let op = Operation::new("Td", vec![Object::Integer(0), Object::Integer(0)]);
        assert!(shown_text(&op).is_none());
    }

    #[test]
    fn test_join_fragments_skips_blank() {
        let joined = join_fragments(vec!["a".to_string(), " ".to_string(), "b".to_string()]);
        assert_eq!(joined, "a b");
    }

    #[test]
    fn test_join_fragments_trims_edges() {
        let joined = join_fragments(vec!["  Alpha  ".to_string(), "Beta ".to_string()]);
        assert_eq!(joined, "Alpha Beta");
    }
}
