//! WASM bindings for in-browser document conversion.
//!
//! Every conversion runs inside the page; the document bytes never leave the
//! browser.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use doconv_core::{
    ConversionError, ConversionRequest, ConversionResult, Converter, DoconvConfig,
    DocumentFormat, OperationKind, ProgressEvent, SourceDocument,
};

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Version information.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Identifiers accepted by `processDocument`.
#[wasm_bindgen]
pub fn operations() -> Vec<String> {
    OperationKind::ALL
        .iter()
        .map(|op| op.id().to_string())
        .collect()
}

/// Detect `"pdf"`, `"docx"` or `"pptx"` from file content.
#[wasm_bindgen(js_name = detectFormat)]
pub fn detect_format(bytes: &[u8]) -> Option<String> {
    DocumentFormat::sniff(bytes).map(|f| f.to_string())
}

/// Convert a document with the default configuration.
///
/// `on_progress` is called synchronously with `{ stage, unit, message }` for
/// every progress event. Resolves to a [`ProcessedDocument`]; rejects with an
/// error message string.
#[wasm_bindgen(js_name = processDocument)]
pub async fn process_document(
    file_bytes: Vec<u8>,
    operation: String,
    on_progress: Option<js_sys::Function>,
) -> Result<ProcessedDocument, JsValue> {
    run(&Converter::default(), file_bytes, &operation, on_progress.as_ref())
}

/// Converted output.
#[wasm_bindgen]
pub struct ProcessedDocument {
    result: ConversionResult,
}

#[wasm_bindgen]
impl ProcessedDocument {
    /// Output bytes as a `Uint8Array`.
    #[wasm_bindgen(getter)]
    pub fn bytes(&self) -> Vec<u8> {
        self.result.bytes.clone()
    }

    /// MIME type, ready for a `Blob`.
    #[wasm_bindgen(getter, js_name = contentType)]
    pub fn content_type(&self) -> String {
        self.result.content_type().to_string()
    }

    /// File extension including the dot.
    #[wasm_bindgen(getter)]
    pub fn extension(&self) -> String {
        self.result.extension().to_string()
    }
}

/// Converter class holding a configuration across calls.
#[wasm_bindgen]
pub struct DocumentConverter {
    converter: Converter,
}

#[wasm_bindgen]
impl DocumentConverter {
    /// Create a converter, optionally from a JSON configuration string.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<DocumentConverter, JsValue> {
        let config = match config_json {
            Some(json) => serde_json::from_str::<DoconvConfig>(&json)
                .map_err(|e| JsValue::from_str(&format!("invalid config: {}", e)))?,
            None => DoconvConfig::default(),
        };
        Ok(Self {
            converter: Converter::new(config),
        })
    }

    /// Current configuration as a plain object.
    #[wasm_bindgen]
    pub fn config(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.converter.config())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Same as `processDocument`, with this converter's configuration.
    #[wasm_bindgen]
    pub fn process(
        &self,
        file_bytes: Vec<u8>,
        operation: &str,
        on_progress: Option<js_sys::Function>,
    ) -> Result<ProcessedDocument, JsValue> {
        run(&self.converter, file_bytes, operation, on_progress.as_ref())
    }

    /// Format and unit count as `{ format, unit_kind, units }`.
    #[wasm_bindgen]
    pub fn inspect(&self, bytes: &[u8]) -> Result<JsValue, JsValue> {
        let info = self.converter.inspect(bytes).map_err(to_js_error)?;
        serde_wasm_bindgen::to_value(&info).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}

/// Shape handed to the progress callback.
#[derive(Serialize)]
struct JsProgress {
    #[serde(flatten)]
    event: ProgressEvent,
    message: String,
}

fn run(
    converter: &Converter,
    file_bytes: Vec<u8>,
    operation: &str,
    on_progress: Option<&js_sys::Function>,
) -> Result<ProcessedDocument, JsValue> {
    let operation: OperationKind = operation.parse().map_err(to_js_error)?;
    let document = SourceDocument::detect_or(file_bytes, operation.source_format());
    let request = ConversionRequest::new(document, operation);

    let sink = |event: ProgressEvent| {
        if let Some(callback) = on_progress {
            notify(callback, event);
        }
    };
    let result = converter.convert(&request, &sink).map_err(to_js_error)?;
    Ok(ProcessedDocument { result })
}

fn notify(callback: &js_sys::Function, event: ProgressEvent) {
    let payload = JsProgress {
        event,
        message: event.to_string(),
    };
    let delivered = serde_wasm_bindgen::to_value(&payload)
        .map_err(JsValue::from)
        .and_then(|value| callback.call1(&JsValue::NULL, &value));
    // Progress is advisory; a throwing callback must not fail the conversion.
    if let Err(e) = delivered {
        web_sys::console::warn_2(&JsValue::from_str("doconv: progress callback failed"), &e);
    }
}

fn to_js_error(err: ConversionError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doconv_core::{DocumentWriter, IntermediateContent, PdfWriter, Unit};
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn pdf(texts: &[&str]) -> Vec<u8> {
        let units = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Unit::with_text(i as u32 + 1, *text))
            .collect();
        PdfWriter::new()
            .write(&IntermediateContent::from_units(units).unwrap())
            .unwrap()
    }

    #[wasm_bindgen_test]
    fn test_operations_listed() {
        assert_eq!(
            operations(),
            vec!["pdf-to-word", "word-to-pdf", "pdf-to-ppt", "ppt-to-pdf", "pdf-watermark"]
        );
    }

    #[wasm_bindgen_test]
    fn test_detect_format() {
        assert_eq!(detect_format(&pdf(&["x"])).as_deref(), Some("pdf"));
        assert_eq!(detect_format(b"plain"), None);
    }

    #[wasm_bindgen_test]
    async fn test_process_document_reports_slides() {
        let collect = js_sys::Function::new_with_args(
            "e",
            "globalThis.__doconvEvents = (globalThis.__doconvEvents || []).concat([e.message]);",
        );
        let output = process_document(pdf(&["Alpha", "Beta"]), "pdf-to-ppt".into(), Some(collect))
            .await
            .unwrap();
        assert_eq!(output.extension(), ".pptx");

        let events = js_sys::Reflect::get(&js_sys::global(), &"__doconvEvents".into()).unwrap();
        let messages: Vec<String> = js_sys::Array::from(&events)
            .iter()
            .filter_map(|v| v.as_string())
            .collect();
        assert!(messages.contains(&"processing slide 2/2".to_string()));
    }

    #[wasm_bindgen_test]
    async fn test_unknown_operation_rejects() {
        let err = process_document(pdf(&["x"]), "pdf-to-excel".into(), None)
            .await
            .err()
            .unwrap();
        assert!(err.as_string().unwrap().contains("pdf-to-excel"));
    }

    #[wasm_bindgen_test]
    fn test_throwing_callback_does_not_fail() {
        let converter = DocumentConverter::new(None).unwrap();
        let throwing = js_sys::Function::new_no_args("throw new Error('boom');");
        let output = converter
            .process(pdf(&["x"]), "pdf-watermark", Some(throwing))
            .unwrap();
        assert_eq!(output.content_type(), "application/pdf");
    }

    #[wasm_bindgen_test]
    fn test_config_json() {
        assert!(DocumentConverter::new(Some(r#"{"watermark":{"max_opacity":0.2}}"#.into())).is_ok());
        assert!(DocumentConverter::new(Some("not json".into())).is_err());
    }
}
