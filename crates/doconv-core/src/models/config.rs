//! Configuration structures for the conversion pipeline.

use serde::{Deserialize, Serialize};

/// Main configuration for the doconv pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoconvConfig {
    /// PDF reading and writing configuration.
    pub pdf: PdfConfig,

    /// DOCX and PPTX configuration.
    pub office: OfficeConfig,

    /// Watermark removal configuration.
    pub watermark: WatermarkConfig,
}

/// How the PDF reader pulls text out of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextStrategy {
    /// Walk the page content stream and collect text-showing operands.
    ContentStream,
    /// Use the pdf-extract text layer for each page.
    Layout,
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Text extraction strategy.
    pub text_strategy: TextStrategy,

    /// Attach page images to each unit as embedded resources.
    pub extract_images: bool,

    /// Output page width in points.
    pub page_width: f32,

    /// Output page height in points.
    pub page_height: f32,

    /// Left and top margin in points (text origin).
    pub margin: f32,

    /// Body font size in points.
    pub font_size: f32,

    /// Optional heading drawn above the text of the first output page.
    pub heading: Option<String>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            text_strategy: TextStrategy::ContentStream,
            extract_images: false,
            page_width: 612.0,
            page_height: 792.0,
            margin: 50.0,
            font_size: 10.0,
            heading: None,
        }
    }
}

/// DOCX and PPTX configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficeConfig {
    /// Attach package media to units as embedded resources.
    pub extract_media: bool,

    /// Slide width in EMU.
    pub slide_width: i64,

    /// Slide height in EMU.
    pub slide_height: i64,

    /// Slide text size in points.
    pub slide_font_size: u32,

    /// Slide text colour as RRGGBB.
    pub slide_text_color: String,
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            extract_media: false,
            // 10in x 5.625in, 16:9
            slide_width: 9_144_000,
            slide_height: 5_143_500,
            slide_font_size: 14,
            slide_text_color: "363636".to_string(),
        }
    }
}

/// Watermark removal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Content drawn at or below this alpha is treated as a watermark.
    pub max_opacity: f32,

    /// Remove marked-content and optional-content layers named as watermarks.
    pub named_layers: bool,

    /// Remove `/Watermark` annotations.
    pub annotations: bool,

    /// Remove rotated text repeated on every page.
    pub repeated_text: bool,

    /// Minimum text-matrix rotation (sine of the angle) for repeated text.
    pub min_rotation: f32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            max_opacity: 0.5,
            named_layers: true,
            annotations: true,
            repeated_text: true,
            min_rotation: 0.1,
        }
    }
}

impl DoconvConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: DoconvConfig =
            serde_json::from_str(r#"{ "watermark": { "max_opacity": 0.3 } }"#).unwrap();
        assert_eq!(config.watermark.max_opacity, 0.3);
        assert!(config.watermark.named_layers);
        assert_eq!(config.pdf.text_strategy, TextStrategy::ContentStream);
        assert_eq!(config.office.slide_font_size, 14);
    }

    #[test]
    fn test_text_strategy_names() {
        let json = serde_json::to_string(&TextStrategy::ContentStream).unwrap();
        assert_eq!(json, "\"content-stream\"");
    }
}
