//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod convert;
pub mod inspect;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use doconv_core::{
    CancellationFlag, ChannelProgress, ConversionRequest, ConversionResult, Converter,
    DoconvConfig, DocumentFormat, OperationKind, ProgressEvent, SourceDocument, TextStrategy,
};

/// Options accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// How text is pulled out of PDF pages
    #[arg(long, global = true, value_enum)]
    pub text_strategy: Option<TextStrategyArg>,

    /// Heading drawn above the first page of PDF output
    #[arg(long, global = true)]
    pub heading: Option<String>,

    /// Highest opacity still treated as a watermark (0.0 to 1.0)
    #[arg(long, global = true, value_parser = parse_opacity)]
    pub max_opacity: Option<f32>,

    /// Carry images from PDF pages and slides into the output
    #[arg(long, global = true)]
    pub extract_images: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TextStrategyArg {
    ContentStream,
    Layout,
}

impl From<TextStrategyArg> for TextStrategy {
    fn from(arg: TextStrategyArg) -> Self {
        match arg {
            TextStrategyArg::ContentStream => TextStrategy::ContentStream,
            TextStrategyArg::Layout => TextStrategy::Layout,
        }
    }
}

fn parse_opacity(raw: &str) -> Result<f32, String> {
    let value = raw.parse::<f32>().map_err(|e| e.to_string())?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not between 0.0 and 1.0"))
    }
}

impl GlobalOptions {
    /// Load the config named on the command line, else the user config file
    /// if one exists, else defaults; then apply the command-line overrides.
    pub(crate) fn load_config(&self) -> anyhow::Result<DoconvConfig> {
        let mut config = match &self.config {
            Some(path) => DoconvConfig::from_file(path)?,
            None => {
                let default_path = config::default_config_path();
                if default_path.exists() {
                    debug!("Using config from {}", default_path.display());
                    DoconvConfig::from_file(&default_path)?
                } else {
                    DoconvConfig::default()
                }
            }
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut DoconvConfig) {
        if let Some(strategy) = self.text_strategy {
            config.pdf.text_strategy = strategy.into();
        }
        if let Some(heading) = &self.heading {
            config.pdf.heading = Some(heading.clone());
        }
        if let Some(max_opacity) = self.max_opacity {
            config.watermark.max_opacity = max_opacity;
        }
        if self.extract_images {
            config.pdf.extract_images = true;
            config.office.extract_media = true;
        }
    }
}

/// Read an input file, declaring its format from the extension and falling
/// back to content sniffing.
pub(crate) fn read_source(path: &Path, operation: OperationKind) -> anyhow::Result<SourceDocument> {
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }
    let bytes = fs::read(path)?;
    let declared = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentFormat::from_extension);
    Ok(match declared {
        Some(format) => SourceDocument::new(bytes, format),
        None => SourceDocument::detect_or(bytes, operation.source_format()),
    })
}

const PROCESSED_SUFFIX: &str = "_processed";

/// `report.pdf` converted to DOCX becomes `report_processed.docx`.
pub(crate) fn processed_path(input: &Path, output_dir: Option<&Path>, format: DocumentFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let name = format!("{}{}{}", stem, PROCESSED_SUFFIX, format.extension());
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Whether `path` looks like an output written by [`processed_path`].
pub(crate) fn is_processed_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(PROCESSED_SUFFIX))
}

/// Run one conversion on a blocking worker, handing every progress event to
/// `on_event` as it arrives.
pub(crate) async fn run_conversion(
    converter: &Converter,
    document: SourceDocument,
    operation: OperationKind,
    cancel: Option<CancellationFlag>,
    mut on_event: impl FnMut(ProgressEvent),
) -> anyhow::Result<ConversionResult> {
    let (sink, mut rx) = ChannelProgress::new();
    let converter = converter.clone();
    let request = ConversionRequest::new(document, operation);
    let task =
        tokio::spawn(async move { converter.convert_async(request, sink, cancel).await });

    while let Some(event) = rx.recv().await {
        on_event(event);
    }

    Ok(task.await??)
}

pub(crate) fn unit_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}

/// Reflect a progress event on a bar: unit events move the bar, stage events
/// only change the message.
pub(crate) fn apply_event(pb: &ProgressBar, event: &ProgressEvent) {
    if let Some(unit) = event.unit {
        pb.set_length(u64::from(unit.total));
        pb.set_position(u64::from(unit.index));
    }
    pb.set_message(event.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use doconv_core::{Stage, UnitKind};

    #[test]
    fn test_processed_path_next_to_input() {
        let path = processed_path(Path::new("/tmp/in/report.pdf"), None, DocumentFormat::Docx);
        assert_eq!(path, PathBuf::from("/tmp/in/report_processed.docx"));
    }

    #[test]
    fn test_processed_path_in_output_dir() {
        let path = processed_path(
            Path::new("deck.pptx"),
            Some(Path::new("out")),
            DocumentFormat::Pdf,
        );
        assert_eq!(path, PathBuf::from("out/deck_processed.pdf"));
    }

    #[test]
    fn test_processed_outputs_recognized() {
        assert!(is_processed_output(Path::new("out/deck_processed.pdf")));
        assert!(!is_processed_output(Path::new("processed.pdf")));
        assert!(!is_processed_output(Path::new("deck.pdf")));
    }

    #[test]
    fn test_overrides_applied_over_file_config() {
        let options = GlobalOptions {
            text_strategy: Some(TextStrategyArg::Layout),
            heading: Some("Report".to_string()),
            max_opacity: Some(0.25),
            extract_images: true,
            ..GlobalOptions::default()
        };
        let mut config = DoconvConfig::default();
        options.apply(&mut config);

        assert_eq!(config.pdf.text_strategy, TextStrategy::Layout);
        assert_eq!(config.pdf.heading.as_deref(), Some("Report"));
        assert_eq!(config.watermark.max_opacity, 0.25);
        assert!(config.pdf.extract_images);
        assert!(config.office.extract_media);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = DoconvConfig::default();
        config.watermark.max_opacity = 0.4;
        GlobalOptions::default().apply(&mut config);
        assert_eq!(config.watermark.max_opacity, 0.4);
        assert_eq!(config.pdf.heading, None);
    }

    #[test]
    fn test_parse_opacity_range() {
        assert_eq!(parse_opacity("0.3"), Ok(0.3));
        assert!(parse_opacity("1.5").is_err());
        assert!(parse_opacity("half").is_err());
    }

    #[test]
    fn test_apply_event_moves_bar() {
        let pb = ProgressBar::hidden();
        apply_event(&pb, &ProgressEvent::unit(Stage::Writing, UnitKind::Slide, 2, 5));
        assert_eq!(pb.position(), 2);
        assert_eq!(pb.length(), Some(5));
        assert_eq!(pb.message(), "processing slide 2/5");

        apply_event(&pb, &ProgressEvent::stage(Stage::Saving));
        assert_eq!(pb.position(), 2);
        assert_eq!(pb.message(), "serializing output");
    }
}
