//! Inspect command - report format, unit count and watermark findings.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::debug;

use doconv_core::{DocumentFormat, DocumentInfo, RemovalReport, WatermarkKind, WatermarkRemover};

use super::GlobalOptions;

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Files to inspect
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Dry-run the watermark remover on PDFs and report what it would remove
    #[arg(short, long)]
    watermarks: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Inspection {
    path: PathBuf,
    #[serde(flatten)]
    info: DocumentInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    watermarks: Option<RemovalReport>,
}

pub async fn run(args: InspectArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let converter = doconv_core::Converter::new(config.clone());
    let remover = WatermarkRemover::from_config(&config.watermark);

    let mut inspections = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let bytes = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
        let info = converter
            .inspect(&bytes)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;

        let watermarks = if args.watermarks && info.format == DocumentFormat::Pdf {
            let (_, report) = remover.remove(&bytes)?;
            debug!("{}: {} watermark removals", path.display(), report.total());
            Some(report)
        } else {
            None
        };

        inspections.push(Inspection {
            path: path.clone(),
            info,
            watermarks,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inspections)?);
        return Ok(());
    }

    for inspection in &inspections {
        let info = &inspection.info;
        println!(
            "{} {}: {}, {} {:?} unit(s)",
            style("ℹ").blue(),
            inspection.path.display(),
            info.format,
            info.units,
            info.unit_kind
        );
        if let Some(report) = &inspection.watermarks {
            print_report(report);
        }
    }

    Ok(())
}

fn print_report(report: &RemovalReport) {
    if report.total() == 0 {
        println!("   {}", style("no watermark signatures found").green());
        return;
    }
    println!(
        "   {} removable object(s) on {} page(s)",
        style(report.total()).yellow(),
        report.pages_changed()
    );
    for kind in [
        WatermarkKind::NamedLayer,
        WatermarkKind::Annotation,
        WatermarkKind::LowOpacity,
        WatermarkKind::TaggedXObject,
        WatermarkKind::RepeatedText,
    ] {
        let count = report.count(kind);
        if count > 0 {
            println!("   - {:?}: {}", kind, count);
        }
    }
}
