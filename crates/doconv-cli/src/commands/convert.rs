//! Convert command - run one operation on a single file.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::{debug, info, warn};

use doconv_core::{CancellationFlag, Converter, OperationKind};

use super::{GlobalOptions, apply_event, processed_path, read_source, run_conversion, unit_bar};

/// Arguments for the convert command.
#[derive(Args)]
pub struct ConvertArgs {
    /// Input file (PDF, DOCX or PPTX)
    #[arg(required = true)]
    input: PathBuf,

    /// Operation: pdf-to-word, word-to-pdf, pdf-to-ppt, ppt-to-pdf, pdf-watermark
    #[arg(short = 'p', long)]
    operation: OperationKind,

    /// Output file (default: <stem>_processed<ext> next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

pub async fn run(args: ConvertArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = global.load_config()?;

    let document = read_source(&args.input, args.operation)?;
    info!(
        "Converting {} ({}) with {}",
        args.input.display(),
        document.format(),
        args.operation
    );

    // Ctrl-C stops the conversion at the next unit boundary
    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current unit");
            on_interrupt.cancel();
        }
    });

    let pb = if args.quiet {
        indicatif::ProgressBar::hidden()
    } else {
        unit_bar()
    };

    let converter = Converter::new(config);
    let result = run_conversion(&converter, document, args.operation, Some(cancel), |event| {
        debug!("{}", event);
        apply_event(&pb, &event);
    })
    .await;

    let result = match result {
        Ok(result) => {
            pb.finish_with_message("Done");
            result
        }
        Err(e) => {
            pb.abandon_with_message("Failed");
            return Err(e);
        }
    };

    let output_path = args
        .output
        .unwrap_or_else(|| processed_path(&args.input, None, result.format));
    fs::write(&output_path, &result.bytes)?;

    println!(
        "{} Output written to {} ({}, {} bytes)",
        style("✓").green(),
        output_path.display(),
        result.content_type(),
        result.bytes.len()
    );
    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}
