//! Batch command - run one operation over many files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use doconv_core::{Converter, DocumentFormat, OperationKind};

use super::{GlobalOptions, is_processed_output, processed_path, read_source, run_conversion};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input glob pattern
    #[arg(required = true)]
    input: String,

    /// Operation applied to every matching file
    #[arg(short = 'p', long)]
    operation: OperationKind,

    /// Output directory (default: next to each input)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Also write a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of parallel workers
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of converting a single file.
struct FileResult {
    path: PathBuf,
    output: Option<PathBuf>,
    bytes: usize,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = global.load_config()?;
    let source_format = args.operation.source_format();

    // Only files the operation can read, minus outputs of earlier runs
    let mut files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .and_then(DocumentFormat::from_extension)
                == Some(source_format)
        })
        .filter(|p| {
            let skip = is_processed_output(p);
            if skip {
                debug!("Skipping earlier output {}", p.display());
            }
            !skip
        })
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!(
            "No {} files found for pattern: {}",
            source_format,
            args.input
        );
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let overall_pb = ProgressBar::new(files.len() as u64);
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let converter = Converter::new(config);
    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut tasks = JoinSet::new();

    for path in files {
        let converter = converter.clone();
        let semaphore = semaphore.clone();
        let operation = args.operation;
        let output_dir = args.output_dir.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let file_start = Instant::now();
            let outcome = convert_file(&converter, &path, operation, output_dir.as_deref()).await;
            let processing_time_ms = file_start.elapsed().as_millis() as u64;
            match outcome {
                Ok((output, bytes)) => FileResult {
                    path,
                    output: Some(output),
                    bytes,
                    error: None,
                    processing_time_ms,
                },
                Err(e) => FileResult {
                    path,
                    output: None,
                    bytes: 0,
                    error: Some(e.to_string()),
                    processing_time_ms,
                },
            }
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let result = joined?;
        overall_pb.inc(1);

        if let Some(error_msg) = &result.error {
            if args.continue_on_error {
                warn!("Failed to process {}: {}", result.path.display(), error_msg);
            } else {
                error!("Failed to process {}: {}", result.path.display(), error_msg);
                tasks.abort_all();
                overall_pb.abandon();
                anyhow::bail!("Processing failed: {}: {}", result.path.display(), error_msg);
            }
        }
        results.push(result);
    }

    overall_pb.finish_with_message("Complete");
    results.sort_by(|a, b| a.path.cmp(&b.path));

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(results.len() - failed.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

async fn convert_file(
    converter: &Converter,
    path: &Path,
    operation: OperationKind,
    output_dir: Option<&Path>,
) -> anyhow::Result<(PathBuf, usize)> {
    let document = read_source(path, operation)?;
    let result = run_conversion(converter, document, operation, None, |event| {
        debug!("{}: {}", path.display(), event);
    })
    .await?;

    let output_path = processed_path(path, output_dir, result.format);
    fs::write(&output_path, &result.bytes)?;
    debug!("Wrote output to {}", output_path.display());
    Ok((output_path, result.bytes.len()))
}

fn write_summary(path: &Path, results: &[FileResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "output",
        "bytes",
        "processing_time_ms",
        "error",
    ])?;

    for result in results {
        let filename = result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let output = result
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        wtr.write_record([
            filename,
            if result.error.is_some() { "error" } else { "success" },
            &output,
            &result.bytes.to_string(),
            &result.processing_time_ms.to_string(),
            result.error.as_deref().unwrap_or(""),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
