//! `doconv`: convert PDF, Word and PowerPoint files without leaving the
//! machine.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use commands::{GlobalOptions, batch, config, convert, inspect};

/// doconv - Convert PDF, Word and PowerPoint files locally
#[derive(Parser)]
#[command(name = "doconv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log level, overriding -v; RUST_LOG takes precedence over both
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Cli {
    /// Directives for this tool's crates; dependencies stay at `warn`.
    fn log_directives(&self) -> String {
        let level = match self.log_level {
            Some(LogLevel::Error) => "error",
            Some(LogLevel::Warn) => "warn",
            Some(LogLevel::Info) => "info",
            Some(LogLevel::Debug) => "debug",
            Some(LogLevel::Trace) => "trace",
            None => match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            },
        };
        format!("warn,doconv={level},doconv_core={level}")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a single document
    Convert(convert::ConvertArgs),

    /// Convert multiple documents
    Batch(batch::BatchArgs),

    /// Show format and size of documents
    Inspect(inspect::InspectArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directives()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Convert(args) => convert::run(args, &cli.global).await,
        Commands::Batch(args) => batch::run(args, &cli.global).await,
        Commands::Inspect(args) => inspect::run(args, &cli.global).await,
        Commands::Config(args) => config::run(args, cli.global.config.as_deref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_maps_to_directives() {
        let cli = Cli::parse_from(["doconv", "-vv", "config", "path"]);
        assert_eq!(cli.log_directives(), "warn,doconv=debug,doconv_core=debug");
    }

    #[test]
    fn test_log_level_overrides_verbosity() {
        let cli = Cli::parse_from(["doconv", "-vvv", "--log-level", "error", "config", "path"]);
        assert_eq!(cli.log_directives(), "warn,doconv=error,doconv_core=error");
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::parse_from([
            "doconv",
            "convert",
            "in.pdf",
            "-p",
            "pdf-to-word",
            "--max-opacity",
            "0.2",
            "--text-strategy",
            "layout",
        ]);
        assert_eq!(cli.global.max_opacity, Some(0.2));
        assert!(matches!(
            cli.global.text_strategy,
            Some(commands::TextStrategyArg::Layout)
        ));
    }

    #[test]
    fn test_out_of_range_opacity_rejected() {
        assert!(Cli::try_parse_from(["doconv", "--max-opacity", "3", "config", "path"]).is_err());
    }
}
