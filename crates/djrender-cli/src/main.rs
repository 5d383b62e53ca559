//! CLI application for inspecting and rendering DjVu documents.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use commands::{config, info, render};

/// djrender - Inspect and rasterize DjVu documents
#[derive(Parser)]
#[command(name = "djrender")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv engine messages); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Settings file (defaults to the user config file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show format, page count and page sizes of a document
    Info(info::InfoArgs),

    /// Render pages to PNG files
    Render(render::RenderArgs),

    /// Manage settings files
    Config(config::ConfigArgs),
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Logs go to stderr so rendered output and JSON on stdout stay clean.
fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level())?;

    let explicit = cli.config.as_deref();
    match cli.command {
        Commands::Info(args) => info::run(args, config::load(explicit)?).await,
        Commands::Render(args) => render::run(args, config::load(explicit)?).await,
        Commands::Config(args) => config::run(args, explicit).await,
    }
}
