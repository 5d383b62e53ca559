//! Info command - describe a document.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::{info, warn};

use djrender_core::{
    DocumentFormat, FOREIGN_PLACEHOLDER_SIZE, ForeignRenderer, PageSize, PdfProbe, Session,
    SessionConfig,
};

use super::engine;

/// Arguments for the info command.
#[derive(Args)]
pub struct InfoArgs {
    /// Input document (DjVu or PDF)
    #[arg(required = true)]
    input: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

/// Description of a loaded document.
#[derive(Debug, Serialize)]
struct DocumentInfo {
    path: PathBuf,
    format: DocumentFormat,
    page_count: usize,
    pages: Vec<PageEntry>,
}

#[derive(Debug, Serialize)]
struct PageEntry {
    /// Page number (1-indexed).
    number: usize,
    width: u32,
    height: u32,
}

pub async fn run(args: InfoArgs, config: SessionConfig) -> anyhow::Result<()> {
    let engine = engine::default_engine();
    let mut session = Session::with_config(engine.as_ref(), config)?;

    info!("Inspecting {}", args.input.display());
    let document = match session.load(&args.input)? {
        DocumentFormat::Native => native_info(&session, &args.input)?,
        DocumentFormat::Foreign => foreign_info(&args.input),
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&document)?),
        OutputFormat::Text => print_text(&document),
    }

    Ok(())
}

fn native_info(session: &Session, path: &Path) -> anyhow::Result<DocumentInfo> {
    let page_count = usize::try_from(session.page_count())?;
    let pages = (0..page_count)
        .map(|index| {
            let size = session.page_dimensions(index)?;
            Ok(entry(index, size))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(DocumentInfo {
        path: path.to_path_buf(),
        format: DocumentFormat::Native,
        page_count,
        pages,
    })
}

/// Ask the PDF probe; a document it cannot parse still gets the placeholder.
fn foreign_info(path: &Path) -> DocumentInfo {
    let pages = match PdfProbe::open(path) {
        Ok(probe) => (0..probe.page_count())
            .map(|index| {
                let size = probe.page_size(index).unwrap_or_else(|e| {
                    warn!("Page {} has no usable size: {}", index + 1, e);
                    FOREIGN_PLACEHOLDER_SIZE
                });
                entry(index, size)
            })
            .collect(),
        Err(e) => {
            warn!("Could not probe {}: {}", path.display(), e);
            vec![entry(0, FOREIGN_PLACEHOLDER_SIZE)]
        }
    };

    DocumentInfo {
        path: path.to_path_buf(),
        format: DocumentFormat::Foreign,
        page_count: pages.len(),
        pages,
    }
}

fn entry(index: usize, size: PageSize) -> PageEntry {
    PageEntry {
        number: index + 1,
        width: size.width,
        height: size.height,
    }
}

fn print_text(document: &DocumentInfo) {
    let format = match document.format {
        DocumentFormat::Native => style("native").green(),
        DocumentFormat::Foreign => style("foreign").yellow(),
    };

    println!("File:   {}", document.path.display());
    println!("Format: {}", format);
    println!("Pages:  {}", document.page_count);
    for page in &document.pages {
        println!("  {:>4}  {} x {}", page.number, page.width, page.height);
    }
}
