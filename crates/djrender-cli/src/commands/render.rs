//! Render command - rasterize pages to PNG files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use image::RgbaImage;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use djrender_core::{DocumentFormat, PageRequest, PageSize, RenderOutcome, Session, SessionConfig};

use super::engine;

/// Arguments for the render command.
#[derive(Args)]
pub struct RenderArgs {
    /// Input document
    #[arg(required = true)]
    input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Page to render (1-indexed); all pages if omitted
    #[arg(short, long)]
    page: Option<usize>,

    /// Output width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Scale relative to the page's stored size
    #[arg(short, long, default_value = "1.0", conflicts_with_all = ["width", "height"])]
    scale: f32,

    /// Number of pages rendered at once
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,
}

/// Output size for a page: explicit sides win, a single side keeps the page's
/// aspect ratio, otherwise the stored size is scaled.
fn target_size(native: PageSize, width: Option<u32>, height: Option<u32>, scale: f32) -> PageSize {
    let ratio = |a: u32, b: u32| a as f64 / b.max(1) as f64;
    match (width, height) {
        (Some(width), Some(height)) => PageSize::new(width, height),
        (Some(width), None) => PageSize::new(
            width,
            ((width as f64 * ratio(native.height, native.width)).round() as u32).max(1),
        ),
        (None, Some(height)) => PageSize::new(
            ((height as f64 * ratio(native.width, native.height)).round() as u32).max(1),
            height,
        ),
        (None, None) => native.scaled(scale),
    }
}

fn output_path(dir: &Path, input: &Path, index: usize) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("page");
    dir.join(format!("{}-{:04}.png", stem, index + 1))
}

/// Settings shared by every page task.
struct Job {
    input: PathBuf,
    output_dir: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    scale: f32,
}

fn render_one(session: &Session, job: &Job, index: usize) -> anyhow::Result<PathBuf> {
    let native = session.page_dimensions(index)?;
    let size = target_size(native, job.width, job.height, job.scale);
    debug!(
        "Page {}: {}x{} -> {}x{}",
        index + 1,
        native.width,
        native.height,
        size.width,
        size.height
    );

    // Checked before the buffer is allocated.
    session.config().limits.check(size.width, size.height)?;
    let request = PageRequest::new(index, size.width, size.height);
    let mut buffer = vec![0u8; request.rgba_len()];

    match session.render_page(index, size.width, size.height, &mut buffer)? {
        RenderOutcome::Rendered => {}
        RenderOutcome::Delegate => {
            anyhow::bail!("page {} belongs to the foreign renderer", index + 1)
        }
    }

    let image = RgbaImage::from_raw(size.width, size.height, buffer).ok_or_else(|| {
        anyhow::anyhow!("render buffer does not match {}x{}", size.width, size.height)
    })?;
    let path = output_path(&job.output_dir, &job.input, index);
    image.save(&path)?;
    Ok(path)
}

pub async fn run(args: RenderArgs, config: SessionConfig) -> anyhow::Result<()> {
    let start = Instant::now();
    let engine = engine::default_engine();
    let mut session = Session::with_config(engine.as_ref(), config)?;

    if session.load(&args.input)? == DocumentFormat::Foreign {
        println!(
            "{} {} is rendered by the foreign renderer; nothing to do.",
            style("ℹ").blue(),
            args.input.display()
        );
        return Ok(());
    }

    let page_count = usize::try_from(session.page_count())?;
    let pages: Vec<usize> = match args.page {
        Some(0) => anyhow::bail!("Page numbers start at 1"),
        Some(number) if number > page_count => {
            anyhow::bail!("Page {} out of range (document has {} pages)", number, page_count)
        }
        Some(number) => vec![number - 1],
        None => (0..page_count).collect(),
    };

    fs::create_dir_all(&args.output_dir)?;
    info!("Rendering {} pages of {}", pages.len(), args.input.display());

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages",
            )?
            .progress_chars("=>-"),
    );

    let session = Arc::new(session);
    let job = Arc::new(Job {
        input: args.input.clone(),
        output_dir: args.output_dir.clone(),
        width: args.width,
        height: args.height,
        scale: args.scale,
    });
    let permits = Arc::new(Semaphore::new(args.jobs.max(1)));

    let mut tasks = Vec::with_capacity(pages.len());
    for index in pages {
        let session = Arc::clone(&session);
        let job = Arc::clone(&job);
        let permit = Arc::clone(&permits).acquire_owned().await?;
        tasks.push((
            index,
            tokio::task::spawn_blocking(move || {
                let result = render_one(&session, &job, index);
                drop(permit);
                result
            }),
        ));
    }

    let total = tasks.len();
    let mut failures = 0usize;
    for (index, task) in tasks {
        match task.await? {
            Ok(path) => debug!("Wrote {}", path.display()),
            Err(e) => {
                failures += 1;
                warn!("Page {} failed: {}", index + 1, e);
                pb.println(format!("{} Page {}: {}", style("✗").red(), index + 1, e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let rendered = total - failures;
    println!(
        "{} Rendered {} pages to {} in {:.2}s",
        style("✓").green(),
        rendered,
        args.output_dir.display(),
        start.elapsed().as_secs_f64()
    );

    if failures > 0 {
        anyhow::bail!("{} pages failed to render", failures);
    }

    Ok(())
}
