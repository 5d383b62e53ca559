//! Config command - locate, create and check session settings.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use console::style;
use tracing::debug;

use djrender_core::SessionConfig;

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the settings in effect and where they come from
    Show,

    /// Write the built-in settings to a file
    Init {
        /// Destination (defaults to the user config file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check a config file for settings that make every load or render fail
    Check {
        /// File to check (defaults to the file in effect)
        file: Option<PathBuf>,
    },

    /// Print the user config file location
    Path,
}

/// `~/.config/djrender/config.json` or the platform equivalent.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("djrender")
        .join("config.json")
}

/// The file settings are read from: `--config` if given, else the user file
/// when it exists.
fn source(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(default_config_path()).filter(|path| path.exists()),
    }
}

/// Settings for a session: the resolved file, or built-in defaults.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<SessionConfig> {
    match source(explicit) {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            SessionConfig::from_file(&path)
                .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))
        }
        None => Ok(SessionConfig::default()),
    }
}

pub async fn run(args: ConfigArgs, explicit: Option<&Path>) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => show(explicit),
        ConfigCommand::Init { output, force } => init(output, force),
        ConfigCommand::Check { file } => check(file.as_deref().or(explicit)),
        ConfigCommand::Path => show_path(),
    }
}

fn show(explicit: Option<&Path>) -> anyhow::Result<()> {
    match source(explicit) {
        Some(path) => println!("{} {}", style("Source:").bold(), path.display()),
        None => println!("{} built-in defaults", style("Source:").bold()),
    }
    println!("{}", serde_json::to_string_pretty(&load(explicit)?)?);
    Ok(())
}

fn init(output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    SessionConfig::default().save(&path)?;

    println!("{} Wrote {}", style("✓").green(), path.display());
    Ok(())
}

fn check(file: Option<&Path>) -> anyhow::Result<()> {
    let config = load(file)?;
    let problems = problems(&config);

    for problem in &problems {
        println!("{} {}", style("✗").red(), problem);
    }
    if !problems.is_empty() {
        anyhow::bail!("{} problems in config", problems.len());
    }

    println!(
        "{} Renders up to {} px per side, {} px total",
        style("✓").green(),
        config.limits.max_dimension,
        config.limits.max_total_pixels
    );
    println!(
        "{} Waits at most {:.1}s for a document, {:.1}s for a page",
        style("✓").green(),
        config.document_wait.ceiling().as_secs_f64(),
        config.page_wait.ceiling().as_secs_f64()
    );
    Ok(())
}

/// Settings that parse but cannot work.
fn problems(config: &SessionConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if config.limits.max_dimension == 0 || config.limits.max_total_pixels == 0 {
        problems.push("render limits of 0 reject every page".to_string());
    }
    for (name, budget) in [
        ("document_wait", config.document_wait),
        ("page_wait", config.page_wait),
    ] {
        if budget.max_attempts == 0 {
            problems.push(format!("{}.max_attempts is 0, so every wait times out", name));
        }
    }
    for extension in &config.foreign_extensions {
        if extension.is_empty() || extension.starts_with('.') {
            problems.push(format!(
                "foreign extension {:?} never matches; give it without the dot",
                extension
            ));
        }
    }

    problems
}

fn show_path() -> anyhow::Result<()> {
    let path = default_config_path();
    let state = if path.exists() {
        style("exists").green()
    } else {
        style("not created").yellow()
    };
    println!("{} ({})", path.display(), state);
    Ok(())
}
