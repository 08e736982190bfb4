#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use decency::Decency;
use decency_filter::{CorpusLabel, train::ConsumedAction};

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

#[derive(Parser)]
#[command(name = "decency", about = "Anti-spam / anti-virus content filter")]
struct Cli {
    /// Configuration file; falls back to ./decency.config.ron and
    /// /etc/decency/decency.config.ron.
    #[arg(long, env = "DECENCY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the content-filter daemon.
    Serve,

    /// Feed a labeled corpus through every trainable module.
    Train {
        /// Directory of raw message files.
        corpus: PathBuf,

        /// What the corpus contains.
        #[arg(value_enum)]
        label: Label,

        /// Move consumed files here instead of leaving them in place.
        #[arg(long, conflicts_with = "delete")]
        move_to: Option<PathBuf>,

        /// Delete consumed files.
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Label {
    Spam,
    Ham,
}

impl From<Label> for CorpusLabel {
    fn from(label: Label) -> Self {
        match label {
            Label::Spam => Self::Spam,
            Label::Ham => Self::Ham,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config)?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|err| {
        anyhow::anyhow!("Failed to read config from {}: {err}", config_path.display())
    })?;
    let decency: Decency = ron::from_str(&config_content)?;

    match cli.command {
        Command::Serve => decency.run().await,

        Command::Train {
            corpus,
            label,
            move_to,
            delete,
        } => {
            let action = if delete {
                ConsumedAction::Delete
            } else {
                move_to.map_or(ConsumedAction::Keep, ConsumedAction::MoveTo)
            };

            let report = decency.train(&corpus, label.into(), action).await?;

            println!("Trained on {} corpus files", report.files);
            for (module, outcome) in &report.modules {
                println!(
                    "  {module}: not_required={} trained={} errors={}",
                    outcome.not_required, outcome.trained, outcome.errors
                );
            }

            Ok(())
        }
    }
}

/// Configuration file precedence: `--config` / `DECENCY_CONFIG`, then the
/// working directory, then the system-wide location.
fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Configuration file does not exist: {}", path.display());
    }

    let default_paths = [
        PathBuf::from("./decency.config.ron"),
        PathBuf::from("/etc/decency/decency.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!("No configuration file found. Tried:\n{paths_tried}")
}
