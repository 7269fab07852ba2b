//! # Attachment Migrate CLI (`attachment-migrate`)
//!
//! Runs the attachment migration engine over a single document body.
//!
//! ## Usage
//!
//! ```bash
//! attachment-migrate --config ./config/migrate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `attachment-migrate migrate [FILE] --repo-id <ID>` | Migrate attachments and print the rewritten body |
//! | `attachment-migrate scan [FILE]` | List attachment references as JSON lines |
//! | `attachment-migrate key <PATH> [--repo-id <ID>]` | Print the storage key for an upload path |
//!
//! `FILE` defaults to stdin. The rewritten body goes to stdout; logs go to
//! stderr (filter with `RUST_LOG`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attachment_migrate::config;
use attachment_migrate::migrate::Migrator;
use attachment_migrate::models::{basename, AttachmentReference};
use attachment_migrate::resolver::storage_key;
use attachment_migrate::scanner::scan_references;

/// Migrate inline attachments out of issue and comment bodies.
#[derive(Parser)]
#[command(name = "attachment-migrate", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/migrate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relocate every `/uploads/` attachment in a document and print the
    /// rewritten document.
    Migrate {
        /// Document to migrate. Reads stdin when omitted.
        input: Option<PathBuf>,

        /// Destination repository id, used to namespace stored attachments.
        #[arg(long)]
        repo_id: Option<u64>,
    },

    /// List attachment references found in a document, one JSON object per
    /// line. Does not touch the network.
    Scan {
        /// Document to scan. Reads stdin when omitted.
        input: Option<PathBuf>,
    },

    /// Print the object key an upload path would be stored under.
    Key {
        /// Upload path as it appears in the document (`/uploads/...`).
        source_path: String,

        #[arg(long)]
        repo_id: Option<u64>,
    },
}

fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Scan { input } => {
            let body = read_input(input.as_deref())?;
            let references: Vec<AttachmentReference> = scan_references(&body).collect();
            for reference in &references {
                println!("{}", serde_json::to_string(reference)?);
            }
            return Ok(());
        }
        Commands::Key {
            source_path,
            repo_id,
        } => {
            println!(
                "{}",
                storage_key(source_path, basename(source_path), *repo_id)
            );
            return Ok(());
        }
        Commands::Migrate { .. } => {}
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Migrate { input, repo_id } = cli.command {
        let body = read_input(input.as_deref())?;
        let migrator = Migrator::from_config(&cfg)?;

        let migrated = migrator.migrate(&body, repo_id).await;
        print!("{}", migrated.body);

        let failures = migrator.finish().await;
        if failures > 0 {
            warn!(failures, "some attachments could not be relocated");
        }
        info!(
            found = migrated.report.found,
            rewritten = migrated.report.rewritten,
            relocations = migrated.report.relocations,
            "done"
        );
    }

    Ok(())
}
