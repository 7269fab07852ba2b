//! TOML configuration.
//!
//! ```toml
//! [source]
//! host = "https://gitlab.example.com"
//! project_path = "team/proj"
//! # token = "glpat-..."            # or GITLAB_TOKEN
//!
//! [destination]
//! bucket = "migrated-attachments"   # omit for local-save mode
//! region = "us-east-1"
//! output_root = "./_output"
//!
//! [migration]
//! rewrite_policy = "optimistic"     # or "confirmed"
//! max_concurrency = 8
//! io_timeout_secs = 60
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::DestinationConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationSettings,
    #[serde(default)]
    pub migration: MigrationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub host: String,
    pub project_path: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_source_timeout_secs() -> u64 {
    30
}

impl SourceConfig {
    /// Configured token, falling back to `GITLAB_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GITLAB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DestinationSettings {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Domain used in rewritten links: `https://{bucket}.{public_domain}/{key}`.
    #[serde(default = "default_public_domain")]
    pub public_domain: String,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

impl Default for DestinationSettings {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            public_domain: default_public_domain(),
            output_root: default_output_root(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_public_domain() -> String {
    "s3.amazonaws.com".to_string()
}
fn default_output_root() -> PathBuf {
    PathBuf::from("./_output")
}

impl DestinationSettings {
    pub fn destination(&self) -> DestinationConfig {
        DestinationConfig {
            bucket: self.bucket.clone(),
        }
    }
}

/// Whether a rewritten link waits for its attachment to be stored.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RewritePolicy {
    /// Rewrite immediately and relocate in the background.
    #[default]
    Optimistic,
    /// Await the upload or write before returning the document.
    Confirmed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MigrationConfig {
    #[serde(default)]
    pub rewrite_policy: RewritePolicy,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            rewrite_policy: RewritePolicy::default(),
            max_concurrency: default_max_concurrency(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}
fn default_io_timeout_secs() -> u64 {
    60
}

impl MigrationConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    let host = config.source.host.trim();
    if !(host.starts_with("http://") || host.starts_with("https://")) {
        bail!(
            "source.host must start with http:// or https://, got '{}'",
            config.source.host
        );
    }

    if let Some(ref bucket) = config.destination.bucket {
        if bucket.trim().is_empty() {
            bail!("destination.bucket must not be empty; omit it for local-save mode");
        }
    }

    if config.migration.max_concurrency == 0 {
        bail!("migration.max_concurrency must be > 0");
    }

    if config.migration.io_timeout_secs == 0 {
        bail!("migration.io_timeout_secs must be > 0");
    }

    Ok(config)
}
