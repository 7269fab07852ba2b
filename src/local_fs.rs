//! Local filesystem collaborator backed by `tokio::fs`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use crate::traits::LocalFs;

/// [`LocalFs`] on the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

#[async_trait]
impl LocalFs for TokioFs {
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        // create_dir_all tolerates concurrent creation of the same tree
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display()))
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write file: {}", path.display()))
    }
}
