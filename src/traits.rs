//! Collaborator traits consumed by the migration engine.
//!
//! The engine never talks to the network or the filesystem directly. It
//! goes through three narrow capabilities, each with a default
//! implementation in this crate and trivially fakeable in tests:
//!
//! ```text
//! ┌──────────────┐   fetch    ┌──────────────┐
//! │ SourceClient │──────────▶│   Migrator    │
//! └──────────────┘            └──────┬───────┘
//!                      put_object    │    ensure_dir / write_file
//!                   ┌────────────────┴───────────────┐
//!                   ▼                                ▼
//!            ┌─────────────┐                  ┌───────────┐
//!            │ ObjectStore │                  │  LocalFs  │
//!            └─────────────┘                  └───────────┘
//! ```
//!
//! | Trait | Default implementation |
//! |-------|------------------------|
//! | [`SourceClient`] | [`crate::source_http::HttpSourceClient`] |
//! | [`ObjectStore`] | [`crate::store_s3::S3ObjectStore`] |
//! | [`LocalFs`] | [`crate::local_fs::TokioFs`] |

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

// ═══════════════════════════════════════════════════════════════════════
// Source system
// ═══════════════════════════════════════════════════════════════════════

/// The system attachments are migrated away from.
///
/// Fetch failures are reported as `None`, never as an error: the engine
/// treats a missing attachment as a skip, not a reason to stop.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Download the attachment at `source_path` (e.g. `/uploads/a1b2/x.png`).
    async fn fetch_attachment(&self, source_path: &str) -> Option<Vec<u8>>;

    /// Base URL of the source host, with or without a trailing slash.
    fn host(&self) -> &str;

    /// Project path on the source host (e.g. `team/proj`).
    fn project_path(&self) -> &str;
}

// ═══════════════════════════════════════════════════════════════════════
// Destinations
// ═══════════════════════════════════════════════════════════════════════

/// Remote object storage addressed by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` at `bucket/key`. `content_type` may be unknown.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()>;
}

/// Local filesystem used by local-save mode.
#[async_trait]
pub trait LocalFs: Send + Sync {
    /// Create `path` and any missing parents. Succeeds if it already exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()>;

    /// Write `data` to `path`, replacing any existing file.
    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()>;
}
