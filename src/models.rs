//! Core data models used throughout the attachment migration engine.
//!
//! These types describe a single attachment reference as it appears in a
//! document body, the outcome of resolving it, and the offset-keyed map the
//! rewriter consumes.

use serde::Serialize;
use std::collections::HashMap;

/// One attachment link found in a document body.
///
/// `offset` is the byte offset of the first character of the match
/// (the `!` for embeds, otherwise the `[`) in the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentReference {
    pub offset: usize,
    pub is_embed: bool,
    pub label: String,
    pub source_path: String,
}

impl AttachmentReference {
    /// The embed marker to re-emit in front of the rewritten link.
    pub fn marker(&self) -> &'static str {
        if self.is_embed {
            "!"
        } else {
            ""
        }
    }

    /// Last path segment of the source path (`diagram.png` for
    /// `/uploads/a1b2/diagram.png`).
    pub fn basename(&self) -> &str {
        basename(&self.source_path)
    }

    /// Render this reference as a link pointing at `locator`, keeping the
    /// original marker and label.
    pub fn render(&self, locator: &str) -> String {
        format!("{}[{}]({})", self.marker(), self.label, locator)
    }
}

/// Last `/`-separated segment of `path`; empty when `path` ends in `/`.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Result of resolving one reference.
///
/// `bytes` is `None` when the source system returned nothing; such a
/// reference is never relocated.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub reference: AttachmentReference,
    pub new_locator: String,
    pub bytes: Option<Vec<u8>>,
}

/// Replacement text keyed by the byte offset of the match it replaces.
pub type ReplacementMap = HashMap<usize, String>;

/// Where relocated attachments go for the whole run.
///
/// A bucket selects remote-store mode; no bucket selects local-save mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationConfig {
    pub bucket: Option<String>,
}

impl DestinationConfig {
    pub fn remote(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
        }
    }

    pub fn local() -> Self {
        Self { bucket: None }
    }

    pub fn mode(&self) -> DestinationMode<'_> {
        match self.bucket.as_deref() {
            Some(bucket) if !bucket.is_empty() => DestinationMode::RemoteStore { bucket },
            _ => DestinationMode::LocalSave,
        }
    }
}

/// Destination strategy selected by [`DestinationConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationMode<'a> {
    RemoteStore { bucket: &'a str },
    LocalSave,
}

/// Why a reference was not migrated: left verbatim, or linked back to the
/// source without a local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FetchFailed,
    Malformed,
}

/// Per-document tally of what the engine did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// References found by the scanner.
    pub found: usize,
    /// References whose text was replaced.
    pub rewritten: usize,
    /// References left verbatim.
    pub unchanged: usize,
    pub fetch_failures: usize,
    pub malformed: usize,
    /// Uploads or local writes started for this document.
    pub relocations: usize,
}

impl MigrationReport {
    pub(crate) fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::FetchFailed => self.fetch_failures += 1,
            SkipReason::Malformed => self.malformed += 1,
        }
    }
}

/// A migrated document body together with its report.
#[derive(Debug, Clone)]
pub struct MigratedBody {
    pub body: String,
    pub report: MigrationReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(is_embed: bool) -> AttachmentReference {
        AttachmentReference {
            offset: 4,
            is_embed,
            label: "diagram".to_string(),
            source_path: "/uploads/a1b2/diagram.png".to_string(),
        }
    }

    #[test]
    fn test_basename() {
        assert_eq!(reference(true).basename(), "diagram.png");
        assert_eq!(basename("/uploads/ff/notes.pdf"), "notes.pdf");
        assert_eq!(basename("/uploads/abc/"), "");
        assert_eq!(basename("README"), "README");
    }

    #[test]
    fn test_render_keeps_marker_and_label() {
        assert_eq!(
            reference(true).render("https://x/y.png"),
            "![diagram](https://x/y.png)"
        );
        assert_eq!(
            reference(false).render("https://x/y.png"),
            "[diagram](https://x/y.png)"
        );
    }

    #[test]
    fn test_destination_mode() {
        assert_eq!(
            DestinationConfig::remote("mybucket").mode(),
            DestinationMode::RemoteStore { bucket: "mybucket" }
        );
        assert_eq!(DestinationConfig::local().mode(), DestinationMode::LocalSave);
        // An empty bucket name cannot address anything.
        assert_eq!(DestinationConfig::remote("").mode(), DestinationMode::LocalSave);
    }
}
