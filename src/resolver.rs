//! Attachment resolver.
//!
//! Turns a scanned [`AttachmentReference`] into a decision: either the
//! reference is replaced (and possibly relocated), or it is left verbatim.
//!
//! # Remote-store mode
//!
//! The attachment is fetched first; a missing attachment leaves the link
//! untouched. Otherwise it is named by the SHA-256 of its source path:
//!
//! ```text
//! /uploads/a1b2/diagram.png
//!   → key  {repo_id}/{sha256(source_path)}/diagram.png
//!   → link https://{bucket}.{public_domain}/{key}
//! ```
//!
//! # Local-save mode
//!
//! The link always points back at the source host
//! (`{host}/{project_path}{source_path}`), malformed paths included; a copy
//! is saved locally only when the fetch succeeded.

use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{
    AttachmentReference, DestinationConfig, DestinationMode, ResolvedAttachment, SkipReason,
};
use crate::scanner::is_well_formed;
use crate::source_http::absolute_url;
use crate::traits::SourceClient;

/// Where a resolved attachment's bytes should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Remote {
        bucket: String,
        key: String,
        content_type: Option<&'static str>,
    },
    Local {
        file_name: String,
    },
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Replace the link with `attachment.new_locator`. Relocate the bytes if
    /// there are any. `skipped` records why there are none.
    Replace {
        attachment: ResolvedAttachment,
        placement: Placement,
        skipped: Option<SkipReason>,
    },
    /// Leave the original link text in place.
    Skip {
        reference: AttachmentReference,
        reason: SkipReason,
    },
}

impl Resolution {
    pub fn offset(&self) -> usize {
        match self {
            Resolution::Replace { attachment, .. } => attachment.reference.offset,
            Resolution::Skip { reference, .. } => reference.offset,
        }
    }

    /// Text to register in the replacement map, if any.
    pub fn replacement(&self) -> Option<String> {
        match self {
            Resolution::Replace { attachment, .. } => {
                Some(attachment.reference.render(&attachment.new_locator))
            }
            Resolution::Skip { .. } => None,
        }
    }
}

/// Per-document resolution context.
pub struct Resolver<'a> {
    pub destination: &'a DestinationConfig,
    pub repo_id: Option<u64>,
    pub public_domain: &'a str,
    pub source: &'a dyn SourceClient,
    pub io_timeout: Duration,
}

impl Resolver<'_> {
    pub async fn resolve(&self, reference: AttachmentReference) -> Resolution {
        let well_formed = is_well_formed(&reference.source_path);
        if !well_formed {
            warn!(path = %reference.source_path, "not fetching malformed attachment path");
        }

        match self.destination.mode() {
            DestinationMode::RemoteStore { .. } if !well_formed => Resolution::Skip {
                reference,
                reason: SkipReason::Malformed,
            },
            DestinationMode::RemoteStore { bucket } => self.resolve_remote(reference, bucket).await,
            DestinationMode::LocalSave if !well_formed => {
                self.link_back(reference, None, Some(SkipReason::Malformed))
            }
            DestinationMode::LocalSave => {
                let bytes = self.fetch(&reference.source_path).await;
                let skipped = bytes.is_none().then_some(SkipReason::FetchFailed);
                self.link_back(reference, bytes, skipped)
            }
        }
    }

    async fn resolve_remote(&self, reference: AttachmentReference, bucket: &str) -> Resolution {
        let basename = reference.basename().to_string();
        let content_type = content_type_for(&basename);

        let Some(bytes) = self.fetch(&reference.source_path).await else {
            return Resolution::Skip {
                reference,
                reason: SkipReason::FetchFailed,
            };
        };

        let key = storage_key(&reference.source_path, &basename, self.repo_id);
        let new_locator = public_url(bucket, self.public_domain, &key);
        debug!(path = %reference.source_path, url = %new_locator, "resolved attachment");

        Resolution::Replace {
            attachment: ResolvedAttachment {
                reference,
                new_locator,
                bytes: Some(bytes),
            },
            placement: Placement::Remote {
                bucket: bucket.to_string(),
                key,
                content_type,
            },
            skipped: None,
        }
    }

    /// Local-save mode: point the link back at the source host.
    fn link_back(
        &self,
        reference: AttachmentReference,
        bytes: Option<Vec<u8>>,
        skipped: Option<SkipReason>,
    ) -> Resolution {
        let new_locator = absolute_url(
            self.source.host(),
            self.source.project_path(),
            &reference.source_path,
        );
        let file_name = reference.basename().to_string();

        Resolution::Replace {
            attachment: ResolvedAttachment {
                reference,
                new_locator,
                bytes,
            },
            placement: Placement::Local { file_name },
            skipped,
        }
    }

    async fn fetch(&self, source_path: &str) -> Option<Vec<u8>> {
        match tokio::time::timeout(self.io_timeout, self.source.fetch_attachment(source_path)).await
        {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                warn!(path = %source_path, "attachment not available from source");
                None
            }
            Err(_) => {
                warn!(
                    path = %source_path,
                    timeout_secs = self.io_timeout.as_secs(),
                    "timed out fetching attachment"
                );
                None
            }
        }
    }
}

/// Object key for an attachment: `{repo_id}/{sha256(source_path)}/{basename}`,
/// without the repo segment when no repository id is known.
pub fn storage_key(source_path: &str, basename: &str, repo_id: Option<u64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    let name = format!("{}/{}", hex::encode(hasher.finalize()), basename);
    match repo_id {
        Some(id) => format!("{}/{}", id, name),
        None => name,
    }
}

/// Virtual-hosted-style URL for an object.
pub fn public_url(bucket: &str, domain: &str, key: &str) -> String {
    format!("https://{}.{}/{}", bucket, domain, key)
}

/// Look up a MIME type from a file name's extension.
///
/// Returns `None` for unknown extensions; such objects are uploaded
/// untyped.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ct = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => return None,
    };
    Some(ct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const DIAGRAM_HASH: &str = "cb9553ed835c76ad3af732d5420320969ae2f8b93552efa520c6d8d60d8e86bc";

    struct FixedSource {
        bytes: Option<Vec<u8>>,
    }

    #[async_trait]
    impl SourceClient for FixedSource {
        async fn fetch_attachment(&self, _source_path: &str) -> Option<Vec<u8>> {
            self.bytes.clone()
        }
        fn host(&self) -> &str {
            "https://gitlab.example.com"
        }
        fn project_path(&self) -> &str {
            "team/proj"
        }
    }

    fn diagram() -> AttachmentReference {
        AttachmentReference {
            offset: 4,
            is_embed: true,
            label: "diagram".to_string(),
            source_path: "/uploads/a1b2/diagram.png".to_string(),
        }
    }

    fn resolver<'a>(
        destination: &'a DestinationConfig,
        source: &'a FixedSource,
        repo_id: Option<u64>,
    ) -> Resolver<'a> {
        Resolver {
            destination,
            repo_id,
            public_domain: "s3.amazonaws.com",
            source,
            io_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_storage_key() {
        let key = storage_key("/uploads/a1b2/diagram.png", "diagram.png", None);
        assert_eq!(key, format!("{}/diagram.png", DIAGRAM_HASH));

        let key = storage_key("/uploads/a1b2/diagram.png", "diagram.png", Some(42));
        assert_eq!(key, format!("42/{}/diagram.png", DIAGRAM_HASH));
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        let a = storage_key("/uploads/x/y.pdf", "y.pdf", Some(1));
        let b = storage_key("/uploads/x/y.pdf", "y.pdf", Some(1));
        assert_eq!(a, b);
        assert_ne!(a, storage_key("/uploads/z/y.pdf", "y.pdf", Some(1)));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("diagram.png"), Some("image/png"));
        assert_eq!(content_type_for("PHOTO.JPG"), Some("image/jpeg"));
        assert_eq!(content_type_for("notes.pdf"), Some("application/pdf"));
        assert_eq!(content_type_for("blob.xyz"), None);
        assert_eq!(content_type_for("README"), None);
    }

    #[tokio::test]
    async fn test_remote_success() {
        let destination = DestinationConfig::remote("mybucket");
        let source = FixedSource {
            bytes: Some(b"png".to_vec()),
        };
        let resolution = resolver(&destination, &source, None).resolve(diagram()).await;

        assert_eq!(
            resolution.replacement().unwrap(),
            format!(
                "![diagram](https://mybucket.s3.amazonaws.com/{}/diagram.png)",
                DIAGRAM_HASH
            )
        );
        match resolution {
            Resolution::Replace {
                placement,
                attachment,
                skipped,
            } => {
                assert!(skipped.is_none());
                assert_eq!(attachment.bytes.as_deref(), Some(&b"png"[..]));
                assert_eq!(
                    placement,
                    Placement::Remote {
                        bucket: "mybucket".to_string(),
                        key: format!("{}/diagram.png", DIAGRAM_HASH),
                        content_type: Some("image/png"),
                    }
                );
            }
            other => panic!("expected replacement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_fetch_failure_skips() {
        let destination = DestinationConfig::remote("mybucket");
        let source = FixedSource { bytes: None };
        let resolution = resolver(&destination, &source, Some(3)).resolve(diagram()).await;

        assert_eq!(resolution.offset(), 4);
        assert!(resolution.replacement().is_none());
        assert!(matches!(
            resolution,
            Resolution::Skip {
                reason: SkipReason::FetchFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_local_rewrites_even_without_bytes() {
        let destination = DestinationConfig::local();
        let source = FixedSource { bytes: None };
        let resolution = resolver(&destination, &source, Some(3)).resolve(diagram()).await;

        assert_eq!(
            resolution.replacement().unwrap(),
            "![diagram](https://gitlab.example.com/team/proj/uploads/a1b2/diagram.png)"
        );
        match resolution {
            Resolution::Replace {
                placement,
                attachment,
                skipped,
            } => {
                assert_eq!(skipped, Some(SkipReason::FetchFailed));
                assert!(attachment.bytes.is_none());
                assert_eq!(
                    placement,
                    Placement::Local {
                        file_name: "diagram.png".to_string()
                    }
                );
            }
            other => panic!("expected replacement, got {:?}", other),
        }
    }

    struct CountingSource {
        fetches: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SourceClient for CountingSource {
        async fn fetch_attachment(&self, _source_path: &str) -> Option<Vec<u8>> {
            self.fetches
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Some(b"x".to_vec())
        }
        fn host(&self) -> &str {
            "https://gitlab.example.com"
        }
        fn project_path(&self) -> &str {
            "team/proj"
        }
    }

    #[tokio::test]
    async fn test_malformed_path_is_skipped_in_remote_mode() {
        let destination = DestinationConfig::remote("b");
        let source = CountingSource {
            fetches: Default::default(),
        };
        let mut reference = diagram();
        reference.source_path = "/uploads/../etc/passwd".to_string();

        let resolution = Resolver {
            destination: &destination,
            repo_id: None,
            public_domain: "s3.amazonaws.com",
            source: &source,
            io_timeout: Duration::from_secs(5),
        }
        .resolve(reference)
        .await;

        assert!(matches!(
            resolution,
            Resolution::Skip {
                reason: SkipReason::Malformed,
                ..
            }
        ));
        assert_eq!(source.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_path_links_back_in_local_mode() {
        let destination = DestinationConfig::local();
        let source = CountingSource {
            fetches: Default::default(),
        };
        let mut reference = diagram();
        reference.source_path = "/uploads/abc/".to_string();

        let resolution = Resolver {
            destination: &destination,
            repo_id: Some(3),
            public_domain: "s3.amazonaws.com",
            source: &source,
            io_timeout: Duration::from_secs(5),
        }
        .resolve(reference)
        .await;

        assert_eq!(
            resolution.replacement().unwrap(),
            "![diagram](https://gitlab.example.com/team/proj/uploads/abc/)"
        );
        match resolution {
            Resolution::Replace {
                attachment,
                skipped,
                ..
            } => {
                assert_eq!(skipped, Some(SkipReason::Malformed));
                assert!(attachment.bytes.is_none());
            }
            other => panic!("expected replacement, got {:?}", other),
        }
        assert_eq!(source.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
