//! Per-document attachment migration.
//!
//! [`Migrator`] runs the whole pipeline for one document body:
//!
//! ```text
//! body ──▶ scan ──▶ resolve ─┬─▶ relocate (upload / local write)
//!                            └─▶ offset → replacement ──▶ rewrite ──▶ new body
//! ```
//!
//! References are resolved concurrently (bounded by `max_concurrency`);
//! the rewrite only starts once every reference has been resolved.
//! Relocation either runs inline ([`RewritePolicy::Confirmed`]) or on a
//! background task ([`RewritePolicy::Optimistic`]) that
//! [`Migrator::finish`] waits for at the end of a run. Either way at most
//! `max_concurrency` relocations hold a permit at once, across all
//! documents; an optimistic dispatch waits for a free permit before it
//! spawns.
//!
//! Nothing here returns an error to the caller. A missing attachment or a
//! failed upload costs one link, not the document.

use anyhow::{bail, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{Config, RewritePolicy};
use crate::local_fs::TokioFs;
use crate::models::{
    AttachmentReference, DestinationConfig, DestinationMode, MigratedBody, MigrationReport,
    ReplacementMap, SkipReason,
};
use crate::relocator::{RelocationJob, Relocator};
use crate::resolver::{Resolution, Resolver};
use crate::rewriter::rewrite;
use crate::scanner::scan_references;
use crate::source_http::HttpSourceClient;
use crate::store_s3::S3ObjectStore;
use crate::traits::{ObjectStore, SourceClient};

/// Default domain for rewritten object URLs.
pub const DEFAULT_PUBLIC_DOMAIN: &str = "s3.amazonaws.com";

/// What happened to one reference.
struct Processed {
    offset: usize,
    replacement: Option<String>,
    skipped: Option<SkipReason>,
    relocated: bool,
}

/// Migrates attachments for any number of documents of one run.
pub struct Migrator {
    destination: DestinationConfig,
    public_domain: String,
    source: Arc<dyn SourceClient>,
    relocator: Relocator,
    policy: RewritePolicy,
    max_concurrency: usize,
    io_timeout: Duration,
    permits: Arc<Semaphore>,
    pending: Mutex<JoinSet<()>>,
}

const DEFAULT_MAX_CONCURRENCY: usize = 8;

impl Migrator {
    /// Create a migrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination selects remote-store mode but
    /// the relocator has no object store to upload to.
    pub fn new(
        destination: DestinationConfig,
        source: Arc<dyn SourceClient>,
        relocator: Relocator,
    ) -> Result<Self> {
        if let DestinationMode::RemoteStore { bucket } = destination.mode() {
            if !relocator.has_store() {
                bail!("bucket '{}' configured but no object store available", bucket);
            }
        }

        Ok(Self {
            destination,
            public_domain: DEFAULT_PUBLIC_DOMAIN.to_string(),
            source,
            relocator,
            policy: RewritePolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            io_timeout: Duration::from_secs(60),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENCY)),
            pending: Mutex::new(JoinSet::new()),
        })
    }

    /// Build a migrator with the default HTTP source, S3 store and local
    /// filesystem from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let destination = config.destination.destination();
        let io_timeout = config.migration.io_timeout();

        let store: Option<Arc<dyn ObjectStore>> = match destination.mode() {
            DestinationMode::RemoteStore { .. } => Some(Arc::new(S3ObjectStore::from_env(
                &config.destination,
                io_timeout,
            )?)),
            DestinationMode::LocalSave => None,
        };

        let relocator = Relocator::new(
            store,
            Arc::new(TokioFs),
            config.destination.output_root.clone(),
            io_timeout,
        );
        let source = Arc::new(HttpSourceClient::new(&config.source)?);

        Ok(Self::new(destination, source, relocator)?
            .with_public_domain(&config.destination.public_domain)
            .with_policy(config.migration.rewrite_policy)
            .with_max_concurrency(config.migration.max_concurrency)
            .with_io_timeout(io_timeout))
    }

    pub fn with_public_domain(mut self, domain: &str) -> Self {
        self.public_domain = domain.to_string();
        self
    }

    pub fn with_policy(mut self, policy: RewritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self.permits = Arc::new(Semaphore::new(self.max_concurrency));
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Rewrite every attachment link in `body`, relocating the attachments.
    ///
    /// Always returns a body; references that could not be migrated are
    /// left as they were (remote-store mode) or pointed back at the source
    /// host (local-save mode).
    pub async fn migrate_attachments(&self, body: &str, destination_repo_id: Option<u64>) -> String {
        self.migrate(body, destination_repo_id).await.body
    }

    /// Like [`migrate_attachments`](Self::migrate_attachments), also
    /// returning a per-document report.
    pub async fn migrate(&self, body: &str, destination_repo_id: Option<u64>) -> MigratedBody {
        let references: Vec<AttachmentReference> = scan_references(body).collect();
        let mut report = MigrationReport {
            found: references.len(),
            ..Default::default()
        };

        if references.is_empty() {
            return MigratedBody {
                body: body.to_string(),
                report,
            };
        }

        let resolver = Resolver {
            destination: &self.destination,
            repo_id: destination_repo_id,
            public_domain: &self.public_domain,
            source: self.source.as_ref(),
            io_timeout: self.io_timeout,
        };

        let processed: Vec<Processed> = stream::iter(references)
            .map(|reference| self.process(&resolver, reference, destination_repo_id))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut replacements = ReplacementMap::with_capacity(processed.len());
        for item in processed {
            if let Some(reason) = item.skipped {
                report.record_skip(reason);
            }
            if item.relocated {
                report.relocations += 1;
            }
            match item.replacement {
                Some(text) => {
                    replacements.insert(item.offset, text);
                    report.rewritten += 1;
                }
                None => report.unchanged += 1,
            }
        }

        let body = rewrite(body, &replacements);
        info!(
            repo_id = ?destination_repo_id,
            found = report.found,
            rewritten = report.rewritten,
            unchanged = report.unchanged,
            fetch_failures = report.fetch_failures,
            malformed = report.malformed,
            "migrated attachments"
        );

        MigratedBody { body, report }
    }

    async fn process(
        &self,
        resolver: &Resolver<'_>,
        reference: AttachmentReference,
        repo_id: Option<u64>,
    ) -> Processed {
        let resolution = resolver.resolve(reference).await;
        let offset = resolution.offset();
        let replacement = resolution.replacement();

        match resolution {
            Resolution::Skip { reason, .. } => Processed {
                offset,
                replacement,
                skipped: Some(reason),
                relocated: false,
            },
            Resolution::Replace {
                attachment,
                placement,
                skipped,
            } => {
                let Some(bytes) = attachment.bytes else {
                    // Local-save mode: linked back to the source, nothing to store.
                    return Processed {
                        offset,
                        replacement,
                        skipped,
                        relocated: false,
                    };
                };

                let job = RelocationJob {
                    placement,
                    bytes,
                    locator: attachment.new_locator,
                    repo_id,
                };
                self.dispatch(job).await;

                Processed {
                    offset,
                    replacement,
                    skipped,
                    relocated: true,
                }
            }
        }
    }

    async fn dispatch(&self, job: RelocationJob) {
        // `permits` is never closed.
        let permit = self.permits.clone().acquire_owned().await.ok();

        match self.policy {
            RewritePolicy::Confirmed => {
                self.relocator.relocate(job).await;
                drop(permit);
            }
            RewritePolicy::Optimistic => {
                let relocator = self.relocator.clone();
                let mut pending = self.pending.lock().await;
                while let Some(joined) = pending.try_join_next() {
                    log_join_error(joined);
                }
                pending.spawn(async move {
                    let _permit = permit;
                    relocator.relocate(job).await;
                });
            }
        }
    }

    /// Wait for every background relocation started so far.
    ///
    /// Returns the total number of relocation failures seen by this
    /// migrator, including ones from confirmed relocations.
    pub async fn finish(&self) -> usize {
        let mut pending = self.pending.lock().await;
        while let Some(joined) = pending.join_next().await {
            log_join_error(joined);
        }
        self.relocator.failures()
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "relocation task did not complete");
    }
}
