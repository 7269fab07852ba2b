//! # Attachment Migrate
//!
//! Moves inline attachments referenced from issue and comment bodies off a
//! source host and rewrites the links that point at them.
//!
//! Each document body goes through four stages:
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Scanner │──▶│ Resolver │──▶│ Relocator │   │ Rewriter │
//! └─────────┘   └────┬─────┘   │ S3 / disk │   └────▲─────┘
//!                    │         └───────────┘        │
//!                    └──── offset → replacement ────┘
//! ```
//!
//! With a destination bucket, attachments are uploaded to S3 and links point
//! at `https://{bucket}.s3.amazonaws.com/{repo_id}/{sha256(path)}/{name}`.
//! Without one, attachments are saved under a local output directory and
//! links point back at the source host with an absolute URL.
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use attachment_migrate::config::load_config;
//! use attachment_migrate::migrate::Migrator;
//!
//! let config = load_config(std::path::Path::new("./config/migrate.toml"))?;
//! let migrator = Migrator::from_config(&config)?;
//! let body = migrator
//!     .migrate_attachments("See ![diagram](/uploads/a1b2/diagram.png)", Some(42))
//!     .await;
//! println!("{}", body);
//! migrator.finish().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`scanner`] | Finds `/uploads/` links in text |
//! | [`resolver`] | Fetches attachments and picks their new location |
//! | [`relocator`] | Uploads or saves attachment bytes |
//! | [`rewriter`] | Offset-keyed link substitution |
//! | [`migrate`] | Per-document pipeline |
//! | [`traits`] | Source, object store and filesystem interfaces |
//! | [`source_http`] | HTTP source client |
//! | [`store_s3`] | S3 `PutObject` with SigV4 signing |
//! | [`local_fs`] | `tokio::fs` filesystem |

pub mod config;
pub mod local_fs;
pub mod migrate;
pub mod models;
pub mod relocator;
pub mod resolver;
pub mod rewriter;
pub mod scanner;
pub mod source_http;
pub mod store_s3;
pub mod traits;
