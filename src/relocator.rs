//! Relocator: stores resolved attachment bytes at their destination.
//!
//! Two strategies, picked by the resolver's [`Placement`]:
//!
//! - **Remote**: `PutObject` to the object store under the storage key.
//! - **Local**: `{output_root}/{repo_id}/{file_name}` on the local disk.
//!
//! Failures are logged and counted, never returned: by the time a
//! relocation runs, the link it backs has already been decided.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::resolver::Placement;
use crate::traits::{LocalFs, ObjectStore};

/// One unit of relocation work. Owns everything it needs so it can run on
/// a spawned task.
#[derive(Debug, Clone)]
pub struct RelocationJob {
    pub placement: Placement,
    pub bytes: Vec<u8>,
    /// The link the document now points at, for log lines.
    pub locator: String,
    pub repo_id: Option<u64>,
}

/// Executes relocation jobs. Cheap to clone; clones share the failure
/// counter.
#[derive(Clone)]
pub struct Relocator {
    store: Option<Arc<dyn ObjectStore>>,
    fs: Arc<dyn LocalFs>,
    output_root: PathBuf,
    io_timeout: Duration,
    failures: Arc<AtomicUsize>,
}

impl Relocator {
    pub fn new(
        store: Option<Arc<dyn ObjectStore>>,
        fs: Arc<dyn LocalFs>,
        output_root: impl Into<PathBuf>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fs,
            output_root: output_root.into(),
            io_timeout,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Directory local-save mode writes into for `repo_id`.
    pub fn output_dir(&self, repo_id: Option<u64>) -> PathBuf {
        match repo_id {
            Some(id) => self.output_root.join(id.to_string()),
            None => self.output_root.clone(),
        }
    }

    /// Relocation failures observed so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Run `job`, returning whether it succeeded.
    pub async fn relocate(&self, job: RelocationJob) -> bool {
        let result = match job.placement {
            Placement::Remote {
                ref bucket,
                ref key,
                content_type,
            } => {
                info!(key = %key, url = %job.locator, "uploading attachment");
                self.upload(bucket, key, &job.bytes, content_type).await
            }
            Placement::Local { ref file_name } => {
                self.save_local(job.repo_id, file_name, &job.bytes).await
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(url = %job.locator, error = %e, "failed to relocate attachment");
                false
            }
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| anyhow!("No object store configured for bucket '{}'", bucket))?;

        tokio::time::timeout(
            self.io_timeout,
            store.put_object(bucket, key, data, content_type),
        )
        .await
        .map_err(|_| anyhow!("Upload of '{}' timed out after {:?}", key, self.io_timeout))??;

        info!(key = %key, size = data.len(), "done uploading");
        Ok(())
    }

    async fn save_local(&self, repo_id: Option<u64>, file_name: &str, data: &[u8]) -> Result<()> {
        let dir = self.output_dir(repo_id);
        debug!(dir = %dir.display(), "ensuring output directory");
        tokio::time::timeout(self.io_timeout, self.fs.ensure_dir(&dir))
            .await
            .map_err(|_| anyhow!("Creating '{}' timed out", dir.display()))??;

        let path = dir.join(file_name);
        tokio::time::timeout(self.io_timeout, self.fs.write_file(&path, data))
            .await
            .map_err(|_| anyhow!("Write of '{}' timed out", path.display()))??;

        info!(path = %path.display(), size = data.len(), "saved attachment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_fs::TokioFs;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            _data: &[u8],
            content_type: Option<&str>,
        ) -> Result<()> {
            if self.fail {
                anyhow::bail!("access denied");
            }
            self.puts.lock().unwrap().push((
                bucket.to_string(),
                key.to_string(),
                content_type.map(str::to_string),
            ));
            Ok(())
        }
    }

    fn remote_job() -> RelocationJob {
        RelocationJob {
            placement: Placement::Remote {
                bucket: "b".to_string(),
                key: "k/a.png".to_string(),
                content_type: Some("image/png"),
            },
            bytes: b"png".to_vec(),
            locator: "https://b.s3.amazonaws.com/k/a.png".to_string(),
            repo_id: None,
        }
    }

    #[tokio::test]
    async fn test_upload() {
        let store = Arc::new(RecordingStore::default());
        let relocator = Relocator::new(
            Some(store.clone() as Arc<dyn ObjectStore>),
            Arc::new(TokioFs),
            "unused",
            Duration::from_secs(5),
        );

        assert!(relocator.relocate(remote_job()).await);
        assert_eq!(
            store.puts.lock().unwrap().as_slice(),
            &[(
                "b".to_string(),
                "k/a.png".to_string(),
                Some("image/png".to_string())
            )]
        );
        assert_eq!(relocator.failures(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_counted() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let relocator = Relocator::new(
            Some(store as Arc<dyn ObjectStore>),
            Arc::new(TokioFs),
            "unused",
            Duration::from_secs(5),
        );

        assert!(!relocator.relocate(remote_job()).await);
        assert!(!relocator.clone().relocate(remote_job()).await);
        assert_eq!(relocator.failures(), 2);
    }

    #[tokio::test]
    async fn test_upload_without_store_fails() {
        let relocator = Relocator::new(None, Arc::new(TokioFs), "unused", Duration::from_secs(5));
        assert!(!relocator.relocate(remote_job()).await);
    }

    #[tokio::test]
    async fn test_save_local() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("_output");
        let relocator = Relocator::new(None, Arc::new(TokioFs), &root, Duration::from_secs(5));

        let job = RelocationJob {
            placement: Placement::Local {
                file_name: "diagram.png".to_string(),
            },
            bytes: b"png".to_vec(),
            locator: "https://gitlab.example.com/team/proj/uploads/a/diagram.png".to_string(),
            repo_id: Some(7),
        };

        assert!(relocator.relocate(job.clone()).await);
        // A second write into the existing directory is fine.
        assert!(relocator.relocate(job).await);
        assert_eq!(std::fs::read(root.join("7").join("diagram.png")).unwrap(), b"png");
    }

    struct StalledFs;

    #[async_trait]
    impl LocalFs for StalledFs {
        async fn ensure_dir(&self, _dir: &std::path::Path) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn write_file(&self, _path: &std::path::Path, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_directory_creation_times_out() {
        let relocator = Relocator::new(
            None,
            Arc::new(StalledFs),
            "/out",
            Duration::from_millis(50),
        );
        let job = RelocationJob {
            placement: Placement::Local {
                file_name: "a.png".to_string(),
            },
            bytes: b"png".to_vec(),
            locator: "https://gitlab.example.com/team/proj/uploads/1/a.png".to_string(),
            repo_id: Some(1),
        };

        assert!(!relocator.relocate(job).await);
        assert_eq!(relocator.failures(), 1);
    }

    #[test]
    fn test_output_dir() {
        let relocator = Relocator::new(None, Arc::new(TokioFs), "/out", Duration::from_secs(1));
        assert_eq!(relocator.output_dir(Some(9)), PathBuf::from("/out/9"));
        assert_eq!(relocator.output_dir(None), PathBuf::from("/out"));
    }
}
