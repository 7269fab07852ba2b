//! HTTP source client.
//!
//! Downloads attachments from the source host at
//! `{host}/{project_path}{source_path}`, the same URL local-save mode
//! rewrites links to. A `PRIVATE-TOKEN` header is sent when a token is
//! configured.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::traits::SourceClient;

/// [`SourceClient`] over plain HTTP(S).
pub struct HttpSourceClient {
    host: String,
    project_path: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpSourceClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            host: config.host.clone(),
            project_path: config.project_path.clone(),
            token: config.resolved_token(),
            client,
        })
    }

    fn attachment_url(&self, source_path: &str) -> String {
        absolute_url(&self.host, &self.project_path, source_path)
    }
}

/// Join host, project path and source path the way links are rewritten in
/// local-save mode: the host gets a trailing slash, the rest is appended
/// verbatim.
pub fn absolute_url(host: &str, project_path: &str, source_path: &str) -> String {
    let mut url = host.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(project_path);
    url.push_str(source_path);
    url
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_attachment(&self, source_path: &str) -> Option<Vec<u8>> {
        let url = self.attachment_url(source_path);
        let mut req = self.client.get(&url);
        if let Some(ref token) = self.token {
            req = req.header("PRIVATE-TOKEN", token);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %url, error = %e, "failed to fetch attachment");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(url = %url, status = %resp.status(), "attachment fetch returned an error status");
            return None;
        }

        match resp.bytes().await {
            Ok(bytes) => {
                debug!(url = %url, size = bytes.len(), "fetched attachment");
                Some(bytes.to_vec())
            }
            Err(e) => {
                warn!(url = %url, error = %e, "failed to read attachment body");
                None
            }
        }
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn project_path(&self) -> &str {
        &self.project_path
    }
}
