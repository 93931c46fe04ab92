//! HTTP client for the repo server.

use crate::{BatchFile, Repo};
use anyhow::{Context, Result};

/// Talks to a repo server over its JSON API.
#[derive(Clone, Debug)]
pub struct HttpRepo {
    client: reqwest::Client,
    base: String,
}

#[derive(serde::Serialize)]
struct DeriveRequest<'a> {
    base: &'a str,
    version: u64,
}

#[derive(serde::Serialize)]
struct BatchRequest<'a> {
    version: u64,
    items: Vec<BatchItem<'a>>,
}

#[derive(serde::Serialize)]
struct BatchItem<'a> {
    path: &'a str,
    filename: &'a str,
    content: &'a str,
}

// === impl HttpRepo ===

impl HttpRepo {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/api/v1/repo{path}", self.base)
    }
}

#[async_trait::async_trait]
impl Repo for HttpRepo {
    async fn derive(&self, path: &str, parent: &str, parent_version: u64) -> Result<()> {
        self.client
            .post(self.repo_url(path))
            .json(&DeriveRequest {
                base: parent,
                version: parent_version,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("deriving codebase {path}"))?;
        Ok(())
    }

    async fn batch(&self, version: u64, files: Vec<BatchFile>) -> Result<()> {
        let items = files
            .iter()
            .map(|f| {
                Ok(BatchItem {
                    path: &f.path,
                    filename: &f.file,
                    content: std::str::from_utf8(&f.bytes)
                        .context("batch files must be UTF-8")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.client
            .post(format!("{}/api/v1/batch", self.base))
            .json(&BatchRequest { version, items })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("writing batch at version {version}"))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete(self.repo_url(path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("deleting codebase {path}"))?;
        Ok(())
    }
}
