//! Publishes compiled documents to proxy codebases.

use crate::{BatchFile, Repo, CODEBASE_CONFIG};
use ahash::AHashMap as HashMap;
use anyhow::anyhow;
use meshgateway_controller_core::{document::ProxyConfig, fnv::fnv64a, Error};
use prometheus_client::metrics::counter::Counter;
use tokio::time;

/// How long a derive-and-batch sequence may take before it is abandoned.
const PUBLISH_TIMEOUT: time::Duration = time::Duration::from_secs(5);

/// Writes each proxy's document into its codebase, at most once per
/// fingerprint.
///
/// The fingerprint covers the serialized document and the plugin set version.
/// A failed publish deletes the codebase so the server never holds a derive
/// without its batch, and keeps the previous fingerprint so the next
/// reconcile retries the same document.
pub struct Publisher<R> {
    repo: R,
    root: String,
    plugin_set_version: String,
    metrics: PublisherMetrics,
    published: HashMap<String, u64>,
}

#[derive(Clone, Debug)]
pub struct PublisherMetrics {
    publishes: Counter,
    skips: Counter,
    failures: Counter,
}

// === impl PublisherMetrics ===

impl PublisherMetrics {
    pub fn register(prom: &mut prometheus_client::registry::Registry) -> Self {
        let publishes = Counter::default();
        prom.register(
            "publishes",
            "Count of documents written to the repo server",
            publishes.clone(),
        );

        let skips = Counter::default();
        prom.register(
            "publish_skips",
            "Count of publishes elided because the fingerprint was unchanged",
            skips.clone(),
        );

        let failures = Counter::default();
        prom.register(
            "publish_failures",
            "Count of publishes rolled back after a repo error",
            failures.clone(),
        );

        Self {
            publishes,
            skips,
            failures,
        }
    }
}

// === impl Publisher ===

impl<R: Repo> Publisher<R> {
    pub fn new(
        repo: R,
        root: String,
        plugin_set_version: String,
        metrics: PublisherMetrics,
    ) -> Self {
        Self {
            repo,
            root,
            plugin_set_version,
            metrics,
            published: HashMap::new(),
        }
    }

    /// Publishes `doc` to the codebase of the proxy named by `cn_prefix`.
    ///
    /// Returns `Ok(false)` when the document fingerprint matches the last
    /// successful publish for this proxy.
    pub async fn publish(&mut self, cn_prefix: &str, doc: &ProxyConfig) -> Result<bool, Error> {
        // The fingerprint must not depend on the stamps of a previous
        // publish.
        let mut doc = doc.clone();
        doc.version = String::new();
        doc.ts = String::new();
        let bytes = serde_json::to_vec(&doc)
            .map_err(|e| Error::Transient(anyhow!(e).context("serializing document")))?;

        let mut hashed = bytes.clone();
        hashed.extend_from_slice(self.plugin_set_version.as_bytes());
        let fingerprint = fnv64a(&hashed);

        if self.published.get(cn_prefix) == Some(&fingerprint) {
            tracing::debug!(%cn_prefix, %fingerprint, "Fingerprint unchanged");
            self.metrics.skips.inc();
            return Ok(false);
        }

        doc.version = fingerprint.to_string();
        doc.ts = chrono::Utc::now().to_rfc3339();
        let stamped = serde_json::to_vec(&doc)
            .map_err(|e| Error::Transient(anyhow!(e).context("serializing document")))?;

        let path = format!("{}/{cn_prefix}", self.root);
        let parent = format!("{}/defaults", self.root);
        let write = async {
            self.repo
                .derive(&path, &parent, fingerprint.wrapping_sub(2))
                .await?;
            self.repo
                .batch(
                    fingerprint.wrapping_sub(1),
                    vec![BatchFile {
                        path: path.clone(),
                        file: CODEBASE_CONFIG.to_string(),
                        bytes: stamped,
                    }],
                )
                .await
        };

        match time::timeout(PUBLISH_TIMEOUT, write).await {
            Ok(Ok(())) => {
                tracing::info!(%cn_prefix, %fingerprint, "Published configuration");
                self.published.insert(cn_prefix.to_string(), fingerprint);
                self.metrics.publishes.inc();
                Ok(true)
            }
            Ok(Err(error)) => {
                self.rollback(cn_prefix, &path).await;
                Err(Error::Transient(error))
            }
            Err(_) => {
                self.rollback(cn_prefix, &path).await;
                Err(Error::Transient(anyhow!(
                    "publish timed out after {PUBLISH_TIMEOUT:?}"
                )))
            }
        }
    }

    async fn rollback(&self, cn_prefix: &str, path: &str) {
        self.metrics.failures.inc();
        tracing::error!(%cn_prefix, "Publish failed; deleting codebase");
        if let Err(error) = self.repo.delete(path).await {
            tracing::warn!(%error, %path, "Failed to delete codebase");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRepo;

    fn publisher(repo: MemoryRepo) -> Publisher<MemoryRepo> {
        Publisher::new(
            repo,
            "/base/gateways".to_string(),
            "plugins-v1".to_string(),
            PublisherMetrics::register(&mut Default::default()),
        )
    }

    fn fingerprint_of(doc: &ProxyConfig, plugin_set_version: &str) -> u64 {
        let mut bytes = serde_json::to_vec(doc).unwrap();
        bytes.extend_from_slice(plugin_set_version.as_bytes());
        fnv64a(&bytes)
    }

    #[tokio::test]
    async fn publishes_then_skips_unchanged_documents() {
        let repo = MemoryRepo::default();
        let mut publisher = publisher(repo.clone());
        let doc = ProxyConfig::default();

        assert!(publisher.publish("gw-a", &doc).await.unwrap());
        let version = repo
            .codebase("/base/gateways/gw-a")
            .expect("codebase exists")
            .version;

        assert!(!publisher.publish("gw-a", &doc).await.unwrap());
        assert_eq!(
            repo.codebase("/base/gateways/gw-a").unwrap().version,
            version,
        );
    }

    #[tokio::test]
    async fn derive_and_batch_versions_bracket_the_fingerprint() {
        let repo = MemoryRepo::default();
        let mut publisher = publisher(repo.clone());
        let doc = ProxyConfig::default();
        let fingerprint = fingerprint_of(&doc, "plugins-v1");

        publisher.publish("gw-a", &doc).await.unwrap();

        let codebase = repo.codebase("/base/gateways/gw-a").unwrap();
        assert_eq!(codebase.parent, "/base/gateways/defaults");
        assert_eq!(codebase.parent_version, fingerprint.wrapping_sub(2));
        assert_eq!(codebase.version, Some(fingerprint.wrapping_sub(1)));
    }

    #[tokio::test]
    async fn written_documents_are_stamped() {
        let repo = MemoryRepo::default();
        let mut publisher = publisher(repo.clone());
        let doc = ProxyConfig::default();
        let fingerprint = fingerprint_of(&doc, "plugins-v1");

        publisher.publish("gw-a", &doc).await.unwrap();

        let bytes = repo
            .file("/base/gateways/gw-a", CODEBASE_CONFIG)
            .expect("config written");
        let written: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(written["version"], fingerprint.to_string());
        assert_ne!(written["ts"], "");
    }

    #[tokio::test]
    async fn stamps_do_not_change_the_fingerprint() {
        let repo = MemoryRepo::default();
        let mut publisher = publisher(repo.clone());

        publisher.publish("gw-a", &ProxyConfig::default()).await.unwrap();

        // A prior publish stamped this copy; it must still be recognized as
        // the same document.
        let stamped = ProxyConfig {
            version: "123".to_string(),
            ts: "2024-01-01T00:00:00Z".to_string(),
            ..Default::default()
        };
        assert!(!publisher.publish("gw-a", &stamped).await.unwrap());
    }

    #[tokio::test]
    async fn plugin_set_version_changes_the_fingerprint() {
        let repo = MemoryRepo::default();
        let doc = ProxyConfig::default();

        let mut first = publisher(repo.clone());
        first.publish("gw-a", &doc).await.unwrap();
        let before = repo.codebase("/base/gateways/gw-a").unwrap().version;

        let mut second = Publisher::new(
            repo.clone(),
            "/base/gateways".to_string(),
            "plugins-v2".to_string(),
            PublisherMetrics::register(&mut Default::default()),
        );
        assert!(second.publish("gw-a", &doc).await.unwrap());
        assert_ne!(repo.codebase("/base/gateways/gw-a").unwrap().version, before);
    }

    #[tokio::test]
    async fn failed_batches_delete_the_codebase_and_retry() {
        let repo = MemoryRepo::default();
        let mut publisher = publisher(repo.clone());
        let doc = ProxyConfig::default();

        repo.fail_batches(true);
        match publisher.publish("gw-a", &doc).await {
            Err(Error::Transient(_)) => {}
            other => panic!("expected Transient, got {other:?}"),
        }
        assert!(repo.codebase("/base/gateways/gw-a").is_none());

        // The fingerprint did not advance, so the next attempt republishes.
        repo.fail_batches(false);
        assert!(publisher.publish("gw-a", &doc).await.unwrap());
        assert!(repo.codebase("/base/gateways/gw-a").is_some());
    }
}
