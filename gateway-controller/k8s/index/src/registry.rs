//! The registry of connected data-plane proxies.
//!
//! A proxy is registered per active gateway; its addresses come from the pod
//! watch. Compiled documents are distributed through a per-proxy watch
//! channel so that slow consumers never block compilation.

use crate::cert::IssuedCertificate;
use crate::resource_id::ResourceId;
use ahash::AHashMap as HashMap;
use meshgateway_controller_core::document::ProxyConfig;
use std::{fmt, sync::Arc};
use tokio::sync::watch;

/// Identifies a proxy by the gateway it serves.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProxyId(pub ResourceId);

#[derive(Debug, Default)]
pub(crate) struct Registry {
    proxies: HashMap<ProxyId, ProxyEntry>,
}

#[derive(Debug)]
pub(crate) struct ProxyEntry {
    /// Pod name to pod IP; the IP is absent until the kubelet assigns one.
    pub pods: HashMap<String, Option<String>>,
    pub certificate: Option<IssuedCertificate>,
    tx: watch::Sender<Option<Arc<ProxyConfig>>>,
}

// === impl ProxyId ===

impl ProxyId {
    /// The certificate common name: `<gateway>.<namespace>`.
    pub fn common_name(&self) -> String {
        format!("{}.{}", self.0.name, self.0.namespace)
    }

    /// The codebase path component: the first label of the common name.
    pub fn cn_prefix(&self) -> &str {
        &self.0.name
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// === impl Registry ===

impl Registry {
    /// Registers a proxy, returning a channel that observes its compiled
    /// configuration. Re-registering an existing proxy returns a fresh
    /// subscription to the same entry.
    pub(crate) fn register(
        &mut self,
        id: ProxyId,
    ) -> watch::Receiver<Option<Arc<ProxyConfig>>> {
        if !self.proxies.contains_key(&id) {
            tracing::debug!(%id, "Registering proxy");
        }
        self.proxies
            .entry(id)
            .or_insert_with(|| {
                let (tx, _) = watch::channel(None);
                ProxyEntry {
                    pods: HashMap::new(),
                    certificate: None,
                    tx,
                }
            })
            .tx
            .subscribe()
    }

    pub(crate) fn unregister(&mut self, id: &ProxyId) {
        if self.proxies.remove(id).is_some() {
            tracing::debug!(%id, "Unregistered proxy");
        }
    }

    pub(crate) fn get_mut(&mut self, id: &ProxyId) -> Option<&mut ProxyEntry> {
        self.proxies.get_mut(id)
    }

    pub(crate) fn contains(&self, id: &ProxyId) -> bool {
        self.proxies.contains_key(id)
    }

    pub(crate) fn ids(&self) -> Vec<ProxyId> {
        let mut ids: Vec<_> = self.proxies.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All known proxy pod addresses, with the owning pod's annotated name.
    /// `None` when any registered proxy still lacks an address.
    pub(crate) fn addresses(&self) -> Option<Vec<(String, String)>> {
        let mut out = Vec::new();
        for (id, entry) in &self.proxies {
            for (pod, addr) in &entry.pods {
                match addr {
                    Some(addr) => {
                        out.push((addr.clone(), format!("{}.{}", id.0.namespace, pod)))
                    }
                    None => return None,
                }
            }
        }
        out.sort();
        Some(out)
    }
}

// === impl ProxyEntry ===

impl ProxyEntry {
    pub(crate) fn publish(&self, config: Arc<ProxyConfig>) {
        self.tx.send_replace(Some(config));
    }
}
