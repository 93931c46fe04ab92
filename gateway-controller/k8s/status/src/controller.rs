use crate::{index::Update, resource_id::NamespaceGroupKindName};
use kubert::lease::Claim;
use meshgateway_controller_k8s_api::{self as k8s, gateway as gw_api};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch::Receiver},
    time::Duration,
};

/// Drains the update channel and writes patches to the API server.
///
/// Updates are only written while this instance holds the lease; updates
/// dequeued while another instance leads are dropped and regenerated by the
/// index's periodic reconciliation once leadership is acquired.
pub struct Controller {
    claims: Receiver<Arc<Claim>>,
    client: k8s::Client,
    name: String,
    updates: mpsc::Receiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    patch_succeeded: Counter,
    patch_failed: Counter,
    patch_timeouts: Counter,
    patch_dequeues: Counter,
    patch_skipped: Counter,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_succeeded = Counter::default();
        prom.register(
            "patch_succeeded",
            "Total number of patches written successfully",
            patch_succeeded.clone(),
        );

        let patch_failed = Counter::default();
        prom.register(
            "patch_failed",
            "Total number of patches rejected by the API server",
            patch_failed.clone(),
        );

        let patch_timeouts = Counter::default();
        prom.register(
            "patch_timeouts",
            "Total number of patches that timed out",
            patch_timeouts.clone(),
        );

        let patch_dequeues = Counter::default();
        prom.register(
            "patch_dequeues",
            "Total number of updates dequeued",
            patch_dequeues.clone(),
        );

        let patch_skipped = Counter::default();
        prom.register(
            "patch_skipped",
            "Total number of updates dropped while not holding the lease",
            patch_skipped.clone(),
        );

        Self {
            patch_succeeded,
            patch_failed,
            patch_timeouts,
            patch_dequeues,
            patch_skipped,
        }
    }
}

// === impl Controller ===

impl Controller {
    pub fn new(
        claims: Receiver<Arc<Claim>>,
        client: k8s::Client,
        name: String,
        updates: mpsc::Receiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            claims,
            client,
            name,
            updates,
            patch_timeout,
            metrics,
        }
    }

    pub async fn run(mut self) {
        while let Some(Update { id, patch }) = self.updates.recv().await {
            self.metrics.patch_dequeues.inc();

            if !self.claims.borrow_and_update().is_current_for(&self.name) {
                self.metrics.patch_skipped.inc();
                tracing::debug!(%id, "Dropping update; not the leader");
                continue;
            }

            self.write(&id, &patch).await;
        }
    }

    async fn write(&self, id: &NamespaceGroupKindName, patch: &k8s::Patch<serde_json::Value>) {
        match (&*id.gkn.group, &*id.gkn.kind) {
            ("gateway.networking.k8s.io", "GatewayClass") => {
                let api = k8s::Api::<gw_api::GatewayClass>::all(self.client.clone());
                self.patch_status(api, id, patch).await;
            }
            ("gateway.networking.k8s.io", "Gateway") => {
                self.patch_status(self.namespaced::<gw_api::Gateway>(id), id, patch)
                    .await;
            }
            ("gateway.networking.k8s.io", "HTTPRoute") => {
                self.patch_status(self.namespaced::<gw_api::HTTPRoute>(id), id, patch)
                    .await;
            }
            ("gateway.networking.k8s.io", "GRPCRoute") => {
                self.patch_status(self.namespaced::<gw_api::GRPCRoute>(id), id, patch)
                    .await;
            }
            ("gateway.networking.k8s.io", "TCPRoute") => {
                self.patch_status(self.namespaced::<gw_api::TCPRoute>(id), id, patch)
                    .await;
            }
            ("gateway.networking.k8s.io", "TLSRoute") => {
                self.patch_status(self.namespaced::<gw_api::TLSRoute>(id), id, patch)
                    .await;
            }
            ("gateway.networking.k8s.io", "UDPRoute") => {
                self.patch_status(self.namespaced::<gw_api::UDPRoute>(id), id, patch)
                    .await;
            }
            ("apps", "Deployment") => {
                self.apply(self.namespaced::<k8s::Deployment>(id), id, patch)
                    .await;
            }
            ("", "Service") => {
                self.apply(self.namespaced::<k8s::Service>(id), id, patch)
                    .await;
            }
            (group, kind) => {
                tracing::error!(%group, %kind, "Unhandled update kind");
            }
        }
    }

    fn namespaced<K>(&self, id: &NamespaceGroupKindName) -> k8s::Api<K>
    where
        K: k8s::Resource<Scope = k8s::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        k8s::Api::namespaced(self.client.clone(), &id.namespace)
    }

    async fn patch_status<K>(
        &self,
        api: k8s::Api<K>,
        id: &NamespaceGroupKindName,
        patch: &k8s::Patch<serde_json::Value>,
    ) where
        K: k8s::Resource + DeserializeOwned + Clone + std::fmt::Debug,
    {
        let params = k8s::PatchParams::default();
        match tokio::time::timeout(
            self.patch_timeout,
            api.patch_status(&id.gkn.name, &params, patch),
        )
        .await
        {
            Ok(Ok(_)) => {
                self.metrics.patch_succeeded.inc();
            }
            Ok(Err(error)) => {
                self.metrics.patch_failed.inc();
                tracing::warn!(%id, %error, "Failed to patch resource status");
            }
            Err(_) => {
                self.metrics.patch_timeouts.inc();
                tracing::warn!(%id, "Timed out patching resource status");
            }
        }
    }

    async fn apply<K>(
        &self,
        api: k8s::Api<K>,
        id: &NamespaceGroupKindName,
        patch: &k8s::Patch<serde_json::Value>,
    ) where
        K: k8s::Resource + DeserializeOwned + Clone + std::fmt::Debug,
    {
        let params =
            k8s::PatchParams::apply(meshgateway_controller_core::CONTROLLER_NAME).force();
        match tokio::time::timeout(self.patch_timeout, api.patch(&id.gkn.name, &params, patch))
            .await
        {
            Ok(Ok(_)) => {
                self.metrics.patch_succeeded.inc();
            }
            Ok(Err(error)) => {
                self.metrics.patch_failed.inc();
                tracing::warn!(%id, %error, "Failed to apply synthesized resource");
            }
            Err(_) => {
                self.metrics.patch_timeouts.inc();
                tracing::warn!(%id, "Timed out applying synthesized resource");
            }
        }
    }
}
