use crate::{
    conditions::{self, eq_time_insensitive},
    gateway::{
        self, AttachError, GatewayState, GrantState, ListenerCheck, ListenerError, NodeState,
        ServiceState,
    },
    resource_id::{NamespaceGroupKindName, ResourceId},
    routes::{self, BackendReference, ParentReference, RouteInfo},
};
use ahash::AHashMap as HashMap;
use kubert::lease::Claim;
use meshgateway_controller_core::routes::GroupKindName;
use meshgateway_controller_k8s_api::{self as k8s, gateway as gw_api, ResourceExt};
use parking_lot::RwLock;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::sync::Arc;
use tokio::sync::{mpsc, watch::Receiver};

pub type SharedIndex = Arc<RwLock<Index>>;

/// A status patch (or server-side apply of a synthesized object) to be
/// written by the [`Controller`](crate::Controller).
#[derive(Debug, PartialEq)]
pub struct Update {
    pub id: NamespaceGroupKindName,
    pub patch: k8s::Patch<serde_json::Value>,
}

/// Index settings fixed at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub controller_name: String,
    pub proxy_image: String,
    pub service_type: String,
}

/// Watches all resources participating in status computation and emits
/// status patches through the update channel.
///
/// Every change triggers a full recomputation; patches are only sent when a
/// resource's status differs from the last one emitted.
pub struct Index {
    name: String,
    claims: Receiver<Arc<Claim>>,
    updates: mpsc::Sender<Update>,
    metrics: IndexMetrics,
    settings: Settings,

    classes: HashMap<String, ClassState>,
    gateways: HashMap<ResourceId, GatewayState>,
    routes: HashMap<NamespaceGroupKindName, RouteInfo>,
    services: HashMap<ResourceId, ServiceState>,
    deployments: HashMap<ResourceId, i32>,
    secrets: HashMap<ResourceId, bool>,
    configmaps: HashMap<ResourceId, bool>,
    grants: HashMap<ResourceId, GrantState>,
    nodes: HashMap<String, NodeState>,

    // Previously emitted conditions, keyed by (resource, scope, type). Used
    // to preserve transition timestamps for unchanged conditions and to keep
    // observed generations monotonic.
    conditions: HashMap<(NamespaceGroupKindName, String, String), k8s::Condition>,
    // The last status emitted per resource; identical recomputations are not
    // re-sent.
    statuses: HashMap<NamespaceGroupKindName, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq)]
struct ClassState {
    controller_matches: bool,
    created: Option<chrono::DateTime<chrono::Utc>>,
    generation: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    reconciles: Counter,
    updates: Counter,
    updates_dropped: Counter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParentAcceptance {
    Accepted,
    NoMatchingParent,
    NotAllowedByListeners,
    NoMatchingListenerHostname,
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Counter::default();
        prom.register(
            "reconciles",
            "Total number of reconciliation passes",
            reconciles.clone(),
        );

        let updates = Counter::default();
        prom.register(
            "updates",
            "Total number of status updates enqueued",
            updates.clone(),
        );

        let updates_dropped = Counter::default();
        prom.register(
            "updates_dropped",
            "Total number of status updates dropped because the queue was full",
            updates_dropped.clone(),
        );

        Self {
            reconciles,
            updates,
            updates_dropped,
        }
    }
}

// === impl Index ===

impl Index {
    pub fn shared(
        name: impl ToString,
        claims: Receiver<Arc<Claim>>,
        updates: mpsc::Sender<Update>,
        metrics: IndexMetrics,
        settings: Settings,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            name: name.to_string(),
            claims,
            updates,
            metrics,
            settings,
            classes: HashMap::new(),
            gateways: HashMap::new(),
            routes: HashMap::new(),
            services: HashMap::new(),
            deployments: HashMap::new(),
            secrets: HashMap::new(),
            configmaps: HashMap::new(),
            grants: HashMap::new(),
            nodes: HashMap::new(),
            conditions: HashMap::new(),
            statuses: HashMap::new(),
        }))
    }

    /// Periodically reconciles all indexed resources so that patches lost to
    /// write failures or leadership changes are regenerated.
    pub async fn run(index: SharedIndex, reconciliation_period: std::time::Duration) {
        let (name, mut claims) = {
            let index = index.read();
            (index.name.clone(), index.claims.clone())
        };

        let mut interval = tokio::time::interval(reconciliation_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    index.write().reconcile();
                }
                res = claims.changed() => {
                    if res.is_err() {
                        return;
                    }
                    if claims.borrow_and_update().is_current_for(&name) {
                        tracing::debug!("Lease claimed; re-emitting all statuses");
                        let mut index = index.write();
                        index.statuses.clear();
                        index.reconcile();
                    }
                }
            }
        }
    }

    pub(crate) fn reconcile(&mut self) {
        self.metrics.reconciles.inc();
        for name in self.classes.keys().cloned().collect::<Vec<_>>() {
            self.reconcile_class(&name);
        }
        for id in self.gateways.keys().cloned().collect::<Vec<_>>() {
            self.reconcile_gateway(&id);
        }
        for id in self.routes.keys().cloned().collect::<Vec<_>>() {
            self.reconcile_route(&id);
        }
    }

    fn reconcile_class(&mut self, name: &str) {
        let Some(state) = self.classes.get(name).cloned() else {
            return;
        };
        if !state.controller_matches {
            return;
        }

        let id = cluster_gkn("GatewayClass", name);
        let accepted = self.condition(
            &id,
            "",
            conditions::ACCEPTED,
            true,
            conditions::REASON_ACCEPTED,
            "Accepted by this controller".to_string(),
            state.generation,
        );

        let status = serde_json::json!({ "conditions": [accepted] });
        let patch = make_status_patch(&id, &status);
        self.send_if_changed(id, status, patch);
    }

    fn reconcile_gateway(&mut self, gateway_id: &ResourceId) {
        let Some(state) = self.gateways.get(gateway_id).cloned() else {
            return;
        };

        let is_active = self
            .active_gateway(&gateway_id.namespace)
            .as_ref()
            .is_some_and(|active| active == gateway_id);
        let checks = gateway::check_listeners(
            &gateway_id.namespace,
            &state,
            &self.secrets,
            &self.configmaps,
            &self.grants,
        );

        let mut attached: HashMap<String, i32> =
            checks.iter().map(|c| (c.name.clone(), 0)).collect();
        if is_active {
            for (route_id, route) in &self.routes {
                for parent in &route.parents {
                    let ParentReference::Gateway {
                        id,
                        section_name,
                        port,
                    } = parent
                    else {
                        continue;
                    };
                    if id != gateway_id {
                        continue;
                    }
                    for check in &checks {
                        if section_name.as_deref().is_some_and(|s| s != check.name) {
                            continue;
                        }
                        if port.is_some_and(|p| p != check.port) {
                            continue;
                        }
                        if check.admits(&route_id.gkn.kind, &route.hostnames).is_ok() {
                            *attached.entry(check.name.clone()).or_default() += 1;
                        }
                    }
                }
            }
        }

        let id = namespaced_gkn("Gateway", gateway_id);

        let accepted = if is_active {
            self.condition(
                &id,
                "",
                conditions::ACCEPTED,
                true,
                conditions::REASON_ACCEPTED,
                "Gateway is the active gateway in its namespace".to_string(),
                state.generation,
            )
        } else {
            self.condition(
                &id,
                "",
                conditions::ACCEPTED,
                false,
                conditions::REASON_UNACCEPTED,
                "Another gateway is active in this namespace".to_string(),
                state.generation,
            )
        };

        let addresses = if is_active {
            let service_id = ResourceId::new(
                gateway_id.namespace.clone(),
                gateway::synthesized_name(&gateway_id.name),
            );
            self.services
                .get(&service_id)
                .map(|svc| gateway::extract_addresses(svc, &self.nodes))
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let programmed = if !is_active {
            self.condition(
                &id,
                "",
                conditions::PROGRAMMED,
                false,
                conditions::REASON_UNACCEPTED,
                "Gateway is not accepted".to_string(),
                state.generation,
            )
        } else if addresses.is_empty() {
            self.condition(
                &id,
                "",
                conditions::PROGRAMMED,
                false,
                conditions::REASON_ADDRESS_NOT_ASSIGNED,
                "No address has been assigned to the gateway".to_string(),
                state.generation,
            )
        } else {
            let deployment_id = ResourceId::new(
                gateway_id.namespace.clone(),
                gateway::synthesized_name(&gateway_id.name),
            );
            let available = self.deployments.get(&deployment_id).copied().unwrap_or(0);
            if available == 0 {
                self.condition(
                    &id,
                    "",
                    conditions::PROGRAMMED,
                    false,
                    conditions::REASON_NO_RESOURCES,
                    "The gateway deployment has no available replicas".to_string(),
                    state.generation,
                )
            } else {
                self.condition(
                    &id,
                    "",
                    conditions::PROGRAMMED,
                    true,
                    conditions::REASON_PROGRAMMED,
                    "Gateway is programmed".to_string(),
                    state.generation,
                )
            }
        };

        let listeners = checks
            .iter()
            .map(|check| {
                let scope = format!("listener/{}", check.name);
                let conditions = self.listener_conditions(&id, &scope, check, state.generation);
                gw_api::GatewayStatusListeners {
                    name: check.name.clone(),
                    supported_kinds: check.supported_kinds.clone(),
                    attached_routes: attached.get(&check.name).copied().unwrap_or(0),
                    conditions,
                }
            })
            .collect::<Vec<_>>();

        let status = serde_json::json!({
            "addresses": addresses,
            "conditions": [accepted, programmed],
            "listeners": listeners,
        });
        let patch = make_status_patch(&id, &status);
        self.send_if_changed(id, status, patch);

        if is_active {
            self.apply_synthesized(gateway_id, &state);
        }
    }

    fn listener_conditions(
        &mut self,
        id: &NamespaceGroupKindName,
        scope: &str,
        check: &ListenerCheck,
        generation: Option<i64>,
    ) -> Vec<k8s::Condition> {
        let accepted = self.condition(
            id,
            scope,
            conditions::ACCEPTED,
            true,
            conditions::REASON_ACCEPTED,
            "Listener is accepted".to_string(),
            generation,
        );

        let resolved_refs = if check.errors.is_empty() {
            self.condition(
                id,
                scope,
                conditions::RESOLVED_REFS,
                true,
                conditions::REASON_RESOLVED_REFS,
                "All references resolved".to_string(),
                generation,
            )
        } else {
            let reason = check
                .errors
                .iter()
                .map(|e| match e {
                    ListenerError::InvalidRouteKinds(_) => conditions::REASON_INVALID_ROUTE_KINDS,
                    ListenerError::RefNotPermitted(_) => conditions::REASON_REF_NOT_PERMITTED,
                    ListenerError::InvalidCertificateRef(_) => {
                        conditions::REASON_INVALID_CERTIFICATE_REF
                    }
                })
                .next()
                .unwrap_or(conditions::REASON_INVALID);
            let message = check
                .errors
                .iter()
                .map(|e| match e {
                    ListenerError::InvalidRouteKinds(m)
                    | ListenerError::RefNotPermitted(m)
                    | ListenerError::InvalidCertificateRef(m) => m.as_str(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            self.condition(
                id,
                scope,
                conditions::RESOLVED_REFS,
                false,
                reason,
                message,
                generation,
            )
        };

        let programmed = if check.errors.is_empty() {
            self.condition(
                id,
                scope,
                conditions::PROGRAMMED,
                true,
                conditions::REASON_PROGRAMMED,
                "Listener is programmed".to_string(),
                generation,
            )
        } else {
            self.condition(
                id,
                scope,
                conditions::PROGRAMMED,
                false,
                conditions::REASON_INVALID,
                "Listener has invalid references".to_string(),
                generation,
            )
        };

        vec![accepted, resolved_refs, programmed]
    }

    fn apply_synthesized(&mut self, gateway_id: &ResourceId, state: &GatewayState) {
        let deployment =
            gateway::deployment_patch(gateway_id, state, &self.settings.proxy_image);
        let deployment_id = NamespaceGroupKindName {
            namespace: gateway_id.namespace.clone(),
            gkn: GroupKindName {
                group: "apps".into(),
                kind: "Deployment".into(),
                name: gateway::synthesized_name(&gateway_id.name).into(),
            },
        };
        self.send_if_changed(
            deployment_id,
            deployment.clone(),
            k8s::Patch::Apply(deployment),
        );

        let service = gateway::service_patch(gateway_id, state, &self.settings.service_type);
        let service_id = NamespaceGroupKindName {
            namespace: gateway_id.namespace.clone(),
            gkn: GroupKindName {
                group: "".into(),
                kind: "Service".into(),
                name: gateway::synthesized_name(&gateway_id.name).into(),
            },
        };
        self.send_if_changed(service_id, service.clone(), k8s::Patch::Apply(service));
    }

    fn reconcile_route(&mut self, id: &NamespaceGroupKindName) {
        let Some(info) = self.routes.get(id).cloned() else {
            return;
        };
        let kind = id.gkn.kind.to_string();

        let resolved = self.resolve_backends(id, &info);

        let mut parents = Vec::new();
        for parent in &info.parents {
            let ParentReference::Gateway {
                id: gateway_id,
                section_name,
                port,
            } = parent
            else {
                continue;
            };

            let acceptance =
                self.evaluate_parent(gateway_id, section_name.as_deref(), *port, &kind, &info);
            let scope = format!("parent/{gateway_id}");
            let accepted = match acceptance {
                ParentAcceptance::Accepted => self.condition(
                    id,
                    &scope,
                    conditions::ACCEPTED,
                    true,
                    conditions::REASON_ACCEPTED,
                    "Route is accepted".to_string(),
                    info.generation,
                ),
                ParentAcceptance::NoMatchingParent => self.condition(
                    id,
                    &scope,
                    conditions::ACCEPTED,
                    false,
                    conditions::REASON_NO_MATCHING_PARENT,
                    "No accepted gateway listener matches this parent reference".to_string(),
                    info.generation,
                ),
                ParentAcceptance::NotAllowedByListeners => self.condition(
                    id,
                    &scope,
                    conditions::ACCEPTED,
                    false,
                    conditions::REASON_NOT_ALLOWED_BY_LISTENERS,
                    format!("Listener does not allow routes of kind {kind}"),
                    info.generation,
                ),
                ParentAcceptance::NoMatchingListenerHostname => self.condition(
                    id,
                    &scope,
                    conditions::ACCEPTED,
                    false,
                    conditions::REASON_NO_MATCHING_LISTENER_HOSTNAME,
                    "Route hostnames do not intersect the listener hostname".to_string(),
                    info.generation,
                ),
            };

            let resolved_refs = self.condition(
                id,
                &scope,
                conditions::RESOLVED_REFS,
                resolved.0,
                resolved.1,
                resolved.2.clone(),
                info.generation,
            );

            // Every route kind carries the same parent status shape, but each
            // has its own generated struct; the patch is rendered directly.
            parents.push(serde_json::json!({
                "parentRef": {
                    "group": routes::gateway_api_group(),
                    "kind": "Gateway",
                    "namespace": gateway_id.namespace,
                    "name": gateway_id.name,
                    "sectionName": section_name,
                    "port": port,
                },
                "controllerName": self.settings.controller_name,
                "conditions": [accepted, resolved_refs],
            }));
        }

        let status = serde_json::json!({ "parents": parents });
        let patch = make_status_patch(id, &status);
        self.send_if_changed(id.clone(), status, patch);
    }

    /// Validates a route's backend references. Returns the ResolvedRefs
    /// condition inputs (status, reason, message).
    fn resolve_backends(
        &self,
        id: &NamespaceGroupKindName,
        info: &RouteInfo,
    ) -> (bool, &'static str, String) {
        for backend in &info.backends {
            match backend {
                BackendReference::Unknown { group, kind } => {
                    return (
                        false,
                        conditions::REASON_INVALID_KIND,
                        format!("Unsupported backend kind {kind}.{group}"),
                    );
                }
                BackendReference::Service(backend_id) => {
                    if backend_id.namespace != id.namespace
                        && !gateway::grant_permits(
                            &self.grants,
                            &backend_id.namespace,
                            (&id.gkn.group, &id.gkn.kind, &id.namespace),
                            ("", "Service", &backend_id.name),
                        )
                    {
                        return (
                            false,
                            conditions::REASON_REF_NOT_PERMITTED,
                            format!(
                                "Backend {backend_id} is not permitted by any ReferenceGrant"
                            ),
                        );
                    }
                    if !self.services.contains_key(backend_id) {
                        return (
                            false,
                            conditions::REASON_BACKEND_NOT_FOUND,
                            format!("Backend service {backend_id} not found"),
                        );
                    }
                }
            }
        }
        (
            true,
            conditions::REASON_RESOLVED_REFS,
            "All backend references resolved".to_string(),
        )
    }

    fn evaluate_parent(
        &self,
        gateway_id: &ResourceId,
        section_name: Option<&str>,
        port: Option<u16>,
        kind: &str,
        info: &RouteInfo,
    ) -> ParentAcceptance {
        let Some(state) = self.gateways.get(gateway_id) else {
            return ParentAcceptance::NoMatchingParent;
        };
        if self
            .active_gateway(&gateway_id.namespace)
            .as_ref()
            .map(|active| active != gateway_id)
            .unwrap_or(true)
        {
            return ParentAcceptance::NoMatchingParent;
        }

        let checks = gateway::check_listeners(
            &gateway_id.namespace,
            state,
            &self.secrets,
            &self.configmaps,
            &self.grants,
        );

        let mut saw_candidate = false;
        let mut kind_rejected = false;
        let mut hostname_rejected = false;
        for check in &checks {
            if section_name.is_some_and(|s| s != check.name) {
                continue;
            }
            if port.is_some_and(|p| p != check.port) {
                continue;
            }
            saw_candidate = true;
            match check.admits(kind, &info.hostnames) {
                Ok(()) => return ParentAcceptance::Accepted,
                Err(AttachError::KindNotAllowed) => kind_rejected = true,
                Err(AttachError::NoHostnameIntersection) => hostname_rejected = true,
            }
        }

        if !saw_candidate {
            ParentAcceptance::NoMatchingParent
        } else if hostname_rejected {
            ParentAcceptance::NoMatchingListenerHostname
        } else if kind_rejected {
            ParentAcceptance::NotAllowedByListeners
        } else {
            ParentAcceptance::NoMatchingParent
        }
    }

    /// The single effective class: the oldest class naming this controller,
    /// ties broken by name.
    fn effective_class(&self) -> Option<&str> {
        self.classes
            .iter()
            .filter(|(_, state)| state.controller_matches)
            .min_by_key(|(name, state)| {
                (
                    state.created.unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
                    name.as_str(),
                )
            })
            .map(|(name, _)| name.as_str())
    }

    /// The active gateway in a namespace: the oldest gateway referencing the
    /// effective class, ties broken by name.
    fn active_gateway(&self, namespace: &str) -> Option<ResourceId> {
        let class = self.effective_class()?;
        self.gateways
            .iter()
            .filter(|(id, state)| id.namespace == namespace && state.class_name == class)
            .min_by_key(|(id, state)| {
                (
                    state.created.unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
                    id.name.clone(),
                )
            })
            .map(|(id, _)| id.clone())
    }

    /// Produces a condition, preserving the previous transition timestamp
    /// when the condition is unchanged and keeping observed generations
    /// monotonic.
    fn condition(
        &mut self,
        id: &NamespaceGroupKindName,
        scope: &str,
        type_: &str,
        status: bool,
        reason: &str,
        message: String,
        observed_generation: Option<i64>,
    ) -> k8s::Condition {
        let mut cond = conditions::condition(type_, status, reason, message, observed_generation);
        let key = (id.clone(), scope.to_string(), type_.to_string());
        if let Some(prev) = self.conditions.get(&key) {
            match (prev.observed_generation, cond.observed_generation) {
                (Some(p), Some(n)) if p > n => cond.observed_generation = Some(p),
                (Some(p), None) => cond.observed_generation = Some(p),
                _ => {}
            }
            if eq_time_insensitive(prev, &cond) {
                cond.last_transition_time = prev.last_transition_time.clone();
            }
        }
        self.conditions.insert(key, cond.clone());
        cond
    }

    fn send_if_changed(
        &mut self,
        id: NamespaceGroupKindName,
        status: serde_json::Value,
        patch: k8s::Patch<serde_json::Value>,
    ) {
        if self.statuses.get(&id) == Some(&status) {
            return;
        }
        match self.updates.try_send(Update {
            id: id.clone(),
            patch,
        }) {
            Ok(()) => {
                self.metrics.updates.inc();
                self.statuses.insert(id, status);
            }
            Err(error) => {
                // The periodic reconciliation retries since the cached status
                // is not advanced.
                self.metrics.updates_dropped.inc();
                tracing::warn!(%id, %error, "Failed to enqueue status update");
            }
        }
    }

    fn forget(&mut self, id: &NamespaceGroupKindName) {
        self.statuses.remove(id);
        self.conditions.retain(|(cid, _, _), _| cid != id);
    }
}

fn cluster_gkn(kind: &'static str, name: &str) -> NamespaceGroupKindName {
    NamespaceGroupKindName {
        namespace: String::new(),
        gkn: GroupKindName {
            group: routes::gateway_api_group().into(),
            kind: kind.into(),
            name: name.to_string().into(),
        },
    }
}

fn namespaced_gkn(kind: &'static str, id: &ResourceId) -> NamespaceGroupKindName {
    NamespaceGroupKindName {
        namespace: id.namespace.clone(),
        gkn: GroupKindName {
            group: routes::gateway_api_group().into(),
            kind: kind.into(),
            name: id.name.clone().into(),
        },
    }
}

fn route_gkn(kind: &'static str, namespace: String, name: String) -> NamespaceGroupKindName {
    NamespaceGroupKindName {
        namespace,
        gkn: GroupKindName {
            group: routes::gateway_api_group().into(),
            kind: kind.into(),
            name: name.into(),
        },
    }
}

// === watch impls ===

impl kubert::index::IndexClusterResource<gw_api::GatewayClass> for Index {
    fn apply(&mut self, resource: gw_api::GatewayClass) {
        let name = resource.name_unchecked();
        let state = ClassState {
            controller_matches: resource.spec.controller_name == self.settings.controller_name,
            created: resource
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|k8s::Time(t)| *t),
            generation: resource.metadata.generation,
        };
        self.classes.insert(name, state);
        self.reconcile();
    }

    fn delete(&mut self, name: String) {
        if self.classes.remove(&name).is_some() {
            self.forget(&cluster_gkn("GatewayClass", &name));
            self.reconcile();
        }
    }
}

impl kubert::index::IndexClusterResource<k8s::Node> for Index {
    fn apply(&mut self, resource: k8s::Node) {
        let name = resource.name_unchecked();
        let status = resource.status.unwrap_or_default();
        let ready = status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Ready" && c.status == "True");
        let mut state = NodeState {
            ready,
            ..Default::default()
        };
        for addr in status.addresses.iter().flatten() {
            match addr.type_.as_str() {
                "ExternalIP" => state.external.push(addr.address.clone()),
                "InternalIP" => state.internal.push(addr.address.clone()),
                _ => {}
            }
        }
        self.nodes.insert(name, state);
        self.reconcile();
    }

    fn delete(&mut self, name: String) {
        if self.nodes.remove(&name).is_some() {
            self.reconcile();
        }
    }
}

impl kubert::index::IndexNamespacedResource<gw_api::Gateway> for Index {
    fn apply(&mut self, resource: gw_api::Gateway) {
        let namespace = resource.namespace().expect("Gateway must have a namespace");
        let name = resource.name_unchecked();
        let state = GatewayState {
            uid: resource.metadata.uid.clone(),
            created: resource
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|k8s::Time(t)| *t),
            generation: resource.metadata.generation,
            class_name: resource.spec.gateway_class_name.clone(),
            listeners: resource.spec.listeners.clone(),
        };
        self.gateways.insert(ResourceId::new(namespace, name), state);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if self.gateways.remove(&id).is_some() {
            self.forget(&namespaced_gkn("Gateway", &id));
            let synthesized = ResourceId::new(id.namespace.clone(), gateway::synthesized_name(&id.name));
            self.forget(&NamespaceGroupKindName {
                namespace: synthesized.namespace.clone(),
                gkn: GroupKindName {
                    group: "apps".into(),
                    kind: "Deployment".into(),
                    name: synthesized.name.clone().into(),
                },
            });
            self.forget(&NamespaceGroupKindName {
                namespace: synthesized.namespace,
                gkn: GroupKindName {
                    group: "".into(),
                    kind: "Service".into(),
                    name: synthesized.name.into(),
                },
            });
            self.reconcile();
        }
    }
}

macro_rules! index_route {
    ($ty:ty, $kind:literal, $module:ident) => {
        impl kubert::index::IndexNamespacedResource<$ty> for Index {
            fn apply(&mut self, resource: $ty) {
                let namespace = resource
                    .namespace()
                    .expect(concat!($kind, " must have a namespace"));
                let name = resource.name_unchecked();
                let info = routes::$module::route_info(&resource, &namespace);
                let id = route_gkn($kind, namespace, name);
                if self.routes.insert(id, info.clone()) != Some(info) {
                    self.reconcile();
                }
            }

            fn delete(&mut self, namespace: String, name: String) {
                let id = route_gkn($kind, namespace, name);
                if self.routes.remove(&id).is_some() {
                    self.forget(&id);
                    self.reconcile();
                }
            }
        }
    };
}

index_route!(gw_api::HTTPRoute, "HTTPRoute", http);
index_route!(gw_api::GRPCRoute, "GRPCRoute", grpc);
index_route!(gw_api::TCPRoute, "TCPRoute", tcp);
index_route!(gw_api::TLSRoute, "TLSRoute", tls);
index_route!(gw_api::UDPRoute, "UDPRoute", udp);

impl kubert::index::IndexNamespacedResource<gw_api::ReferenceGrant> for Index {
    fn apply(&mut self, resource: gw_api::ReferenceGrant) {
        let namespace = resource
            .namespace()
            .expect("ReferenceGrant must have a namespace");
        let name = resource.name_unchecked();
        let state = GrantState {
            from: resource
                .spec
                .from
                .iter()
                .map(|from| {
                    (
                        from.group.clone(),
                        from.kind.clone(),
                        from.namespace.clone(),
                    )
                })
                .collect(),
            to: resource
                .spec
                .to
                .iter()
                .map(|to| (to.group.clone(), to.kind.clone(), to.name.clone()))
                .collect(),
        };
        self.grants.insert(ResourceId::new(namespace, name), state);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .grants
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            self.reconcile();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, resource: k8s::Service) {
        let namespace = resource.namespace().expect("Service must have a namespace");
        let name = resource.name_unchecked();
        let spec = resource.spec.unwrap_or_default();
        let ingress = resource
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default()
            .into_iter()
            .map(|ingress| (ingress.ip, ingress.hostname))
            .collect();
        let state = ServiceState {
            type_: spec.type_,
            ingress,
            ip_families: spec.ip_families,
        };
        self.services.insert(ResourceId::new(namespace, name), state);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if self.services.remove(&id).is_some() {
            // Let the next reconcile re-apply the synthesized service.
            self.forget(&NamespaceGroupKindName {
                namespace: id.namespace,
                gkn: GroupKindName {
                    group: "".into(),
                    kind: "Service".into(),
                    name: id.name.into(),
                },
            });
            self.reconcile();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Deployment> for Index {
    fn apply(&mut self, resource: k8s::Deployment) {
        let namespace = resource
            .namespace()
            .expect("Deployment must have a namespace");
        let name = resource.name_unchecked();
        let available = resource
            .status
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        self.deployments
            .insert(ResourceId::new(namespace, name), available);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if self.deployments.remove(&id).is_some() {
            self.forget(&NamespaceGroupKindName {
                namespace: id.namespace,
                gkn: GroupKindName {
                    group: "apps".into(),
                    kind: "Deployment".into(),
                    name: id.name.into(),
                },
            });
            self.reconcile();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Secret> for Index {
    fn apply(&mut self, resource: k8s::Secret) {
        let namespace = resource.namespace().expect("Secret must have a namespace");
        let name = resource.name_unchecked();
        let has_ca = resource
            .data
            .as_ref()
            .and_then(|data| data.get("ca.crt"))
            .map(|bytes| !bytes.0.is_empty())
            .unwrap_or(false);
        self.secrets.insert(ResourceId::new(namespace, name), has_ca);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .secrets
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            self.reconcile();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::ConfigMap> for Index {
    fn apply(&mut self, resource: k8s::ConfigMap) {
        let namespace = resource
            .namespace()
            .expect("ConfigMap must have a namespace");
        let name = resource.name_unchecked();
        let has_ca = resource
            .data
            .as_ref()
            .and_then(|data| data.get("ca.crt"))
            .map(|value| !value.is_empty())
            .unwrap_or(false);
        self.configmaps
            .insert(ResourceId::new(namespace, name), has_ca);
        self.reconcile();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .configmaps
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            self.reconcile();
        }
    }
}

pub(crate) fn api_version_for(kind: &str) -> &'static str {
    match kind {
        "Gateway" | "GatewayClass" | "HTTPRoute" | "GRPCRoute" => "gateway.networking.k8s.io/v1",
        "ReferenceGrant" => "gateway.networking.k8s.io/v1beta1",
        _ => "gateway.networking.k8s.io/v1alpha2",
    }
}

fn make_status_patch(
    id: &NamespaceGroupKindName,
    status: &serde_json::Value,
) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Merge(serde_json::json!({
        "apiVersion": api_version_for(&id.gkn.kind),
        "kind": id.gkn.kind,
        "name": id.gkn.name,
        "status": status,
    }))
}
