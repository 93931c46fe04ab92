use crate::{
    cluster_info::ClusterInfo,
    endpoints::{ServiceMeta, SliceMeta},
    policy::{FilterStore, GrantMeta, PolicyStore},
    registry::{ProxyId, Registry},
    resource_id::ResourceId,
    routes::{CompileRoute, RouteKind},
};
use ahash::AHashMap as HashMap;
use meshgateway_controller_core::document::ProxyConfig;
use meshgateway_controller_k8s_api::{
    self as k8s, extension, gateway as gw_api, policy, ResourceExt,
};
use parking_lot::RwLock;
use prometheus_client::{metrics::counter::Counter, registry::Registry as PromRegistry};
use std::sync::Arc;
use tokio::sync::watch;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Watches everything the compiler consumes and notifies the compile loop on
/// any change.
///
/// The index never compiles inline; mutations are cheap cache updates plus a
/// change-notification send, and the compile loop recompiles all registered
/// proxies at its own pace.
pub struct Index {
    pub(crate) cluster_info: Arc<ClusterInfo>,
    changed: watch::Sender<()>,
    metrics: IndexMetrics,

    pub(crate) classes: HashMap<String, ClassMeta>,
    pub(crate) gateways: HashMap<ResourceId, GatewayMeta>,
    pub(crate) routes: HashMap<(RouteKind, ResourceId), CompileRoute>,
    pub(crate) services: HashMap<ResourceId, ServiceMeta>,
    pub(crate) slices: HashMap<ResourceId, SliceMeta>,
    pub(crate) grants: HashMap<ResourceId, GrantMeta>,
    pub(crate) policies: PolicyStore,
    pub(crate) filters: FilterStore,
    pub(crate) registry: Registry,
}

#[derive(Clone, Debug)]
pub(crate) struct ClassMeta {
    pub controller_matches: bool,
    pub created: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone, Debug)]
pub(crate) struct GatewayMeta {
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    pub class_name: String,
    pub listeners: Vec<ListenerMeta>,
}

/// The subset of a listener the compiler consumes.
#[derive(Clone, Debug)]
pub(crate) struct ListenerMeta {
    pub name: String,
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: String,
}

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    pub(crate) compiles: Counter,
    pub(crate) compile_errors: Counter,
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut PromRegistry) -> Self {
        let compiles = Counter::default();
        prom.register(
            "compiles",
            "Total number of successful proxy configuration compiles",
            compiles.clone(),
        );

        let compile_errors = Counter::default();
        prom.register(
            "compile_errors",
            "Total number of failed proxy configuration compiles",
            compile_errors.clone(),
        );

        Self {
            compiles,
            compile_errors,
        }
    }
}

// === impl Index ===

impl Index {
    /// Creates the shared index along with the change-notification channel
    /// consumed by the compile loop.
    pub fn shared(
        cluster_info: ClusterInfo,
        metrics: IndexMetrics,
    ) -> (SharedIndex, watch::Receiver<()>) {
        let (changed, notifications) = watch::channel(());
        let index = Arc::new(RwLock::new(Self {
            cluster_info: Arc::new(cluster_info),
            changed,
            metrics,
            classes: HashMap::new(),
            gateways: HashMap::new(),
            routes: HashMap::new(),
            services: HashMap::new(),
            slices: HashMap::new(),
            grants: HashMap::new(),
            policies: PolicyStore::default(),
            filters: FilterStore::default(),
            registry: Registry::default(),
        }));
        (index, notifications)
    }

    pub(crate) fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// The registered proxies, in a stable order.
    pub fn proxy_ids(&self) -> Vec<ProxyId> {
        self.registry.ids()
    }

    /// Subscribes to a proxy's compiled configuration, registering the proxy
    /// if it is not yet known.
    pub fn subscribe_proxy(&mut self, id: ProxyId) -> watch::Receiver<Option<Arc<ProxyConfig>>> {
        self.registry.register(id)
    }

    fn notify(&mut self) {
        self.changed.send_replace(());
    }

    /// The single effective class: the oldest class naming this controller,
    /// ties broken by name.
    pub(crate) fn effective_class(&self) -> Option<&str> {
        self.classes
            .iter()
            .filter(|(_, meta)| meta.controller_matches)
            .min_by_key(|(name, meta)| {
                (
                    meta.created
                        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
                    name.as_str(),
                )
            })
            .map(|(name, _)| name.as_str())
    }

    /// The active gateway in a namespace: the oldest gateway referencing the
    /// effective class, ties broken by name.
    pub(crate) fn active_gateway(&self, namespace: &str) -> Option<ResourceId> {
        let class = self.effective_class()?;
        self.gateways
            .iter()
            .filter(|(id, meta)| id.namespace == namespace && meta.class_name == class)
            .min_by_key(|(id, meta)| {
                (
                    meta.created
                        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
                    id.name.clone(),
                )
            })
            .map(|(id, _)| id.clone())
    }
}

// === watch impls ===

impl kubert::index::IndexClusterResource<gw_api::GatewayClass> for Index {
    fn apply(&mut self, resource: gw_api::GatewayClass) {
        let name = resource.name_unchecked();
        let meta = ClassMeta {
            controller_matches: resource.spec.controller_name
                == self.cluster_info.controller_name,
            created: resource
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|k8s::Time(t)| *t),
        };
        self.classes.insert(name, meta);
        self.notify();
    }

    fn delete(&mut self, name: String) {
        if self.classes.remove(&name).is_some() {
            self.notify();
        }
    }
}

impl kubert::index::IndexNamespacedResource<gw_api::Gateway> for Index {
    fn apply(&mut self, resource: gw_api::Gateway) {
        let namespace = resource.namespace().expect("Gateway must have a namespace");
        let name = resource.name_unchecked();
        let meta = GatewayMeta {
            created: resource
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|k8s::Time(t)| *t),
            class_name: resource.spec.gateway_class_name.clone(),
            listeners: resource
                .spec
                .listeners
                .iter()
                .map(|l| ListenerMeta {
                    name: l.name.clone(),
                    hostname: l.hostname.clone(),
                    port: l.port as u16,
                    protocol: l.protocol.clone(),
                })
                .collect(),
        };
        self.gateways.insert(ResourceId::new(namespace, name), meta);
        self.notify();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if self.gateways.remove(&id).is_some() {
            self.registry.unregister(&ProxyId(id));
            self.notify();
        }
    }
}

macro_rules! index_route {
    ($ty:ty, $kind:expr, $convert:path) => {
        impl kubert::index::IndexNamespacedResource<$ty> for Index {
            fn apply(&mut self, resource: $ty) {
                let namespace = resource.namespace().expect("route must have a namespace");
                let name = resource.name_unchecked();
                let route = $convert(&resource, &namespace);
                let key = ($kind, ResourceId::new(namespace, name));
                if self.routes.insert(key, route.clone()) != Some(route) {
                    self.notify();
                }
            }

            fn delete(&mut self, namespace: String, name: String) {
                let key = ($kind, ResourceId::new(namespace, name));
                if self.routes.remove(&key).is_some() {
                    self.notify();
                }
            }
        }
    };
}

index_route!(gw_api::HTTPRoute, RouteKind::Http, CompileRoute::from_http);
index_route!(gw_api::GRPCRoute, RouteKind::Grpc, CompileRoute::from_grpc);
index_route!(gw_api::TCPRoute, RouteKind::Tcp, CompileRoute::from_tcp);
index_route!(gw_api::TLSRoute, RouteKind::Tls, CompileRoute::from_tls);
index_route!(gw_api::UDPRoute, RouteKind::Udp, CompileRoute::from_udp);

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, resource: k8s::Service) {
        let namespace = resource.namespace().expect("Service must have a namespace");
        let name = resource.name_unchecked();
        let meta = ServiceMeta::from_service(&resource);
        self.services.insert(ResourceId::new(namespace, name), meta);
        self.notify();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .services
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            self.notify();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::EndpointSlice> for Index {
    fn apply(&mut self, resource: k8s::EndpointSlice) {
        let namespace = resource
            .namespace()
            .expect("EndpointSlice must have a namespace");
        let name = resource.name_unchecked();
        let meta = SliceMeta::from_slice(&resource);
        self.slices.insert(ResourceId::new(namespace, name), meta);
        self.notify();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .slices
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            self.notify();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, resource: k8s::Pod) {
        let namespace = resource.namespace().expect("Pod must have a namespace");
        let name = resource.name_unchecked();
        let Some(gateway) = resource.labels().get(k8s::GATEWAY_NAME_LABEL).cloned() else {
            return;
        };

        let ip = resource.status.and_then(|s| s.pod_ip);
        let id = ProxyId(ResourceId::new(namespace, gateway));
        self.registry.register(id.clone());
        if let Some(entry) = self.registry.get_mut(&id) {
            entry.pods.insert(name, ip);
        }
        self.notify();
    }

    fn delete(&mut self, namespace: String, name: String) {
        let mut emptied = None;
        for id in self.registry.ids() {
            if id.0.namespace != namespace {
                continue;
            }
            if let Some(entry) = self.registry.get_mut(&id) {
                if entry.pods.remove(&name).is_some() && entry.pods.is_empty() {
                    emptied = Some(id);
                }
            }
        }
        if let Some(id) = emptied {
            self.registry.unregister(&id);
        }
        self.notify();
    }
}

impl kubert::index::IndexNamespacedResource<gw_api::ReferenceGrant> for Index {
    fn apply(&mut self, resource: gw_api::ReferenceGrant) {
        let namespace = resource
            .namespace()
            .expect("ReferenceGrant must have a namespace");
        let name = resource.name_unchecked();
        let meta = GrantMeta::from_grant(&resource);
        self.grants.insert(ResourceId::new(namespace, name), meta);
        self.notify();
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .grants
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            self.notify();
        }
    }
}

macro_rules! index_policy {
    ($ty:ty, $field:ident) => {
        impl kubert::index::IndexNamespacedResource<$ty> for Index {
            fn apply(&mut self, resource: $ty) {
                let namespace = resource.namespace().expect("policy must have a namespace");
                let name = resource.name_unchecked();
                self.policies
                    .$field
                    .insert(ResourceId::new(namespace, name), resource.spec);
                self.notify();
            }

            fn delete(&mut self, namespace: String, name: String) {
                if self
                    .policies
                    .$field
                    .remove(&ResourceId::new(namespace, name))
                    .is_some()
                {
                    self.notify();
                }
            }
        }
    };
}

index_policy!(policy::RetryPolicy, retries);
index_policy!(policy::HealthCheckPolicy, health_checks);
index_policy!(policy::BackendLBPolicy, backend_lbs);
index_policy!(policy::BackendTLSPolicy, backend_tls);
index_policy!(policy::RouteRuleFilterPolicy, rule_filters);

macro_rules! index_filter {
    ($ty:ty, $field:ident) => {
        impl kubert::index::IndexNamespacedResource<$ty> for Index {
            fn apply(&mut self, resource: $ty) {
                let namespace = resource.namespace().expect("filter must have a namespace");
                let name = resource.name_unchecked();
                self.filters
                    .$field
                    .insert(ResourceId::new(namespace, name), resource.spec);
                self.notify();
            }

            fn delete(&mut self, namespace: String, name: String) {
                if self
                    .filters
                    .$field
                    .remove(&ResourceId::new(namespace, name))
                    .is_some()
                {
                    self.notify();
                }
            }
        }
    };
}

index_filter!(extension::Filter, filters);
index_filter!(extension::FilterDefinition, definitions);
index_filter!(extension::FilterConfig, configs);
