use crate::{
    cert::{CertificateIssuer, IssuedCertificate},
    cluster_info::{ClusterInfo, MeshConfig},
    index::IndexMetrics,
    registry::ProxyId,
    resource_id::ResourceId,
    Index, SharedIndex,
};
use chrono::{TimeZone, Utc};
use meshgateway_controller_core::{
    document::Certificate, fnv::hashed_name, Error, CONTROLLER_NAME,
};
use meshgateway_controller_k8s_api::{self as k8s, gateway};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

mod ordering;

pub(crate) fn make_index() -> (SharedIndex, watch::Receiver<()>) {
    make_index_with(ClusterInfo {
        controller_name: CONTROLLER_NAME.to_string(),
        pretty_config: false,
        mesh: MeshConfig::default(),
    })
}

pub(crate) fn make_index_with(cluster_info: ClusterInfo) -> (SharedIndex, watch::Receiver<()>) {
    Index::shared(cluster_info, IndexMetrics::register(&mut Default::default()))
}

pub(crate) fn apply_cluster<R>(index: &SharedIndex, resource: R)
where
    Index: kubert::index::IndexClusterResource<R>,
{
    kubert::index::IndexClusterResource::apply(&mut *index.write(), resource);
}

pub(crate) fn apply<R>(index: &SharedIndex, resource: R)
where
    Index: kubert::index::IndexNamespacedResource<R>,
{
    kubert::index::IndexNamespacedResource::apply(&mut *index.write(), resource);
}

pub(crate) fn delete<R>(index: &SharedIndex, namespace: &str, name: &str)
where
    Index: kubert::index::IndexNamespacedResource<R>,
{
    kubert::index::IndexNamespacedResource::<R>::delete(
        &mut *index.write(),
        namespace.to_string(),
        name.to_string(),
    );
}

pub(crate) fn proxy(namespace: &str, gateway: &str) -> ProxyId {
    ProxyId(ResourceId::new(namespace.to_string(), gateway.to_string()))
}

/// Issues fixed certificates and counts how often it is asked.
#[derive(Default)]
pub(crate) struct StaticIssuer {
    pub issued: AtomicUsize,
}

impl CertificateIssuer for StaticIssuer {
    fn issue(
        &self,
        common_name: &str,
        sans: &[String],
        validity_secs: u64,
    ) -> Result<IssuedCertificate, Error> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let expires_at = Utc::now() + chrono::Duration::seconds(validity_secs as i64);
        Ok(IssuedCertificate {
            certificate: Certificate {
                expiration: expires_at.to_rfc3339(),
                common_name: common_name.to_string(),
                cert_chain: "-----CHAIN-----".to_string(),
                private_key: "-----KEY-----".to_string(),
                issuing_ca: "-----CA-----".to_string(),
            },
            expires_at,
            sans: sans.to_vec(),
        })
    }
}

pub(crate) fn created_at(secs: i64) -> k8s::Time {
    k8s::Time(Utc.timestamp_opt(secs, 0).unwrap())
}

pub(crate) fn make_class(name: &str, created_secs: i64) -> gateway::GatewayClass {
    gateway::GatewayClass {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            creation_timestamp: Some(created_at(created_secs)),
            ..Default::default()
        },
        spec: gateway::GatewayClassSpec {
            controller_name: CONTROLLER_NAME.to_string(),
            parameters_ref: None,
            description: None,
        },
        status: None,
    }
}

pub(crate) fn listener(name: &str, port: u16, protocol: &str) -> gateway::GatewayListeners {
    gateway::GatewayListeners {
        name: name.to_string(),
        hostname: None,
        port: i32::from(port),
        protocol: protocol.to_string(),
        tls: None,
        allowed_routes: None,
    }
}

pub(crate) fn make_gateway(
    namespace: &str,
    name: &str,
    created_secs: i64,
    listeners: Vec<gateway::GatewayListeners>,
) -> gateway::Gateway {
    gateway::Gateway {
        metadata: k8s::ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            creation_timestamp: Some(created_at(created_secs)),
            ..Default::default()
        },
        spec: gateway::GatewaySpec {
            gateway_class_name: "mesh".to_string(),
            listeners,
            addresses: None,
            infrastructure: None,
        },
        status: None,
    }
}

pub(crate) fn make_pod(
    namespace: &str,
    name: &str,
    gateway: &str,
    ip: Option<&str>,
) -> k8s::Pod {
    k8s::Pod {
        metadata: k8s::ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            labels: Some(
                [(k8s::GATEWAY_NAME_LABEL.to_string(), gateway.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
        status: Some(k8s::api::core::v1::PodStatus {
            pod_ip: ip.map(ToString::to_string),
            ..Default::default()
        }),
    }
}

pub(crate) fn make_service(
    namespace: &str,
    name: &str,
    cluster_ip: &str,
    port: u16,
) -> k8s::Service {
    k8s::Service {
        metadata: k8s::ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(k8s::ServiceSpec {
            cluster_ip: Some(cluster_ip.to_string()),
            ports: Some(vec![k8s::ServicePort {
                port: i32::from(port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn make_slice(
    namespace: &str,
    name: &str,
    service: &str,
    addresses: &[&str],
    port: u16,
) -> k8s::EndpointSlice {
    k8s::EndpointSlice {
        metadata: k8s::ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            labels: Some(
                [("kubernetes.io/service-name".to_string(), service.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        address_type: "IPv4".to_string(),
        endpoints: addresses
            .iter()
            .map(|addr| k8s::Endpoint {
                addresses: vec![addr.to_string()],
                conditions: Some(k8s::api::discovery::v1::EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![k8s::EndpointPort {
            port: Some(i32::from(port)),
            ..Default::default()
        }]),
    }
}

pub(crate) fn make_http_route(
    namespace: &str,
    name: &str,
    parent: &str,
    backend: (&str, u16),
) -> gateway::HTTPRoute {
    make_http_route_with_rules(
        namespace,
        name,
        parent,
        vec![http_rule(
            Some(path_match(
                gateway::HTTPRouteRulesMatchesPathType::PathPrefix,
                "/api",
            )),
            backend,
        )],
    )
}

pub(crate) fn make_http_route_with_rules(
    namespace: &str,
    name: &str,
    parent: &str,
    rules: Vec<gateway::HTTPRouteRules>,
) -> gateway::HTTPRoute {
    gateway::HTTPRoute {
        metadata: k8s::ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: gateway::HTTPRouteSpec {
            parent_refs: Some(vec![gateway::HTTPRouteParentRefs {
                group: None,
                kind: None,
                namespace: None,
                name: parent.to_string(),
                section_name: None,
                port: None,
            }]),
            hostnames: None,
            rules: Some(rules),
        },
        status: None,
    }
}

pub(crate) fn path_match(
    r#type: gateway::HTTPRouteRulesMatchesPathType,
    value: &str,
) -> gateway::HTTPRouteRulesMatchesPath {
    gateway::HTTPRouteRulesMatchesPath {
        r#type: Some(r#type),
        value: Some(value.to_string()),
    }
}

pub(crate) fn http_rule(
    path: Option<gateway::HTTPRouteRulesMatchesPath>,
    backend: (&str, u16),
) -> gateway::HTTPRouteRules {
    gateway::HTTPRouteRules {
        matches: Some(vec![gateway::HTTPRouteRulesMatches {
            path,
            ..Default::default()
        }]),
        backend_refs: Some(vec![http_backend(backend.0, None, backend.1)]),
        ..Default::default()
    }
}

pub(crate) fn http_backend(
    name: &str,
    namespace: Option<&str>,
    port: u16,
) -> gateway::HTTPRouteRulesBackendRefs {
    gateway::HTTPRouteRulesBackendRefs {
        name: name.to_string(),
        namespace: namespace.map(ToString::to_string),
        port: Some(i32::from(port)),
        ..Default::default()
    }
}

/// Applies the resources of a minimal working gateway: an accepted class, a
/// gateway with an HTTP listener on port 80, a proxy pod with an address, and
/// an HTTP route to a backend service with one ready endpoint.
pub(crate) fn apply_working_gateway(index: &SharedIndex) {
    apply_cluster(index, make_class("mesh", 50));
    apply(
        index,
        make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]),
    );
    apply(index, make_pod("ns1", "gw-a-0", "gw-a", Some("10.0.0.9")));
    apply(index, make_http_route("ns1", "r1", "gw-a", ("svc-a", 8080)));
    apply(index, make_service("ns1", "svc-a", "10.96.0.10", 8080));
    apply(
        index,
        make_slice("ns1", "svc-a-x", "svc-a", &["10.244.0.5"], 8080),
    );
}

pub(crate) fn cluster_name(service: &str, port: u16) -> String {
    hashed_name(&format!("{service}:{port}"), false)
}

pub(crate) fn ruleset_name(route: &str) -> String {
    hashed_name(route, false)
}
