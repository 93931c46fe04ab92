//! Listener validation, gateway address extraction, and synthesis of the
//! Deployment and Service that back an accepted gateway.

use crate::resource_id::ResourceId;
use ahash::AHashMap as HashMap;
use meshgateway_controller_k8s_api::{self as k8s, gateway};
use meshgateway_controller_core::routes::hostnames_intersect;
use std::net::IpAddr;

/// The data key a frontend-validation CA bundle must carry.
const CA_BUNDLE_KEY: &str = "ca.crt";

/// Listener TLS options selecting a frontend-validation CA bundle.
pub(crate) const CA_SECRET_OPTION: &str = "meshgateway.io/ca-secret";
pub(crate) const CA_CONFIGMAP_OPTION: &str = "meshgateway.io/ca-configmap";

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GatewayState {
    pub uid: Option<String>,
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    pub generation: Option<i64>,
    pub class_name: String,
    pub listeners: Vec<gateway::GatewayListeners>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ServiceState {
    pub type_: Option<String>,
    /// (ip, hostname) pairs from the load balancer ingress.
    pub ingress: Vec<(Option<String>, Option<String>)>,
    pub ip_families: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct NodeState {
    pub ready: bool,
    pub external: Vec<String>,
    pub internal: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct GrantState {
    /// (group, kind, namespace) triples permitted to reference.
    pub from: Vec<(String, String, String)>,
    /// (group, kind, name) triples that may be referenced; an empty name
    /// covers every resource of that kind.
    pub to: Vec<(String, String, Option<String>)>,
}

/// The outcome of validating one listener.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ListenerCheck {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub hostname: Option<String>,
    pub supported_kinds: Vec<gateway::GatewayStatusListenersSupportedKinds>,
    pub errors: Vec<ListenerError>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ListenerError {
    InvalidRouteKinds(String),
    RefNotPermitted(String),
    InvalidCertificateRef(String),
}

// === impl ListenerCheck ===

impl ListenerCheck {
    /// Checks whether a route of the given kind with the given hostnames may
    /// attach to this listener. `Err` carries the rejection reason.
    pub(crate) fn admits(&self, kind: &str, hostnames: &[String]) -> Result<(), AttachError> {
        if !self
            .supported_kinds
            .iter()
            .any(|rgk| rgk.kind.eq_ignore_ascii_case(kind))
        {
            return Err(AttachError::KindNotAllowed);
        }
        if !hostnames_intersect(self.hostname.as_deref(), hostnames) {
            return Err(AttachError::NoHostnameIntersection);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AttachError {
    KindNotAllowed,
    NoHostnameIntersection,
}

/// Default route kinds a listener protocol admits.
pub(crate) fn default_route_kinds(protocol: &str) -> &'static [&'static str] {
    match protocol {
        "HTTP" | "HTTPS" => &["HTTPRoute", "GRPCRoute"],
        "TLS" => &["TLSRoute", "TCPRoute"],
        "TCP" => &["TCPRoute"],
        "UDP" => &["UDPRoute"],
        _ => &[],
    }
}

/// Checks whether a grant in `target_ns` permits `(from_group, from_kind)` in
/// `from_ns` to reference `(to_group, to_kind, to_name)`.
pub(crate) fn grant_permits(
    grants: &HashMap<ResourceId, GrantState>,
    target_ns: &str,
    from: (&str, &str, &str),
    to: (&str, &str, &str),
) -> bool {
    grants
        .iter()
        .filter(|(id, _)| id.namespace == target_ns)
        .any(|(_, grant)| {
            let from_ok = grant.from.iter().any(|(g, k, ns)| {
                g.eq_ignore_ascii_case(from.0)
                    && k.eq_ignore_ascii_case(from.1)
                    && ns == from.2
            });
            let to_ok = grant.to.iter().any(|(g, k, name)| {
                normalized_group(g).eq_ignore_ascii_case(normalized_group(to.0))
                    && k.eq_ignore_ascii_case(to.1)
                    && name.as_deref().map(|n| n == to.2).unwrap_or(true)
            });
            from_ok && to_ok
        })
}

fn normalized_group(group: &str) -> &str {
    if group.is_empty() || group.eq_ignore_ascii_case("core") {
        ""
    } else {
        group
    }
}

/// Validates every listener of a gateway.
pub(crate) fn check_listeners(
    gateway_ns: &str,
    state: &GatewayState,
    secrets: &HashMap<ResourceId, bool>,
    configmaps: &HashMap<ResourceId, bool>,
    grants: &HashMap<ResourceId, GrantState>,
) -> Vec<ListenerCheck> {
    state
        .listeners
        .iter()
        .map(|listener| check_listener(gateway_ns, listener, secrets, configmaps, grants))
        .collect()
}

fn check_listener(
    gateway_ns: &str,
    listener: &gateway::GatewayListeners,
    secrets: &HashMap<ResourceId, bool>,
    configmaps: &HashMap<ResourceId, bool>,
    grants: &HashMap<ResourceId, GrantState>,
) -> ListenerCheck {
    let mut errors = Vec::new();

    let defaults = default_route_kinds(&listener.protocol);
    let explicit = listener
        .allowed_routes
        .as_ref()
        .and_then(|ar| ar.kinds.as_ref());
    let supported_kinds = match explicit {
        Some(kinds) => {
            let mut supported = Vec::new();
            let mut invalid = Vec::new();
            for rgk in kinds {
                let group_ok = rgk
                    .group
                    .as_deref()
                    .map(|g| g.is_empty() || g.eq_ignore_ascii_case(crate::routes::gateway_api_group()))
                    .unwrap_or(true);
                if !group_ok {
                    invalid.push(format!(
                        "unsupported group {} for kind {}",
                        rgk.group.as_deref().unwrap_or_default(),
                        rgk.kind
                    ));
                } else if !defaults.iter().any(|k| k.eq_ignore_ascii_case(&rgk.kind)) {
                    invalid.push(format!(
                        "kind {} is not compatible with protocol {}",
                        rgk.kind, listener.protocol
                    ));
                } else {
                    supported.push(gateway::GatewayStatusListenersSupportedKinds {
                        group: Some(crate::routes::gateway_api_group().to_string()),
                        kind: rgk.kind.clone(),
                    });
                }
            }
            if !invalid.is_empty() {
                errors.push(ListenerError::InvalidRouteKinds(invalid.join("; ")));
            }
            supported
        }
        None => defaults
            .iter()
            .map(|kind| gateway::GatewayStatusListenersSupportedKinds {
                group: Some(crate::routes::gateway_api_group().to_string()),
                kind: kind.to_string(),
            })
            .collect(),
    };

    if let Some(tls) = &listener.tls {
        // An omitted mode terminates TLS at the gateway.
        let terminate = !matches!(tls.mode, Some(gateway::GatewayListenersTlsMode::Passthrough));
        if terminate {
            for cert_ref in tls.certificate_refs.iter().flatten() {
                check_cert_ref(gateway_ns, cert_ref, secrets, grants, &mut errors);
            }

            for (option, refs) in [
                (CA_SECRET_OPTION, secrets),
                (CA_CONFIGMAP_OPTION, configmaps),
            ] {
                let Some(value) = tls.options.as_ref().and_then(|opts| opts.get(option)) else {
                    continue;
                };
                check_ca_ref(gateway_ns, option, value, refs, grants, &mut errors);
            }
        }
    }

    ListenerCheck {
        name: listener.name.clone(),
        port: listener.port as u16,
        protocol: listener.protocol.clone(),
        hostname: listener.hostname.clone(),
        supported_kinds,
        errors,
    }
}

fn check_cert_ref(
    gateway_ns: &str,
    cert_ref: &gateway::GatewayListenersTlsCertificateRefs,
    secrets: &HashMap<ResourceId, bool>,
    grants: &HashMap<ResourceId, GrantState>,
    errors: &mut Vec<ListenerError>,
) {
    let group_ok = cert_ref
        .group
        .as_deref()
        .map(|g| g.is_empty() || g.eq_ignore_ascii_case("core"))
        .unwrap_or(true);
    let kind_ok = cert_ref
        .kind
        .as_deref()
        .map(|k| k.eq_ignore_ascii_case("Secret"))
        .unwrap_or(true);
    if !group_ok || !kind_ok {
        errors.push(ListenerError::InvalidCertificateRef(format!(
            "certificate ref {} must be a core Secret",
            cert_ref.name
        )));
        return;
    }

    let ref_ns = cert_ref.namespace.as_deref().unwrap_or(gateway_ns);
    if ref_ns != gateway_ns
        && !grant_permits(
            grants,
            ref_ns,
            (crate::routes::gateway_api_group(), "Gateway", gateway_ns),
            ("", "Secret", &cert_ref.name),
        )
    {
        errors.push(ListenerError::RefNotPermitted(format!(
            "certificate ref {ref_ns}/{} is not permitted by any ReferenceGrant",
            cert_ref.name
        )));
        return;
    }

    let id = ResourceId::new(ref_ns.to_string(), cert_ref.name.clone());
    if !secrets.contains_key(&id) {
        errors.push(ListenerError::InvalidCertificateRef(format!(
            "certificate secret {id} not found"
        )));
    }
}

fn check_ca_ref(
    gateway_ns: &str,
    option: &str,
    value: &str,
    refs: &HashMap<ResourceId, bool>,
    grants: &HashMap<ResourceId, GrantState>,
    errors: &mut Vec<ListenerError>,
) {
    let (ref_ns, name) = match value.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => (gateway_ns, value),
    };

    let kind = if option == CA_SECRET_OPTION {
        "Secret"
    } else {
        "ConfigMap"
    };

    if ref_ns != gateway_ns
        && !grant_permits(
            grants,
            ref_ns,
            (crate::routes::gateway_api_group(), "Gateway", gateway_ns),
            ("", kind, name),
        )
    {
        errors.push(ListenerError::RefNotPermitted(format!(
            "CA ref {ref_ns}/{name} is not permitted by any ReferenceGrant"
        )));
        return;
    }

    let id = ResourceId::new(ref_ns.to_string(), name.to_string());
    match refs.get(&id) {
        Some(true) => {}
        Some(false) => errors.push(ListenerError::InvalidCertificateRef(format!(
            "CA ref {id} has no {CA_BUNDLE_KEY} data"
        ))),
        None => errors.push(ListenerError::InvalidCertificateRef(format!(
            "CA ref {kind} {id} not found"
        ))),
    }
}

/// Extracts gateway addresses from the synthesized service.
pub(crate) fn extract_addresses(
    service: &ServiceState,
    nodes: &HashMap<String, NodeState>,
) -> Vec<gateway::GatewayStatusAddresses> {
    let mut addresses = Vec::new();
    match service.type_.as_deref() {
        Some("LoadBalancer") => {
            for (ip, hostname) in &service.ingress {
                if let Some(ip) = ip {
                    addresses.push(ip_address(ip.clone()));
                }
                match hostname.as_deref() {
                    Some("localhost") => addresses.push(ip_address("127.0.0.1".to_string())),
                    Some(hostname) => addresses.push(gateway::GatewayStatusAddresses {
                        r#type: Some("Hostname".to_string()),
                        value: hostname.to_string(),
                    }),
                    None => {}
                }
            }
        }
        Some("NodePort") => {
            let mut external = Vec::new();
            let mut internal = Vec::new();
            for node in nodes.values().filter(|n| n.ready) {
                external.extend(node.external.iter().cloned());
                internal.extend(node.internal.iter().cloned());
            }
            let mut picked = if external.is_empty() { internal } else { external };
            picked.sort();
            picked.dedup();
            addresses.extend(picked.into_iter().map(ip_address));
        }
        _ => {}
    }

    if let Some(families) = &service.ip_families {
        addresses.retain(|addr| match addr.value.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => families.iter().any(|f| f == "IPv4"),
            Ok(IpAddr::V6(_)) => families.iter().any(|f| f == "IPv6"),
            // Hostnames are not family-specific.
            Err(_) => true,
        });
    }

    addresses
}

fn ip_address(value: String) -> gateway::GatewayStatusAddresses {
    gateway::GatewayStatusAddresses {
        r#type: Some("IPAddress".to_string()),
        value,
    }
}

/// Renders the Deployment backing an accepted gateway as a server-side-apply
/// patch.
pub(crate) fn deployment_patch(
    id: &ResourceId,
    state: &GatewayState,
    proxy_image: &str,
) -> serde_json::Value {
    let labels = gateway_labels(id);
    serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": synthesized_name(&id.name),
            "namespace": id.namespace,
            "labels": labels,
            "ownerReferences": owner_references(id, state),
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "containers": [{
                        "name": "proxy",
                        "image": proxy_image,
                        "ports": container_ports(state),
                    }],
                },
            },
        },
    })
}

/// Renders the Service exposing an accepted gateway as a server-side-apply
/// patch.
pub(crate) fn service_patch(
    id: &ResourceId,
    state: &GatewayState,
    service_type: &str,
) -> serde_json::Value {
    let labels = gateway_labels(id);
    let ports = state
        .listeners
        .iter()
        .map(|listener| {
            serde_json::json!({
                "name": listener.name,
                "port": listener.port,
                "targetPort": listener.port,
                "protocol": if listener.protocol == "UDP" { "UDP" } else { "TCP" },
            })
        })
        .collect::<Vec<_>>();

    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": synthesized_name(&id.name),
            "namespace": id.namespace,
            "labels": labels,
            "ownerReferences": owner_references(id, state),
        },
        "spec": {
            "type": service_type,
            "selector": labels,
            "ports": ports,
        },
    })
}

pub(crate) fn synthesized_name(gateway_name: &str) -> String {
    format!("gateway-{gateway_name}")
}

fn gateway_labels(id: &ResourceId) -> serde_json::Value {
    serde_json::json!({
        k8s::GATEWAY_NAME_LABEL: id.name,
        k8s::GATEWAY_NS_LABEL: id.namespace,
    })
}

fn owner_references(id: &ResourceId, state: &GatewayState) -> serde_json::Value {
    match &state.uid {
        Some(uid) => serde_json::json!([{
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "name": id.name,
            "uid": uid,
            "controller": true,
        }]),
        None => serde_json::json!([]),
    }
}

fn container_ports(state: &GatewayState) -> Vec<serde_json::Value> {
    state
        .listeners
        .iter()
        .map(|listener| {
            serde_json::json!({
                "name": listener.name,
                "containerPort": listener.port,
                "protocol": if listener.protocol == "UDP" { "UDP" } else { "TCP" },
            })
        })
        .collect()
}
