use crate::resource_id::ResourceId;
use meshgateway_controller_k8s_api::{self as k8s, policy};

pub(crate) mod grpc;
pub(crate) mod http;
pub(crate) mod tcp;
pub(crate) mod tls;
pub(crate) mod udp;

/// A route's parent reference, classified by kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ParentReference {
    Gateway {
        id: ResourceId,
        section_name: Option<String>,
        port: Option<u16>,
    },
    UnknownKind,
}

/// A route rule's backend reference, classified by kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum BackendReference {
    Service(ResourceId),
    Unknown { group: String, kind: String },
}

/// The kind-independent state the index keeps for a route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RouteInfo {
    pub generation: Option<i64>,
    pub parents: Vec<ParentReference>,
    pub backends: Vec<BackendReference>,
    pub hostnames: Vec<String>,
}

// === impl ParentReference ===

impl ParentReference {
    pub(crate) fn classify(
        group: Option<&str>,
        kind: Option<&str>,
        namespace: Option<&str>,
        name: &str,
        section_name: Option<String>,
        port: Option<i32>,
        default_namespace: &str,
    ) -> Self {
        let group_ok = group
            .map(|g| g.eq_ignore_ascii_case(gateway_api_group()))
            .unwrap_or(true);
        let kind_ok = kind
            .map(|k| k.eq_ignore_ascii_case("Gateway"))
            .unwrap_or(true);
        if group_ok && kind_ok {
            // A parent reference without a namespace targets the route's own
            // namespace.
            let namespace = namespace.unwrap_or(default_namespace);
            Self::Gateway {
                id: ResourceId::new(namespace.to_string(), name.to_string()),
                section_name,
                port: port.map(|p| p as u16),
            }
        } else {
            Self::UnknownKind
        }
    }
}

// === impl BackendReference ===

impl BackendReference {
    pub(crate) fn classify(
        group: Option<&str>,
        kind: Option<&str>,
        namespace: Option<&str>,
        name: &str,
        default_namespace: &str,
    ) -> Self {
        if policy::targets_kind::<k8s::Service>(group, kind.unwrap_or("Service")) {
            let namespace = namespace.unwrap_or(default_namespace);
            Self::Service(ResourceId::new(namespace.to_string(), name.to_string()))
        } else {
            Self::Unknown {
                group: group.unwrap_or_default().to_string(),
                kind: kind.unwrap_or_default().to_string(),
            }
        }
    }
}

pub(crate) fn gateway_api_group() -> &'static str {
    "gateway.networking.k8s.io"
}

// Each route kind has its own generated parent and backend reference structs;
// these stamp the shared classification over any of them.
macro_rules! convert_parents {
    ($refs:expr, $ns:expr) => {
        $refs
            .iter()
            .flatten()
            .map(|pr| {
                crate::routes::ParentReference::classify(
                    pr.group.as_deref(),
                    pr.kind.as_deref(),
                    pr.namespace.as_deref(),
                    &pr.name,
                    pr.section_name.clone(),
                    pr.port,
                    $ns,
                )
            })
            .collect::<Vec<crate::routes::ParentReference>>()
    };
}

macro_rules! convert_backends {
    ($refs:expr, $ns:expr) => {
        $refs
            .map(|br| {
                crate::routes::BackendReference::classify(
                    br.group.as_deref(),
                    br.kind.as_deref(),
                    br.namespace.as_deref(),
                    &br.name,
                    $ns,
                )
            })
            .collect::<Vec<crate::routes::BackendReference>>()
    };
}

pub(crate) use {convert_backends, convert_parents};
