//! Compile-time projections of the route kinds.
//!
//! The status controller validates routes; here they are reduced to the
//! minimum the compiler needs to build traffic matches: parents, hostnames,
//! and per-rule matches with weighted service backends.

use crate::resource_id::ResourceId;
use meshgateway_controller_core::routes::{
    HeaderMatch, HttpRouteMatch, PathMatch, QueryParamMatch,
};
use meshgateway_controller_k8s_api::{self as k8s, gateway, policy};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum RouteKind {
    Http,
    Grpc,
    Tcp,
    Tls,
    Udp,
}

/// A gateway parent reference with the route's namespace already resolved.
/// Parent refs of other kinds are dropped during conversion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ParentRef {
    pub gateway: ResourceId,
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

/// A service backend of a route rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Backend {
    pub service: ResourceId,
    pub port: Option<u16>,
    pub weight: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct HttpRule {
    pub matches: Vec<HttpRouteMatch>,
    pub backends: Vec<Backend>,
}

/// The kind-independent compile model of a route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CompileRoute {
    pub kind: RouteKind,
    pub parents: Vec<ParentRef>,
    pub hostnames: Vec<String>,
    /// Rules for the HTTP-shaped kinds, in declaration order.
    pub http_rules: Vec<HttpRule>,
    /// Backends of the TCP-shaped kinds, which carry no matches.
    pub backends: Vec<Backend>,
}

/// The generated route types repeat the parent- and backend-ref shapes per
/// kind, so the conversions are stamped out over the common field set.
macro_rules! convert_parents {
    ($refs:expr, $ns:expr) => {
        $refs
            .iter()
            .flatten()
            .filter(|pr| {
                pr.group
                    .as_deref()
                    .map(|g| g.eq_ignore_ascii_case("gateway.networking.k8s.io"))
                    .unwrap_or(true)
                    && pr
                        .kind
                        .as_deref()
                        .map(|k| k.eq_ignore_ascii_case("Gateway"))
                        .unwrap_or(true)
            })
            .map(|pr| ParentRef {
                gateway: ResourceId::new(
                    pr.namespace.clone().unwrap_or_else(|| $ns.to_string()),
                    pr.name.clone(),
                ),
                section_name: pr.section_name.clone(),
                port: pr.port.map(|p| p as u16),
            })
            .collect::<Vec<ParentRef>>()
    };
}

macro_rules! convert_backends {
    ($refs:expr, $ns:expr) => {
        $refs
            .iter()
            .flatten()
            .filter(|br| {
                policy::targets_kind::<k8s::Service>(
                    br.group.as_deref(),
                    br.kind.as_deref().unwrap_or("Service"),
                )
            })
            .map(|br| Backend {
                service: ResourceId::new(
                    br.namespace.clone().unwrap_or_else(|| $ns.to_string()),
                    br.name.clone(),
                ),
                port: br.port.map(|p| p as u16),
                weight: br.weight.map_or(1, |w| w.max(0) as u32),
            })
            .collect::<Vec<Backend>>()
    };
}

// === impl RouteKind ===

impl RouteKind {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Http => "HTTPRoute",
            Self::Grpc => "GRPCRoute",
            Self::Tcp => "TCPRoute",
            Self::Tls => "TLSRoute",
            Self::Udp => "UDPRoute",
        }
    }

    pub(crate) fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Grpc)
    }
}

// === impl CompileRoute ===

impl CompileRoute {
    pub(crate) fn from_http(route: &gateway::HTTPRoute, namespace: &str) -> Self {
        let http_rules = route
            .spec
            .rules
            .iter()
            .flatten()
            .map(|rule| HttpRule {
                matches: rule
                    .matches
                    .iter()
                    .flatten()
                    .map(convert_http_match)
                    .collect(),
                backends: convert_backends!(rule.backend_refs, namespace),
            })
            .collect();

        Self {
            kind: RouteKind::Http,
            parents: convert_parents!(route.spec.parent_refs, namespace),
            hostnames: route.spec.hostnames.clone().unwrap_or_default(),
            http_rules,
            backends: Vec::new(),
        }
    }

    pub(crate) fn from_grpc(route: &gateway::GRPCRoute, namespace: &str) -> Self {
        let http_rules = route
            .spec
            .rules
            .iter()
            .flatten()
            .map(|rule| HttpRule {
                matches: rule
                    .matches
                    .iter()
                    .flatten()
                    .map(convert_grpc_match)
                    .collect(),
                backends: convert_backends!(rule.backend_refs, namespace),
            })
            .collect();

        Self {
            kind: RouteKind::Grpc,
            parents: convert_parents!(route.spec.parent_refs, namespace),
            hostnames: route.spec.hostnames.clone().unwrap_or_default(),
            http_rules,
            backends: Vec::new(),
        }
    }

    pub(crate) fn from_tcp(route: &gateway::TCPRoute, namespace: &str) -> Self {
        Self {
            kind: RouteKind::Tcp,
            parents: convert_parents!(route.spec.parent_refs, namespace),
            hostnames: Vec::new(),
            http_rules: Vec::new(),
            backends: route
                .spec
                .rules
                .iter()
                .flat_map(|rule| convert_backends!(rule.backend_refs, namespace))
                .collect(),
        }
    }

    pub(crate) fn from_tls(route: &gateway::TLSRoute, namespace: &str) -> Self {
        Self {
            kind: RouteKind::Tls,
            parents: convert_parents!(route.spec.parent_refs, namespace),
            hostnames: route.spec.hostnames.clone().unwrap_or_default(),
            http_rules: Vec::new(),
            backends: route
                .spec
                .rules
                .iter()
                .flat_map(|rule| convert_backends!(rule.backend_refs, namespace))
                .collect(),
        }
    }

    pub(crate) fn from_udp(route: &gateway::UDPRoute, namespace: &str) -> Self {
        Self {
            kind: RouteKind::Udp,
            parents: convert_parents!(route.spec.parent_refs, namespace),
            hostnames: Vec::new(),
            http_rules: Vec::new(),
            backends: route
                .spec
                .rules
                .iter()
                .flat_map(|rule| convert_backends!(rule.backend_refs, namespace))
                .collect(),
        }
    }

    /// Every service backend of the route, regardless of kind.
    pub(crate) fn all_backends(&self) -> impl Iterator<Item = &Backend> {
        self.http_rules
            .iter()
            .flat_map(|rule| rule.backends.iter())
            .chain(self.backends.iter())
    }
}

fn convert_http_match(route_match: &gateway::HTTPRouteRulesMatches) -> HttpRouteMatch {
    use gateway::{
        HTTPRouteRulesMatchesHeadersType as HeaderType,
        HTTPRouteRulesMatchesPathType as PathType,
        HTTPRouteRulesMatchesQueryParamsType as QueryParamType,
    };

    // An omitted path type is a prefix match, and an omitted value matches
    // the root.
    let path = route_match.path.as_ref().map(|p| {
        let value = p.value.clone().unwrap_or_else(|| "/".to_string());
        match p.r#type {
            Some(PathType::Exact) => PathMatch::Exact(value),
            Some(PathType::RegularExpression) => PathMatch::Regex(value),
            Some(PathType::PathPrefix) | None => PathMatch::Prefix(value),
        }
    });

    let headers = route_match
        .headers
        .iter()
        .flatten()
        .map(|h| match h.r#type {
            Some(HeaderType::RegularExpression) => {
                HeaderMatch::Regex(h.name.clone(), h.value.clone())
            }
            Some(HeaderType::Exact) | None => HeaderMatch::Exact(h.name.clone(), h.value.clone()),
        })
        .collect();

    let query_params = route_match
        .query_params
        .iter()
        .flatten()
        .map(|q| match q.r#type {
            Some(QueryParamType::RegularExpression) => {
                QueryParamMatch::Regex(q.name.clone(), q.value.clone())
            }
            Some(QueryParamType::Exact) | None => {
                QueryParamMatch::Exact(q.name.clone(), q.value.clone())
            }
        })
        .collect();

    HttpRouteMatch {
        path,
        headers,
        query_params,
        method: route_match.method.as_ref().map(method_name),
    }
}

/// Renders a gRPC match as an HTTP match on the `/<service>/<method>` path.
fn convert_grpc_match(route_match: &gateway::GRPCRouteRulesMatches) -> HttpRouteMatch {
    use gateway::{
        GRPCRouteRulesMatchesHeadersType as HeaderType,
        GRPCRouteRulesMatchesMethodType as MethodType,
    };

    let path = route_match.method.as_ref().map(|m| {
        let service = m.service.as_deref();
        let method = m.method.as_deref();
        match m.r#type {
            Some(MethodType::RegularExpression) => PathMatch::Regex(format!(
                "/{}/{}",
                service.unwrap_or("[^/]+"),
                method.unwrap_or("[^/]+")
            )),
            Some(MethodType::Exact) | None => match (service, method) {
                (Some(service), Some(method)) => {
                    PathMatch::Exact(format!("/{service}/{method}"))
                }
                (Some(service), None) => PathMatch::Prefix(format!("/{service}/")),
                (None, Some(method)) => PathMatch::Regex(format!("/[^/]+/{method}")),
                (None, None) => PathMatch::Prefix("/".to_string()),
            },
        }
    });

    let headers = route_match
        .headers
        .iter()
        .flatten()
        .map(|h| match h.r#type {
            Some(HeaderType::RegularExpression) => {
                HeaderMatch::Regex(h.name.clone(), h.value.clone())
            }
            Some(HeaderType::Exact) | None => HeaderMatch::Exact(h.name.clone(), h.value.clone()),
        })
        .collect();

    HttpRouteMatch {
        path,
        headers,
        query_params: Vec::new(),
        method: Some("POST".to_string()),
    }
}

fn method_name(method: &gateway::HTTPRouteRulesMatchesMethod) -> String {
    use gateway::HTTPRouteRulesMatchesMethod::*;
    match method {
        Get => "GET",
        Head => "HEAD",
        Post => "POST",
        Put => "PUT",
        Delete => "DELETE",
        Connect => "CONNECT",
        Options => "OPTIONS",
        Trace => "TRACE",
        Patch => "PATCH",
    }
    .to_string()
}
