//! Assembles per-proxy configuration documents from the indexed state.
//!
//! Compilation is a pure function of the index contents apart from
//! certificate rotation, which caches the issued certificate on the proxy's
//! registry entry. Documents are left unversioned; the publisher stamps the
//! version and timestamp once the fingerprint is known.

use crate::{
    cert::CertificateIssuer,
    endpoints,
    index::{Index, ListenerMeta},
    policy::grant_permits,
    registry::ProxyId,
    resource_id::ResourceId,
    routes::{Backend, CompileRoute, HttpRule, RouteKind},
};
use meshgateway_controller_core::{
    document::{
        ClusterConfig, HttpRouteRule, InboundTrafficMatch, OutboundTrafficMatch, PathMatchType,
        PluginChain, ProxyConfig, SourceSecuritySpec, TcpRouteRules, WeightedEndpoint,
        WeightedEndpoints, rebalance_endpoints,
    },
    fnv::hashed_name,
    routes::{HeaderMatch, HttpRouteMatch, PathMatch},
    IpNet, CLUSTER_WEIGHT_ACCEPT_ALL,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A registered proxy's pods have not all been assigned addresses yet;
    /// the caller should retry shortly.
    #[error("proxy addresses not ready: {0}")]
    NotReady(String),

    #[error("unknown proxy: {0}")]
    UnknownProxy(String),

    #[error("certificate issuance failed: {0}")]
    Certificate(#[from] meshgateway_controller_core::Error),
}

// === impl Index ===

impl Index {
    /// Compiles every registered proxy and publishes each document through
    /// the proxy's watch channel.
    pub fn compile_all(
        &mut self,
        issuer: &dyn CertificateIssuer,
    ) -> Result<Vec<(ProxyId, Arc<ProxyConfig>)>, CompileError> {
        let ids = self.registry.ids();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let doc = match self.compile(&id, issuer) {
                Ok(doc) => doc,
                Err(error) => {
                    self.metrics().compile_errors.inc();
                    tracing::warn!(%id, %error, "Failed to compile proxy configuration");
                    return Err(error);
                }
            };
            self.metrics().compiles.inc();
            if let Some(entry) = self.registry.get_mut(&id) {
                entry.publish(doc.clone());
            }
            out.push((id, doc));
        }
        Ok(out)
    }

    /// Compiles the configuration document for one proxy.
    pub fn compile(
        &mut self,
        id: &ProxyId,
        issuer: &dyn CertificateIssuer,
    ) -> Result<Arc<ProxyConfig>, CompileError> {
        if !self.registry.contains(id) {
            return Err(CompileError::UnknownProxy(id.to_string()));
        }
        let addresses = self
            .registry
            .addresses()
            .ok_or_else(|| CompileError::NotReady(id.to_string()))?;
        let gateway = self
            .gateways
            .get(&id.0)
            .ok_or_else(|| CompileError::UnknownProxy(id.to_string()))?
            .clone();
        let is_active = self
            .active_gateway(&id.0.namespace)
            .as_ref()
            .is_some_and(|active| active == &id.0);

        let cluster_info = self.cluster_info.clone();
        let pretty = cluster_info.pretty_config;
        let mesh = &cluster_info.mesh;

        let mut doc = ProxyConfig {
            spec: mesh.proxy_spec(),
            ..Default::default()
        };

        for (addr, name) in &addresses {
            doc.allowed_endpoints.insert(addr.clone(), name.clone());
        }

        let source_ip_ranges: BTreeMap<String, SourceSecuritySpec> = addresses
            .iter()
            .map(|(addr, _)| {
                (
                    format!("{addr}/32"),
                    SourceSecuritySpec {
                        mtls: mesh.mtls,
                        skip_client_cert_validation: None,
                    },
                )
            })
            .collect();

        let mut sans = BTreeSet::new();
        sans.insert(id.common_name());
        let mut chains: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for listener in &gateway.listeners {
            if let Some(hostname) = &listener.hostname {
                sans.insert(hostname.clone());
            }

            let mut rulesets: BTreeMap<String, Vec<HttpRouteRule>> = BTreeMap::new();
            let mut hosts: BTreeMap<String, String> = BTreeMap::new();
            let mut destinations = BTreeSet::new();
            let mut tcp_targets = BTreeSet::new();

            for ((kind, route_id), route) in self.attached_routes(&id.0, listener) {
                for hostname in &route.hostnames {
                    sans.insert(hostname.clone());
                }

                if kind.is_http() {
                    let ruleset = hashed_name(&route_id.to_string(), pretty);
                    for hostname in effective_hostnames(listener, route) {
                        insert_host(&mut hosts, hostname.to_string(), &ruleset);
                        insert_host(
                            &mut hosts,
                            format!("{hostname}:{}", listener.port),
                            &ruleset,
                        );
                    }

                    let (rules, rule_chains) =
                        self.compile_http_rules(kind, route_id, route, pretty);
                    for chain in rule_chains {
                        chains.entry(chain.name).or_insert(chain.plugins);
                    }
                    rulesets.entry(ruleset).or_default().extend(rules);
                } else {
                    for backend in &route.backends {
                        if !self.backend_permitted(kind, route_id, backend) {
                            continue;
                        }
                        if let Some((cluster, _)) = self.backend_cluster(backend, pretty) {
                            tcp_targets.insert(cluster);
                        }
                    }
                }

                for backend in route.all_backends() {
                    if !self.backend_permitted(kind, route_id, backend) {
                        continue;
                    }
                    let Some(service) = self.services.get(&backend.service) else {
                        continue;
                    };
                    if let Some(ip) = &service.cluster_ip {
                        destinations.insert(format!("{ip}/32"));
                        doc.dns_resolve_db
                            .entry(format!(
                                "{}.{}",
                                backend.service.name, backend.service.namespace
                            ))
                            .or_insert_with(|| vec![ip.clone()]);
                    }
                    if let Some((cluster, port)) = self.backend_cluster(backend, pretty) {
                        let config = self.cluster_config(backend, port);
                        doc.inbound.clusters_configs.insert(
                            cluster.clone(),
                            WeightedEndpoints {
                                endpoints: config.endpoints.clone(),
                            },
                        );
                        doc.outbound.clusters_configs.insert(cluster, config);
                    }
                }
            }

            let tcp_rules = (!tcp_targets.is_empty()).then(|| TcpRouteRules {
                targets: tcp_targets.into_iter().collect(),
                allowed_egress_traffic: mesh.enable_egress,
                egress_forward_gateway: None,
            });

            doc.inbound.traffic_matches.insert(
                listener.port,
                InboundTrafficMatch {
                    port: listener.port,
                    protocol: listener.protocol.clone(),
                    source_ip_ranges: source_ip_ranges.clone(),
                    http_host_port_to_service: hosts.clone(),
                    http_service_route_rules: rulesets.clone(),
                    tcp_service_route_rules: tcp_rules.clone(),
                    ..Default::default()
                },
            );

            // Election gates the mesh-facing side only; the gateway's own
            // listeners always serve their attached routes.
            if !is_active {
                continue;
            }

            doc.outbound
                .traffic_matches
                .entry(listener.port)
                .or_default()
                .push(OutboundTrafficMatch {
                    name: format!("{}_{}", listener.port, listener.name),
                    port: listener.port,
                    protocol: listener.protocol.clone(),
                    destination_ip_ranges: destinations.into_iter().collect(),
                    http_host_port_to_service: hosts,
                    http_service_route_rules: rulesets,
                    tcp_service_route_rules: tcp_rules,
                });
        }

        for matches in doc.outbound.traffic_matches.values_mut() {
            sort_outbound_matches(matches);
        }

        doc.chains = chains
            .into_iter()
            .map(|(name, plugins)| PluginChain { name, plugins })
            .collect();

        if mesh.mtls {
            let sans: Vec<String> = sans.into_iter().collect();
            let now = chrono::Utc::now();
            let validity = mesh.certificate_validity_secs;
            let common_name = id.common_name();
            let entry = self
                .registry
                .get_mut(id)
                .ok_or_else(|| CompileError::UnknownProxy(id.to_string()))?;
            let stale = entry
                .certificate
                .as_ref()
                .map(|cert| cert.is_stale(&sans, validity, now))
                .unwrap_or(true);
            if stale {
                entry.certificate = Some(issuer.issue(&common_name, &sans, validity)?);
            }
            doc.certificate = entry
                .certificate
                .as_ref()
                .map(|cert| cert.certificate.clone());
        }

        Ok(Arc::new(doc))
    }

    /// The routes attached to a listener of the given gateway: a parent ref
    /// must name the gateway (and the listener, when it carries a section
    /// name or port), the kind must be compatible with the listener protocol,
    /// and the hostnames must intersect.
    fn attached_routes<'i>(
        &'i self,
        gateway_id: &'i ResourceId,
        listener: &'i ListenerMeta,
    ) -> impl Iterator<Item = ((RouteKind, &'i ResourceId), &'i CompileRoute)> {
        self.routes
            .iter()
            .filter(move |((kind, _), route)| {
                kind_matches_protocol(*kind, &listener.protocol)
                    && meshgateway_controller_core::routes::hostnames_intersect(
                        listener.hostname.as_deref(),
                        &route.hostnames,
                    )
                    && route.parents.iter().any(|parent| {
                        &parent.gateway == gateway_id
                            && parent
                                .section_name
                                .as_deref()
                                .map(|s| s == listener.name)
                                .unwrap_or(true)
                            && parent.port.map(|p| p == listener.port).unwrap_or(true)
                    })
            })
            .map(|((kind, id), route)| ((*kind, id), route))
    }

    /// Renders a route's rules as document rules ordered by specificity,
    /// along with the plugin chains attached to them.
    fn compile_http_rules(
        &self,
        kind: RouteKind,
        route_id: &ResourceId,
        route: &CompileRoute,
        pretty: bool,
    ) -> (Vec<HttpRouteRule>, Vec<PluginChain>) {
        let mut keyed: Vec<(RuleSortKey, HttpRouteRule)> = Vec::new();
        let mut chains = Vec::new();

        for (idx, rule) in route.http_rules.iter().enumerate() {
            let name = hashed_name(&format!("{route_id}.{idx}"), pretty);

            let plugins: Vec<String> = self
                .policies
                .rule_filters(kind.kind(), route_id, &idx.to_string(), &self.grants)
                .iter()
                .filter_map(|filter_id| self.filters.plugin(filter_id))
                .collect();
            if !plugins.is_empty() {
                chains.push(PluginChain {
                    name: name.clone(),
                    plugins,
                });
            }

            let weighted_clusters = self.weighted_clusters(kind, route_id, rule, pretty);
            let default_match = HttpRouteMatch {
                path: None,
                headers: Vec::new(),
                query_params: Vec::new(),
                method: None,
            };
            let matches: &[HttpRouteMatch] = if rule.matches.is_empty() {
                std::slice::from_ref(&default_match)
            } else {
                &rule.matches
            };

            for route_match in matches {
                keyed.push(make_rule(&name, route_match, weighted_clusters.clone()));
            }
        }

        keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        (keyed.into_iter().map(|(_, rule)| rule).collect(), chains)
    }

    fn weighted_clusters(
        &self,
        kind: RouteKind,
        route_id: &ResourceId,
        rule: &HttpRule,
        pretty: bool,
    ) -> BTreeMap<String, u32> {
        rule.backends
            .iter()
            .filter(|backend| self.backend_permitted(kind, route_id, backend))
            .filter_map(|backend| {
                let (cluster, _) = self.backend_cluster(backend, pretty)?;
                let weight = if backend.weight == 0 {
                    CLUSTER_WEIGHT_ACCEPT_ALL
                } else {
                    backend.weight
                };
                Some((cluster, weight))
            })
            .collect()
    }

    /// Whether a route rule may send traffic to a backend service. Backends
    /// in the route's own namespace always may; a backend elsewhere needs a
    /// grant in its namespace naming the route kind. Unpermitted backends are
    /// pruned from the compiled document while the route itself stands.
    fn backend_permitted(&self, kind: RouteKind, route_id: &ResourceId, backend: &Backend) -> bool {
        backend.service.namespace == route_id.namespace
            || grant_permits(
                &self.grants,
                &backend.service.namespace,
                ("gateway.networking.k8s.io", kind.kind(), &route_id.namespace),
                ("", "Service", &backend.service.name),
            )
    }

    /// The cluster name and resolved port for a backend. Backends without an
    /// explicit port fall back to the service's single port.
    fn backend_cluster(&self, backend: &Backend, pretty: bool) -> Option<(String, u16)> {
        let port = backend.port.or_else(|| {
            let service = self.services.get(&backend.service)?;
            match service.ports.as_slice() {
                [port] => Some(port.port),
                _ => None,
            }
        })?;
        let name = hashed_name(&format!("{}:{port}", backend.service), pretty);
        Some((name, port))
    }

    fn cluster_config(&self, backend: &Backend, port: u16) -> ClusterConfig {
        let mut config = ClusterConfig::default();

        if let Some(service) = self.services.get(&backend.service) {
            let slices = self.slices.iter().filter_map(|(slice_id, slice)| {
                (slice_id.namespace == backend.service.namespace
                    && slice.service.as_deref() == Some(&backend.service.name))
                .then_some(slice)
            });
            let mut eps: BTreeMap<String, WeightedEndpoint> =
                endpoints::cluster_endpoints(service, slices, port);
            rebalance_endpoints(&mut eps);
            config.endpoints = eps;
        }

        let policies = self
            .policies
            .service_policies(&backend.service, &self.grants);
        config.retry_policy = policies.retry;
        config.connection_settings = policies.connection;
        config.lb_algorithm = policies.lb_algorithm;
        config.upstream_tls = policies.upstream_tls;
        config
    }
}

type RuleSortKey = (
    std::cmp::Reverse<(u8, usize)>,
    std::cmp::Reverse<usize>,
    std::cmp::Reverse<usize>,
    String,
);

fn make_rule(
    name: &str,
    route_match: &HttpRouteMatch,
    weighted_clusters: BTreeMap<String, u32>,
) -> (RuleSortKey, HttpRouteRule) {
    let (path, path_match_type, specificity) = match &route_match.path {
        Some(path) => {
            let ty = match path {
                PathMatch::Exact(_) => PathMatchType::Exact,
                PathMatch::Prefix(_) => PathMatchType::Prefix,
                PathMatch::Regex(_) => PathMatchType::Regex,
            };
            (path.value().to_string(), ty, path.specificity())
        }
        None => {
            let default = PathMatch::Prefix("/".to_string());
            ("/".to_string(), PathMatchType::Prefix, default.specificity())
        }
    };

    let headers: BTreeMap<String, String> = route_match
        .headers
        .iter()
        .map(|header| match header {
            HeaderMatch::Exact(name, value) | HeaderMatch::Regex(name, value) => {
                (name.clone(), value.clone())
            }
        })
        .collect();

    let (methods, allowed_any_method) = match &route_match.method {
        Some(method) => (vec![method.clone()], false),
        None => (Vec::new(), true),
    };

    let key = (
        std::cmp::Reverse(specificity),
        std::cmp::Reverse(headers.len()),
        std::cmp::Reverse(methods.len()),
        name.to_string(),
    );
    let rule = HttpRouteRule {
        name: name.to_string(),
        path,
        path_match_type,
        headers,
        methods,
        allowed_any_method,
        weighted_clusters,
        allowed_services: Vec::new(),
        allowed_any_service: true,
    };
    (key, rule)
}

/// The hostnames a route serves on a listener: the route's own hostnames, or
/// the listener hostname, or the any-host wildcard.
fn effective_hostnames<'r>(
    listener: &'r ListenerMeta,
    route: &'r CompileRoute,
) -> Vec<&'r str> {
    if !route.hostnames.is_empty() {
        route.hostnames.iter().map(String::as_str).collect()
    } else if let Some(hostname) = &listener.hostname {
        vec![hostname.as_str()]
    } else {
        vec!["*"]
    }
}

/// Deduplicates hostname entries; on collision the shorter rule-set name
/// wins, ties broken lexicographically.
fn insert_host(map: &mut BTreeMap<String, String>, host: String, ruleset: &str) {
    match map.get(&host) {
        Some(existing)
            if existing.len() < ruleset.len()
                || (existing.len() == ruleset.len() && existing.as_str() <= ruleset) => {}
        _ => {
            map.insert(host, ruleset.to_string());
        }
    }
}

fn kind_matches_protocol(kind: RouteKind, protocol: &str) -> bool {
    match protocol.to_ascii_uppercase().as_str() {
        "HTTP" | "HTTPS" => matches!(kind, RouteKind::Http | RouteKind::Grpc),
        "TLS" => matches!(kind, RouteKind::Tls | RouteKind::Tcp),
        "TCP" => matches!(kind, RouteKind::Tcp),
        "UDP" => matches!(kind, RouteKind::Udp),
        _ => false,
    }
}

/// Orders a port's outbound matches by CIDR specificity: the match with the
/// most specific destination range first, longer range lists winning ties.
/// The sort is stable so identical inputs compile identically.
pub(crate) fn sort_outbound_matches(matches: &mut [OutboundTrafficMatch]) {
    matches.sort_by(|a, b| {
        max_prefix_len(b)
            .cmp(&max_prefix_len(a))
            .then_with(|| b.destination_ip_ranges.len().cmp(&a.destination_ip_ranges.len()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn max_prefix_len(m: &OutboundTrafficMatch) -> u8 {
    m.destination_ip_ranges
        .iter()
        .filter_map(|cidr| cidr.parse::<IpNet>().ok())
        .map(|net| net.prefix_len())
        .max()
        .unwrap_or(0)
}
