//! The configuration document published to each data-plane proxy.
//!
//! The document is serialized to JSON and written to the proxy's codebase on
//! the repo server. Maps are `BTreeMap`s so that serialization is byte-stable
//! across compiles of identical inputs; the publish fingerprint depends on
//! it.

use crate::{CLUSTER_WEIGHT_ACCEPT_ALL, CLUSTER_WEIGHT_FAILOVER};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Decimal rendering of the document fingerprint.
    pub version: String,
    /// RFC3339 timestamp of the compile.
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    pub spec: ProxySpec,
    pub inbound: InboundConfig,
    pub outbound: OutboundConfig,
    pub forward: ForwardConfig,
    pub allowed_endpoints: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub dns_resolve_db: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub chains: Vec<PluginChain>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub expiration: String,
    pub common_name: String,
    pub cert_chain: String,
    pub private_key: String,
    pub issuing_ca: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    pub sidecar_log_level: String,
    pub sidecar_timeout: u32,
    pub feature_flags: FeatureFlags,
    pub traffic: TrafficSpec,
    #[serde(rename = "localDNSProxy", skip_serializing_if = "Option::is_none")]
    pub local_dns_proxy: Option<LocalDnsProxy>,
    pub observability: Observability,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub cluster_set: BTreeMap<String, String>,
    pub probes: Probes,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub enable_sidecar_active_health_checks: bool,
    pub enable_auto_default_route: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrafficSpec {
    #[serde(rename = "enableEgress")]
    pub enable_egress: bool,
    #[serde(rename = "HTTP1PerRequestLoadBalancing")]
    pub http1_per_request_load_balancing: bool,
    #[serde(rename = "HTTP2PerRequestLoadBalancing")]
    pub http2_per_request_load_balancing: bool,
    #[serde(rename = "enablePermissiveTrafficPolicyMode")]
    pub enable_permissive_traffic_policy_mode: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDnsProxy {
    #[serde(rename = "upstreamDNSServers")]
    pub upstream_dns_servers: UpstreamDnsServers,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamDnsServers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_logging: Option<RemoteLoggingSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingSpec {
    pub endpoint: String,
    pub sample_fraction: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLoggingSpec {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Probes {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub startup: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub liveness: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub readiness: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundConfig {
    pub traffic_matches: BTreeMap<u16, InboundTrafficMatch>,
    pub clusters_configs: BTreeMap<String, WeightedEndpoints>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundConfig {
    pub traffic_matches: BTreeMap<u16, Vec<OutboundTrafficMatch>>,
    pub clusters_configs: BTreeMap<String, ClusterConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardConfig {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub forward_matches: BTreeMap<String, BTreeMap<String, u32>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub egress_gateways: BTreeMap<String, ClusterConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundTrafficMatch {
    pub port: u16,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<TcpRateLimit>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub source_ip_ranges: BTreeMap<String, SourceSecuritySpec>,
    /// Hostname (optionally `host:port`) to HTTP rule-set name. Deduplicated;
    /// on collision the shorter rule name wins.
    #[serde(
        rename = "httpHostPort2Service",
        skip_serializing_if = "BTreeMap::is_empty",
        default
    )]
    pub http_host_port_to_service: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub http_service_route_rules: BTreeMap<String, Vec<HttpRouteRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_service_route_rules: Option<TcpRouteRules>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTrafficMatch {
    /// The match name: the destination port plus a named suffix.
    pub name: String,
    pub port: u16,
    pub protocol: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub destination_ip_ranges: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub http_host_port_to_service: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub http_service_route_rules: BTreeMap<String, Vec<HttpRouteRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_service_route_rules: Option<TcpRouteRules>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRateLimit {
    pub connections: u32,
    pub burst: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_time_window: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSecuritySpec {
    pub mtls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_client_cert_validation: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouteRules {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub targets: Vec<String>,
    pub allowed_egress_traffic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_forward_gateway: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    pub name: String,
    pub path: String,
    pub path_match_type: PathMatchType,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub methods: Vec<String>,
    pub allowed_any_method: bool,
    pub weighted_clusters: BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub allowed_services: Vec<String>,
    pub allowed_any_service: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PathMatchType {
    Exact,
    #[default]
    Prefix,
    Regex,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WeightedEndpoints {
    /// Keyed by `address:port`.
    pub endpoints: BTreeMap<String, WeightedEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Keyed by `address:port`.
    pub endpoints: BTreeMap<String, WeightedEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_settings: Option<ConnectionSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetrySpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_tls: Option<UpstreamTlsSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTlsSpec {
    /// The server name expected in the backend's certificate.
    pub hostname: String,
    pub mtls: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedEndpoint {
    pub weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Empty for endpoints in the local cluster.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub cluster_key: String,
    pub lb_type: LoadBalancerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_gateway: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalancerMode {
    #[default]
    ActiveActive,
    FailOver,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpConnectionSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpConnectionSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpConnectionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnectionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaking: Option<CircuitBreaking>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaking {
    pub stat_time_window: String,
    pub min_request_amount: u32,
    pub degraded_time_window: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_time_threshold: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_amount_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_ratio_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_amount_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_ratio_threshold: Option<f64>,
    pub degraded_status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_response_content: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    pub retry_on: String,
    pub num_retries: u32,
    pub per_try_timeout: String,
    pub retry_backoff_base_interval: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginChain {
    pub name: String,
    pub plugins: Vec<String>,
}

/// Normalizes endpoint weights in place:
///
/// * local endpoints (empty cluster key) with weight 0 take the accept-all
///   weight;
/// * remote failover endpoints take the failover weight while local endpoints
///   exist, and the accept-all weight otherwise;
/// * remote active-active endpoints with weight 0 take the accept-all weight.
///
/// Every emitted weight is therefore >= 1.
pub fn rebalance_endpoints(endpoints: &mut BTreeMap<String, WeightedEndpoint>) {
    let has_local = endpoints.values().any(|ep| ep.cluster_key.is_empty());

    for ep in endpoints.values_mut() {
        if ep.cluster_key.is_empty() {
            if ep.weight == 0 {
                ep.weight = CLUSTER_WEIGHT_ACCEPT_ALL;
            }
        } else {
            match ep.lb_type {
                LoadBalancerMode::FailOver => {
                    ep.weight = if has_local {
                        CLUSTER_WEIGHT_FAILOVER
                    } else {
                        CLUSTER_WEIGHT_ACCEPT_ALL
                    };
                }
                LoadBalancerMode::ActiveActive => {
                    if ep.weight == 0 {
                        ep.weight = CLUSTER_WEIGHT_ACCEPT_ALL;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CLUSTER_WEIGHT_ACCEPT_ALL, CLUSTER_WEIGHT_FAILOVER};

    fn endpoint(cluster_key: &str, lb: LoadBalancerMode, weight: u32) -> WeightedEndpoint {
        WeightedEndpoint {
            weight,
            cluster_key: cluster_key.to_string(),
            lb_type: lb,
            ..Default::default()
        }
    }

    #[test]
    fn failover_weight_depends_on_local_presence() {
        let mut endpoints = BTreeMap::from([
            (
                "10.0.0.1:8080".to_string(),
                endpoint("", LoadBalancerMode::ActiveActive, 0),
            ),
            (
                "10.1.0.1:8080".to_string(),
                endpoint("cluster-b", LoadBalancerMode::FailOver, 0),
            ),
        ]);
        rebalance_endpoints(&mut endpoints);
        assert_eq!(
            endpoints["10.0.0.1:8080"].weight,
            CLUSTER_WEIGHT_ACCEPT_ALL
        );
        assert_eq!(endpoints["10.1.0.1:8080"].weight, CLUSTER_WEIGHT_FAILOVER);

        // Without a local endpoint, the failover endpoint accepts all traffic.
        endpoints.remove("10.0.0.1:8080");
        rebalance_endpoints(&mut endpoints);
        assert_eq!(
            endpoints["10.1.0.1:8080"].weight,
            CLUSTER_WEIGHT_ACCEPT_ALL
        );
    }

    #[test]
    fn active_active_zero_weight_normalized() {
        let mut endpoints = BTreeMap::from([(
            "10.1.0.1:8080".to_string(),
            endpoint("cluster-b", LoadBalancerMode::ActiveActive, 0),
        )]);
        rebalance_endpoints(&mut endpoints);
        assert_eq!(
            endpoints["10.1.0.1:8080"].weight,
            CLUSTER_WEIGHT_ACCEPT_ALL
        );
    }

    #[test]
    fn explicit_weights_are_preserved() {
        let mut endpoints = BTreeMap::from([
            (
                "10.0.0.1:8080".to_string(),
                endpoint("", LoadBalancerMode::ActiveActive, 30),
            ),
            (
                "10.1.0.1:8080".to_string(),
                endpoint("cluster-b", LoadBalancerMode::ActiveActive, 70),
            ),
        ]);
        rebalance_endpoints(&mut endpoints);
        assert_eq!(endpoints["10.0.0.1:8080"].weight, 30);
        assert_eq!(endpoints["10.1.0.1:8080"].weight, 70);
    }

    #[test]
    fn all_weights_are_nonzero_after_rebalance() {
        let mut endpoints = BTreeMap::new();
        for (i, (cluster, lb)) in [
            ("", LoadBalancerMode::ActiveActive),
            ("b", LoadBalancerMode::FailOver),
            ("c", LoadBalancerMode::ActiveActive),
        ]
        .iter()
        .enumerate()
        {
            endpoints.insert(
                format!("10.0.0.{i}:80"),
                endpoint(cluster, *lb, 0),
            );
        }
        rebalance_endpoints(&mut endpoints);
        assert!(endpoints.values().all(|ep| ep.weight >= 1));
    }

    #[test]
    fn serialization_is_stable() {
        let mut doc = ProxyConfig::default();
        doc.version = "42".to_string();
        doc.inbound.traffic_matches.insert(
            8080,
            InboundTrafficMatch {
                port: 8080,
                protocol: "http".to_string(),
                ..Default::default()
            },
        );
        let a = serde_json::to_vec(&doc).expect("document serializes");
        let b = serde_json::to_vec(&doc).expect("document serializes");
        assert_eq!(a, b);
    }

    #[test]
    fn document_top_level_keys() {
        let doc = ProxyConfig::default();
        let value = serde_json::to_value(&doc).expect("document serializes");
        for key in ["version", "ts", "spec", "inbound", "outbound", "forward"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        // Empty optional sections are elided.
        assert!(value.get("certificate").is_none());
        assert!(value.get("dnsResolveDB").is_none() || value.get("dnsResolveDB").is_some());
    }
}
