//! Mesh-wide configuration fixed at startup.

use meshgateway_controller_core::document::{
    FeatureFlags, LocalDnsProxy, Observability, Probes, ProxySpec, RemoteLoggingSpec, TracingSpec,
    TrafficSpec, UpstreamDnsServers,
};

/// Process-wide settings for the compiler index.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    pub controller_name: String,
    /// Embed semantic names in the document instead of their hashes.
    pub pretty_config: bool,
    pub mesh: MeshConfig,
}

/// The mesh configuration copied into every compiled document's spec block.
#[derive(Clone, Debug)]
pub struct MeshConfig {
    pub sidecar_log_level: String,
    /// Connection idle timeout in seconds.
    pub sidecar_timeout: u32,
    pub enable_egress: bool,
    pub enable_permissive_traffic_policy_mode: bool,
    pub http1_per_request_load_balancing: bool,
    pub http2_per_request_load_balancing: bool,
    pub enable_sidecar_active_health_checks: bool,
    pub enable_auto_default_route: bool,
    pub local_dns_proxy_primary: Option<String>,
    pub local_dns_proxy_secondary: Option<String>,
    pub tracing_endpoint: Option<String>,
    pub tracing_sample_fraction: f64,
    pub remote_logging_endpoint: Option<String>,
    /// Issue per-proxy certificates and require mTLS between proxies.
    pub mtls: bool,
    pub certificate_validity_secs: u64,
}

// === impl MeshConfig ===

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            sidecar_log_level: "error".to_string(),
            sidecar_timeout: 60,
            enable_egress: false,
            enable_permissive_traffic_policy_mode: false,
            http1_per_request_load_balancing: false,
            http2_per_request_load_balancing: false,
            enable_sidecar_active_health_checks: false,
            enable_auto_default_route: true,
            local_dns_proxy_primary: None,
            local_dns_proxy_secondary: None,
            tracing_endpoint: None,
            tracing_sample_fraction: 0.0,
            remote_logging_endpoint: None,
            mtls: false,
            certificate_validity_secs: 24 * 60 * 60,
        }
    }
}

impl MeshConfig {
    /// Renders the document spec block.
    pub(crate) fn proxy_spec(&self) -> ProxySpec {
        let local_dns_proxy = if self.local_dns_proxy_primary.is_some()
            || self.local_dns_proxy_secondary.is_some()
        {
            Some(LocalDnsProxy {
                upstream_dns_servers: UpstreamDnsServers {
                    primary: self.local_dns_proxy_primary.clone(),
                    secondary: self.local_dns_proxy_secondary.clone(),
                },
            })
        } else {
            None
        };

        ProxySpec {
            sidecar_log_level: self.sidecar_log_level.clone(),
            sidecar_timeout: self.sidecar_timeout,
            feature_flags: FeatureFlags {
                enable_sidecar_active_health_checks: self.enable_sidecar_active_health_checks,
                enable_auto_default_route: self.enable_auto_default_route,
            },
            traffic: TrafficSpec {
                enable_egress: self.enable_egress,
                http1_per_request_load_balancing: self.http1_per_request_load_balancing,
                http2_per_request_load_balancing: self.http2_per_request_load_balancing,
                enable_permissive_traffic_policy_mode: self
                    .enable_permissive_traffic_policy_mode,
            },
            local_dns_proxy,
            observability: Observability {
                tracing: self.tracing_endpoint.as_ref().map(|endpoint| TracingSpec {
                    endpoint: endpoint.clone(),
                    sample_fraction: self.tracing_sample_fraction,
                }),
                remote_logging: self.remote_logging_endpoint.as_ref().map(|endpoint| {
                    RemoteLoggingSpec {
                        endpoint: endpoint.clone(),
                        authorization: None,
                    }
                }),
            },
            cluster_set: Default::default(),
            probes: Probes::default(),
        }
    }
}
