//! Service and endpoint-slice projections used to build cluster endpoints.

use meshgateway_controller_core::document::{LoadBalancerMode, WeightedEndpoint};
use meshgateway_controller_k8s_api::{self as k8s, ResourceExt};
use std::collections::BTreeMap;

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ServiceMeta {
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SliceMeta {
    /// The owning service's name, from the slice's service-name label.
    pub service: Option<String>,
    /// Originating cluster for multi-cluster imports; empty for local
    /// endpoints.
    pub cluster_key: String,
    pub lb_mode: LoadBalancerMode,
    pub ports: Vec<SlicePort>,
    pub endpoints: Vec<SliceEndpoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SlicePort {
    pub name: Option<String>,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SliceEndpoint {
    pub addresses: Vec<String>,
    pub zone: Option<String>,
    pub ready: bool,
}

// === impl ServiceMeta ===

impl ServiceMeta {
    pub(crate) fn from_service(service: &k8s::Service) -> Self {
        let spec = service.spec.clone().unwrap_or_default();
        let cluster_ip = spec.cluster_ip.filter(|ip| !ip.is_empty() && ip != "None");
        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| ServicePort {
                name: p.name,
                port: p.port as u16,
            })
            .collect();
        Self { cluster_ip, ports }
    }

    /// The name of the service port with the given number.
    fn port_name(&self, port: u16) -> Option<&Option<String>> {
        self.ports
            .iter()
            .find(|p| p.port == port)
            .map(|p| &p.name)
    }
}

// === impl SliceMeta ===

impl SliceMeta {
    pub(crate) fn from_slice(slice: &k8s::EndpointSlice) -> Self {
        let labels = slice.labels();
        let service = labels.get(SERVICE_NAME_LABEL).cloned();
        let cluster_key = labels
            .get(k8s::CLUSTER_KEY_LABEL)
            .cloned()
            .unwrap_or_default();
        let lb_mode = match labels.get(k8s::LB_MODE_LABEL).map(String::as_str) {
            Some("FailOver") => LoadBalancerMode::FailOver,
            _ => LoadBalancerMode::ActiveActive,
        };

        let ports = slice
            .ports
            .iter()
            .flatten()
            .filter_map(|p| {
                p.port.map(|port| SlicePort {
                    name: p.name.clone(),
                    port: port as u16,
                })
            })
            .collect();

        let endpoints = slice
            .endpoints
            .iter()
            .map(|ep| SliceEndpoint {
                addresses: ep.addresses.clone(),
                zone: ep.zone.clone(),
                ready: ep
                    .conditions
                    .as_ref()
                    .and_then(|c| c.ready)
                    .unwrap_or(true),
            })
            .collect();

        Self {
            service,
            cluster_key,
            lb_mode,
            ports,
            endpoints,
        }
    }

    /// The target port exposed by this slice for a named service port.
    fn target_port(&self, port_name: &Option<String>) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| &p.name == port_name)
            .or_else(|| if self.ports.len() == 1 { self.ports.first() } else { None })
            .map(|p| p.port)
    }
}

/// Builds the weighted endpoint map for one service port from all of the
/// service's endpoint slices. Weights start at zero; rebalancing normalizes
/// them on emission.
pub(crate) fn cluster_endpoints<'a>(
    service: &ServiceMeta,
    slices: impl Iterator<Item = &'a SliceMeta>,
    port: u16,
) -> BTreeMap<String, WeightedEndpoint> {
    let Some(port_name) = service.port_name(port) else {
        return BTreeMap::new();
    };

    let mut endpoints = BTreeMap::new();
    for slice in slices {
        let Some(target) = slice.target_port(port_name) else {
            continue;
        };
        for ep in slice.endpoints.iter().filter(|ep| ep.ready) {
            for addr in &ep.addresses {
                endpoints.insert(
                    format!("{addr}:{target}"),
                    WeightedEndpoint {
                        weight: 0,
                        zone: ep.zone.clone(),
                        cluster_key: slice.cluster_key.clone(),
                        lb_type: slice.lb_mode,
                        context_path: None,
                        via_gateway: None,
                    },
                );
            }
        }
    }
    endpoints
}
