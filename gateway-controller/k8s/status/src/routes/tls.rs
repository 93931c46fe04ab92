use super::{convert_backends, convert_parents, RouteInfo};
use meshgateway_controller_k8s_api::gateway;

pub(crate) fn route_info(route: &gateway::TLSRoute, namespace: &str) -> RouteInfo {
    let backends = convert_backends!(
        route
            .spec
            .rules
            .iter()
            .flat_map(|rule| rule.backend_refs.iter().flatten()),
        namespace
    );

    RouteInfo {
        generation: route.metadata.generation,
        parents: convert_parents!(route.spec.parent_refs, namespace),
        backends,
        hostnames: route.spec.hostnames.clone().unwrap_or_default(),
    }
}
