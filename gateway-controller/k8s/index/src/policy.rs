//! Policy attachment resolution.
//!
//! Resolution is stateless: given the stored policy specs and reference
//! grants, the attachments for a backend service or a named route rule are a
//! pure function of the inputs, so re-running it always yields the same map.

use crate::resource_id::ResourceId;
use ahash::AHashMap as HashMap;
use meshgateway_controller_core::document::{
    CircuitBreaking, ConnectionSettings, HttpConnectionSettings, RetrySpec, UpstreamTlsSpec,
};
use meshgateway_controller_k8s_api::{self as k8s, extension, gateway, policy};

#[derive(Debug, Default)]
pub(crate) struct PolicyStore {
    pub retries: HashMap<ResourceId, policy::RetryPolicySpec>,
    pub health_checks: HashMap<ResourceId, policy::HealthCheckPolicySpec>,
    pub backend_lbs: HashMap<ResourceId, policy::BackendLBPolicySpec>,
    pub backend_tls: HashMap<ResourceId, policy::BackendTLSPolicySpec>,
    pub rule_filters: HashMap<ResourceId, policy::RouteRuleFilterPolicySpec>,
}

/// The policies attached to one backend service.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ServicePolicies {
    pub retry: Option<RetrySpec>,
    pub connection: Option<ConnectionSettings>,
    pub lb_algorithm: Option<String>,
    pub upstream_tls: Option<UpstreamTlsSpec>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct GrantMeta {
    /// (group, kind, namespace) triples permitted to reference.
    pub from: Vec<(String, String, String)>,
    /// (group, kind, name) triples that may be referenced.
    pub to: Vec<(String, String, Option<String>)>,
}

// === impl GrantMeta ===

impl GrantMeta {
    pub(crate) fn from_grant(grant: &gateway::ReferenceGrant) -> Self {
        Self {
            from: grant
                .spec
                .from
                .iter()
                .map(|f| (f.group.clone(), f.kind.clone(), f.namespace.clone()))
                .collect(),
            to: grant
                .spec
                .to
                .iter()
                .map(|t| (t.group.clone(), t.kind.clone(), t.name.clone()))
                .collect(),
        }
    }
}

/// Checks whether a grant in `target_ns` permits `from` to reference `to`.
pub(crate) fn grant_permits(
    grants: &HashMap<ResourceId, GrantMeta>,
    target_ns: &str,
    from: (&str, &str, &str),
    to: (&str, &str, &str),
) -> bool {
    grants
        .iter()
        .filter(|(id, _)| id.namespace == target_ns)
        .any(|(_, grant)| {
            let from_ok = grant.from.iter().any(|(g, k, ns)| {
                g.eq_ignore_ascii_case(from.0) && k.eq_ignore_ascii_case(from.1) && ns == from.2
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

// === impl PolicyStore ===

impl PolicyStore {
    /// Resolves every policy attached to the given backend service.
    ///
    /// Later policies of the same kind never override earlier ones; with
    /// multiple candidates the oldest wins by (namespace, name) order, which
    /// is deterministic without tracking creation timestamps.
    pub(crate) fn service_policies(
        &self,
        service: &ResourceId,
        grants: &HashMap<ResourceId, GrantMeta>,
    ) -> ServicePolicies {
        let mut out = ServicePolicies::default();

        for (id, spec) in sorted(&self.retries) {
            if out.retry.is_none()
                && targets_service(&spec.target_refs, id, service, "RetryPolicy", grants)
            {
                out.retry = Some(RetrySpec {
                    retry_on: spec.retry_on.clone(),
                    num_retries: spec.num_retries,
                    per_try_timeout: spec.per_try_timeout.to_string(),
                    retry_backoff_base_interval: spec.retry_backoff_base_interval.to_string(),
                });
            }
        }

        for (id, spec) in sorted(&self.health_checks) {
            if out.connection.is_none()
                && targets_service(&spec.target_refs, id, service, "HealthCheckPolicy", grants)
            {
                out.connection = Some(ConnectionSettings {
                    tcp: None,
                    http: Some(HttpConnectionSettings {
                        max_requests: None,
                        max_pending_requests: None,
                        circuit_breaking: Some(CircuitBreaking {
                            stat_time_window: spec.interval.to_string(),
                            min_request_amount: spec.max_fails,
                            degraded_time_window: spec.interval.to_string(),
                            slow_time_threshold: Some(spec.timeout.to_string()),
                            slow_amount_threshold: None,
                            slow_ratio_threshold: None,
                            error_amount_threshold: Some(spec.max_fails),
                            error_ratio_threshold: None,
                            degraded_status_code: 503,
                            degraded_response_content: None,
                        }),
                    }),
                });
            }
        }

        for (id, spec) in sorted(&self.backend_lbs) {
            if out.lb_algorithm.is_none()
                && targets_service(&spec.target_refs, id, service, "BackendLBPolicy", grants)
            {
                out.lb_algorithm = spec.algorithm.map(|a| format!("{a:?}"));
            }
        }

        for (id, spec) in sorted(&self.backend_tls) {
            if out.upstream_tls.is_none()
                && targets_service(&spec.target_refs, id, service, "BackendTLSPolicy", grants)
            {
                out.upstream_tls = Some(UpstreamTlsSpec {
                    hostname: spec.validation.hostname.clone(),
                    mtls: spec.mtls.unwrap_or(false),
                });
            }
        }

        out
    }

    /// Resolves the filters attached to a named rule of a route, in policy
    /// order. The rule must be named for any filter policy to target it.
    pub(crate) fn rule_filters(
        &self,
        route_kind: &str,
        route: &ResourceId,
        rule: &str,
        grants: &HashMap<ResourceId, GrantMeta>,
    ) -> Vec<ResourceId> {
        let mut filters = Vec::new();
        for (id, spec) in sorted(&self.rule_filters) {
            let matches = spec.target_refs.iter().any(|target| {
                let target_ns = target.namespace.as_deref().unwrap_or(&id.namespace);
                target.kind.eq_ignore_ascii_case(route_kind)
                    && target_ns == route.namespace
                    && target.name.eq_ignore_ascii_case(&route.name)
                    && target.rule == rule
            });
            if !matches {
                continue;
            }
            if route.namespace != id.namespace
                && !grant_permits(
                    grants,
                    &route.namespace,
                    (
                        policy::POLICY_API_GROUP,
                        "RouteRuleFilterPolicy",
                        &id.namespace,
                    ),
                    ("gateway.networking.k8s.io", route_kind, &route.name),
                )
            {
                continue;
            }
            for filter_ref in &spec.filter_refs {
                filters.push(ResourceId::new(
                    filter_ref
                        .namespace
                        .clone()
                        .unwrap_or_else(|| id.namespace.clone()),
                    filter_ref.name.clone(),
                ));
            }
        }
        filters
    }
}

fn sorted<'s, T>(map: &'s HashMap<ResourceId, T>) -> Vec<(&'s ResourceId, &'s T)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by_key(|(id, _)| *id);
    entries
}

/// Checks whether any target ref names the service, honoring the
/// cross-namespace grant requirement for the given policy kind.
fn targets_service(
    target_refs: &[policy::NamespacedTargetRef],
    policy_id: &ResourceId,
    service: &ResourceId,
    policy_kind: &str,
    grants: &HashMap<ResourceId, GrantMeta>,
) -> bool {
    target_refs.iter().any(|target| {
        if !target.targets_kind::<k8s::Service>() {
            return false;
        }
        let target_ns = target.namespace.as_deref().unwrap_or(&policy_id.namespace);
        if target_ns != service.namespace || !target.name.eq_ignore_ascii_case(&service.name) {
            return false;
        }
        service.namespace == policy_id.namespace
            || grant_permits(
                grants,
                &service.namespace,
                (policy::POLICY_API_GROUP, policy_kind, &policy_id.namespace),
                ("", "Service", &service.name),
            )
    })
}

/// Index projection of the extension filter kinds.
#[derive(Debug, Default)]
pub(crate) struct FilterStore {
    pub filters: HashMap<ResourceId, extension::FilterSpec>,
    pub definitions: HashMap<ResourceId, extension::FilterDefinitionSpec>,
    pub configs: HashMap<ResourceId, extension::FilterConfigSpec>,
}

// === impl FilterStore ===

impl FilterStore {
    /// Renders a plugin identifier for a filter: `<type>:<ns>/<name>`. Filters
    /// whose definition cannot be resolved are skipped.
    pub(crate) fn plugin(&self, id: &ResourceId) -> Option<String> {
        let filter = self.filters.get(id)?;
        if filter.script.is_none() {
            let definition = filter.definition_ref.as_ref()?;
            let def_id = ResourceId::new(id.namespace.clone(), definition.name.clone());
            self.definitions.get(&def_id)?;
        }
        if let Some(config_ref) = &filter.config_ref {
            let config_id = ResourceId::new(id.namespace.clone(), config_ref.name.clone());
            self.configs.get(&config_id)?;
        }
        Some(format!("{}:{id}", filter.filter_type))
    }
}
