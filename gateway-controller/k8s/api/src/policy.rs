pub mod backend_lb;
pub mod backend_tls;
pub mod health_check;
pub mod retry;
pub mod route_rule_filter;
pub mod target_ref;

pub use self::{
    backend_lb::{BackendLBPolicy, BackendLBPolicySpec, LoadBalancerAlgorithm},
    backend_tls::{BackendTLSPolicy, BackendTLSPolicySpec, TLSValidation},
    health_check::{HealthCheckPolicy, HealthCheckPolicySpec},
    retry::{RetryPolicy, RetryPolicySpec},
    route_rule_filter::{RouteRuleFilterPolicy, RouteRuleFilterPolicySpec, RouteRuleTargetRef},
    target_ref::{targets_kind, LocalTargetRef, NamespacedTargetRef},
};

/// The API group of all policy attachment kinds.
pub const POLICY_API_GROUP: &str = "policy.meshgateway.io";

pub const POLICY_API_VERSION: &str = "v1alpha1";
