use super::NamespacedTargetRef;

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "policy.meshgateway.io",
    version = "v1alpha1",
    kind = "BackendLBPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackendLBPolicySpec {
    pub target_refs: Vec<NamespacedTargetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<LoadBalancerAlgorithm>,
    /// Pick a fresh endpoint for every request instead of per connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_request: Option<bool>,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub enum LoadBalancerAlgorithm {
    RoundRobin,
    LeastRequest,
    Random,
    RingHash,
}
