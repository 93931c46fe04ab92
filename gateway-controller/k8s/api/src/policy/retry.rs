use super::NamespacedTargetRef;
use crate::duration::K8sDuration;

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "policy.meshgateway.io",
    version = "v1alpha1",
    kind = "RetryPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicySpec {
    pub target_refs: Vec<NamespacedTargetRef>,
    /// Comma-separated retriable response classes, e.g. `5xx` or
    /// `connect-failure,503`.
    pub retry_on: String,
    pub num_retries: u32,
    pub per_try_timeout: K8sDuration,
    pub retry_backoff_base_interval: K8sDuration,
}
