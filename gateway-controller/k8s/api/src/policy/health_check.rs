use super::NamespacedTargetRef;
use crate::duration::K8sDuration;

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "policy.meshgateway.io",
    version = "v1alpha1",
    kind = "HealthCheckPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPolicySpec {
    pub target_refs: Vec<NamespacedTargetRef>,
    pub interval: K8sDuration,
    pub timeout: K8sDuration,
    /// Consecutive failures before an endpoint is ejected.
    pub max_fails: u32,
    /// Probe an HTTP path instead of opening a bare TCP connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}
