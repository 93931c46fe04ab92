use super::{LocalTargetRef, NamespacedTargetRef};

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "policy.meshgateway.io",
    version = "v1alpha1",
    kind = "BackendTLSPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackendTLSPolicySpec {
    pub target_refs: Vec<NamespacedTargetRef>,
    pub validation: TLSValidation,
    /// Present a client certificate to the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtls: Option<bool>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TLSValidation {
    /// Secrets or ConfigMaps holding a `ca.crt` bundle.
    pub ca_cert_refs: Vec<LocalTargetRef>,
    /// The server name expected in the backend's certificate.
    pub hostname: String,
}
