//! Extension filter kinds referenced from route rule `extensionRef` filters.
//!
//! The controller treats filter scripts and configuration as opaque payloads;
//! they are carried into the published document's plugin chains unmodified.

use crate::policy::LocalTargetRef;

/// The API group of the extension filter kinds.
pub const EXTENSION_API_GROUP: &str = "extension.meshgateway.io";

pub const EXTENSION_API_VERSION: &str = "v1alpha1";

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "extension.meshgateway.io",
    version = "v1alpha1",
    kind = "Filter",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// The filter type, matched against a FilterDefinition of the same type
    /// when `definition_ref` is absent.
    #[serde(rename = "type")]
    pub filter_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_ref: Option<LocalTargetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<LocalTargetRef>,
    /// Inline script, used when no definition is referenced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "extension.meshgateway.io",
    version = "v1alpha1",
    kind = "FilterDefinition",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinitionSpec {
    #[serde(rename = "type")]
    pub filter_type: String,
    pub script: String,
}

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "extension.meshgateway.io",
    version = "v1alpha1",
    kind = "FilterConfig",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfigSpec {
    /// Opaque configuration payload, typically YAML or JSON.
    pub config: String,
}
