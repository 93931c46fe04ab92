use super::{targets_kind, NamespacedTargetRef};

#[derive(
    Clone, Debug, kube::CustomResource, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[kube(
    group = "policy.meshgateway.io",
    version = "v1alpha1",
    kind = "RouteRuleFilterPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouteRuleFilterPolicySpec {
    pub target_refs: Vec<RouteRuleTargetRef>,
    /// Filters applied to the targeted rules, in order.
    pub filter_refs: Vec<NamespacedTargetRef>,
}

/// Targets a single named rule of a route.
#[derive(
    Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct RouteRuleTargetRef {
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The `name` of the targeted rule within the route's spec.
    pub rule: String,
}

impl RouteRuleTargetRef {
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(self.group.as_deref(), &self.kind)
    }
}
