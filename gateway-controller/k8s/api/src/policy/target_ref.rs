/// Targets a resource in the policy's own namespace.
#[derive(
    Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct LocalTargetRef {
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
}

/// Targets a resource in any namespace. Cross-namespace targets are only
/// honored when a ReferenceGrant in the target namespace permits the policy
/// kind.
#[derive(
    Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct NamespacedTargetRef {
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

/// Checks whether a `group`/`kind` pair names the resource type `T`.
///
/// An absent or empty group is treated as the core group.
pub fn targets_kind<T>(group: Option<&str>, kind: &str) -> bool
where
    T: kube::Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();

    let mut t_group = &*T::group(&dt);
    if t_group.is_empty() {
        t_group = "core";
    }

    group
        .map(|g| if g.is_empty() { "core" } else { g })
        .unwrap_or("core")
        .eq_ignore_ascii_case(t_group)
        && kind.eq_ignore_ascii_case(&T::kind(&dt))
}

// === impl LocalTargetRef ===

impl LocalTargetRef {
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(self.group.as_deref(), &self.kind)
    }

    /// Checks whether the target references the given namespaced resource.
    pub fn targets<T>(&self, resource: &T) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        self.targets_kind::<T>()
            && resource
                .meta()
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(&self.name))
    }
}

// === impl NamespacedTargetRef ===

impl NamespacedTargetRef {
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(self.group.as_deref(), &self.kind)
    }

    /// Checks whether the target references the given namespaced resource,
    /// defaulting the target namespace to `local_ns`.
    pub fn targets<T>(&self, resource: &T, local_ns: &str) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        if !self.targets_kind::<T>() {
            return false;
        }

        let target_ns = self.namespace.as_deref().unwrap_or(local_ns);
        match resource.meta().namespace.as_deref() {
            Some(rns) if rns.eq_ignore_ascii_case(target_ns) => {}
            _ => return false,
        }

        resource
            .meta()
            .name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use kube::api::ObjectMeta;

    fn service(ns: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn local_ref_targets_service_by_name() {
        let t = LocalTargetRef {
            group: None,
            kind: "Service".to_string(),
            name: "web".to_string(),
        };
        assert!(t.targets_kind::<Service>());
        assert!(t.targets(&service("ns1", "web")));
        assert!(!t.targets(&service("ns1", "other")));
    }

    #[test]
    fn empty_and_core_groups_are_equivalent() {
        for group in [None, Some("".to_string()), Some("core".to_string())] {
            let t = LocalTargetRef {
                group,
                kind: "Service".to_string(),
                name: "web".to_string(),
            };
            assert!(t.targets_kind::<Service>(), "{t:?}");
        }
    }

    #[test]
    fn namespaced_ref_defaults_to_local_namespace() {
        let t = NamespacedTargetRef {
            group: None,
            kind: "Service".to_string(),
            name: "web".to_string(),
            namespace: None,
        };
        assert!(t.targets(&service("ns1", "web"), "ns1"));
        assert!(!t.targets(&service("ns2", "web"), "ns1"));

        let t = NamespacedTargetRef {
            namespace: Some("ns2".to_string()),
            ..t
        };
        assert!(t.targets(&service("ns2", "web"), "ns1"));
    }
}
