use meshgateway_controller_core::routes::GroupKindName;
use std::fmt;

/// Identifies a namespaced resource by namespace and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// Identifies a resource by namespace, group, kind, and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct NamespaceGroupKindName {
    pub namespace: String,
    pub gkn: GroupKindName,
}

// === impl ResourceId ===

impl ResourceId {
    pub fn new(namespace: String, name: String) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl NamespaceGroupKindName ===

impl fmt::Display for NamespaceGroupKindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}/{}/{}",
            self.gkn.kind, self.gkn.group, self.namespace, self.gkn.name
        )
    }
}
