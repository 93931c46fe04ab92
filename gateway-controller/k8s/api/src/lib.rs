#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod extension;
pub mod policy;

/// Gateway API resource types, with the experimental route kinds folded into
/// the same namespace as the standard ones.
pub mod gateway {
    pub use gateway_api::apis::experimental::{tcproutes::*, tlsroutes::*, udproutes::*};
    pub use gateway_api::{
        gatewayclasses::*, gateways::*, grpcroutes::*, httproutes::*, referencegrants::*,
    };
}

pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, DeploymentSpec, DeploymentStatus},
        coordination::v1::Lease,
        core::v1::{
            ConfigMap, Container, ContainerPort, Namespace, Node, NodeAddress, NodeStatus, Pod,
            PodSpec, PodTemplateSpec, Secret, Service, ServicePort, ServiceSpec, ServiceStatus,
        },
        discovery::v1::{Endpoint, EndpointPort, EndpointSlice},
    },
    apimachinery::pkg::{
        apis::meta::v1::{Condition, LabelSelector, OwnerReference, Time},
        util::intstr::IntOrString,
    },
    NamespaceResourceScope,
};

pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    error::ErrorResponse,
    runtime::watcher,
    Client, Error,
};

pub use self::duration::K8sDuration;

/// The label applied to objects the controller synthesizes for a gateway.
pub const GATEWAY_NAME_LABEL: &str = "meshgateway.io/gateway";

/// The label naming the namespace of the owning gateway.
pub const GATEWAY_NS_LABEL: &str = "meshgateway.io/gateway-namespace";

/// Labels an endpoint slice's service with the originating cluster, for
/// multi-cluster imports. Absent for local endpoints.
pub const CLUSTER_KEY_LABEL: &str = "meshgateway.io/cluster-key";

/// Selects the load-balancing mode for imported multi-cluster endpoints.
/// Recognized values are `ActiveActive` (the default) and `FailOver`.
pub const LB_MODE_LABEL: &str = "meshgateway.io/lb-mode";
