//! Compiles per-proxy configuration documents from watched cluster state.
//!
//! The [`Index`] observes gateways, routes, services, endpoint slices, policy
//! attachments, and extension filters, and recompiles a [`ProxyConfig`] for
//! every registered proxy whenever any input changes. Compiled documents are
//! distributed through per-proxy watch channels; the publisher picks them up
//! from the same channels.
//!
//! [`ProxyConfig`]: meshgateway_controller_core::document::ProxyConfig

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cert;
mod cluster_info;
mod compile;
mod endpoints;
mod index;
mod policy;
mod registry;
mod resource_id;
mod routes;

#[cfg(test)]
mod tests;

pub use self::{
    cert::{CertificateIssuer, IssuedCertificate},
    cluster_info::{ClusterInfo, MeshConfig},
    compile::CompileError,
    index::{Index, IndexMetrics, SharedIndex},
    registry::ProxyId,
    resource_id::ResourceId,
};
