#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod document;
mod error;
pub mod fnv;
pub mod routes;

pub use self::error::Error;
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

pub const CONTROLLER_NAME: &str = "meshgateway.io/gateway-controller";

/// Weight assigned to an endpoint that should receive its cluster's full
/// share of traffic.
pub const CLUSTER_WEIGHT_ACCEPT_ALL: u32 = 100;

/// Weight assigned to a remote failover endpoint while local endpoints are
/// still serving. Must be non-zero so that emitted weights are always >= 1.
pub const CLUSTER_WEIGHT_FAILOVER: u32 = 1;
