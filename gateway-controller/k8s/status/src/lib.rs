#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod controller;
mod gateway;
mod index;
mod resource_id;
mod routes;


pub use self::{
    controller::{Controller, ControllerMetrics},
    index::{Index, IndexMetrics, Settings, SharedIndex, Update},
    resource_id::{NamespaceGroupKindName, ResourceId},
};
