#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use meshgateway_controller_core as core;
pub use meshgateway_controller_k8s_api as k8s;
pub use meshgateway_controller_k8s_index as index;
pub use meshgateway_controller_k8s_status as status;
pub use meshgateway_controller_repo as repo;

mod args;
mod index_list;
mod issuer;
mod lease;

pub use self::args::Args;
