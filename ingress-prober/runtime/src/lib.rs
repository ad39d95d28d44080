#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use linkerd_ingress_prober_core as core;
pub use linkerd_ingress_prober_k8s_api as k8s;
pub use linkerd_ingress_prober_k8s_index as index;
pub use linkerd_ingress_prober_status as status;

mod args;
mod controller;

pub use self::args::Args;
