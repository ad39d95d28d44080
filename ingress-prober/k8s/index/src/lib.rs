//! Linkerd Ingress Prober Kubernetes index
//!
//! Resolves where an ingress must be probed from the cluster's state. Gateway pods are selected by
//! label for each ingress visibility and indexed as they become ready:
//!
//! ```text
//! [ Ingress ] -> [ Rule (hosts, visibility) ] -> [ gateway Pod IPs ]
//! ```
//!
//! When a gateway pod stops serving, its IP is announced so that outstanding probes to it can be
//! cancelled.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod gateway;
mod ingress;
mod lister;

pub use self::{
    gateway::{Index, SharedIndex},
    ingress::snapshot,
    lister::GatewayLister,
};
