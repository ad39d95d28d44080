//! Probes gateway pods to determine when an ingress version has been applied by all of them.
//!
//! Each version of an ingress is probed at most once. Every pod that serves the ingress is sent a
//! request for each of the ingress's URLs until the pod echoes the version's hash (or fails to
//! report any hash at all). Once all pods have done so, the ready callback is invoked.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
mod config;
mod dispatch;
pub mod handler;
mod metrics;
mod probe;
mod prober;
mod state;

#[cfg(test)]
mod tests;

pub use self::{
    config::ProberConfig,
    metrics::ProberMetrics,
    prober::{Prober, Ready, ResolveError},
};
