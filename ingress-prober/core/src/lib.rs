//! Linkerd Ingress Prober
//!
//! The prober determines when an ingress's routing configuration has been realized by every gateway
//! pod that serves it. Each ingress version is identified by an opaque content hash. Gateways that
//! have picked up a version echo its hash back on probe requests:
//!
//! ```text
//! [ Ingress ] -> [ ProbeTarget ] -> [ Pod IP ] <- probe (Host: <rule host>, l5d-network-hash: <hash>)
//! ```
//!
//! This crate holds the types shared between the prober engine and the Kubernetes-backed target
//! resolver.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod hosts;
mod ingress;
mod target;

pub use self::{
    hosts::ClusterInfo,
    ingress::{IngressKey, IngressSnapshot, ProbeIngress, Rule, Visibility},
    target::{ProbeTarget, ProbeTargetLister},
};

/// Marks a request as a readiness probe. Gateways answer such requests themselves rather than
/// forwarding them to an application.
pub const PROBE_HEADER: &str = "l5d-network-probe";

/// The only value of [`PROBE_HEADER`] that is treated as an ingress probe.
pub const PROBE_HEADER_VALUE: &str = "probe";

/// Carries the content hash of the ingress version being probed. Gateways echo it back once the
/// version is applied.
pub const HASH_HEADER: &str = "l5d-network-hash";

/// The path requested by probes.
pub const PROBE_PATH: &str = "/healthz";

/// The `User-Agent` set on probe requests.
pub const PROBER_USER_AGENT: &str = "linkerd-ingress-prober";

/// Since Kubernetes 1.8, kubelet probes set `User-Agent: kube-probe/{major}.{minor}`.
pub const KUBE_PROBE_USER_AGENT_PREFIX: &str = "kube-probe/";

/// Set on kubelet probes that have been rewritten by a mesh and no longer carry the kubelet
/// user agent.
pub const KUBELET_PROBE_HEADER: &str = "k-kubelet-probe";
