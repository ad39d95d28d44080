use crate::ProbeIngress;
use anyhow::Result;
use std::{collections::BTreeSet, net::IpAddr};

/// A group of pods that must each serve every one of `urls`.
///
/// The URL's authority is sent as the `Host` header while the connection is made to
/// `pod_ip:pod_port`, so that a specific pod is probed rather than whichever endpoint the load
/// balancer picks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    pub pod_ips: BTreeSet<IpAddr>,
    pub pod_port: u16,
    pub urls: Vec<http::Uri>,
}

/// Resolves the pods that must confirm an ingress version.
///
/// Every target that lists URLs must list at least one pod; otherwise the version could never be
/// confirmed, and resolution fails.
#[async_trait::async_trait]
pub trait ProbeTargetLister: Send + Sync {
    async fn list_probe_targets(&self, ingress: &dyn ProbeIngress) -> Result<Vec<ProbeTarget>>;
}
