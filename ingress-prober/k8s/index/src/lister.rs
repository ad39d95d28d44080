use crate::gateway::SharedIndex;
use anyhow::{bail, Result};
use linkerd_ingress_prober_core::{
    ClusterInfo, ProbeIngress, ProbeTarget, ProbeTargetLister, Visibility,
};
use std::collections::{BTreeMap, BTreeSet};

const VISIBILITIES: [Visibility; 2] = [Visibility::ExternalIp, Visibility::ClusterLocal];

/// Resolves an ingress's probe targets from the gateway pod index.
///
/// Every ready gateway pod of a rule's visibility is probed on each of the rule's expanded hosts.
#[derive(Clone, Debug)]
pub struct GatewayLister {
    index: SharedIndex,
    cluster: ClusterInfo,
    port: u16,
    probe_path: String,
}

// === impl GatewayLister ===

impl GatewayLister {
    pub fn new(index: SharedIndex, cluster: ClusterInfo, port: u16, probe_path: String) -> Self {
        Self {
            index,
            cluster,
            port,
            probe_path,
        }
    }

    fn url(&self, host: &str) -> Result<http::Uri> {
        let uri = if self.port == 80 {
            format!("http://{host}{}", self.probe_path)
        } else {
            format!("http://{host}:{}{}", self.port, self.probe_path)
        };
        Ok(uri.parse()?)
    }
}

#[async_trait::async_trait]
impl ProbeTargetLister for GatewayLister {
    async fn list_probe_targets(&self, ingress: &dyn ProbeIngress) -> Result<Vec<ProbeTarget>> {
        let gateways = self.index.read().gateways();

        // Each visibility is served by its own set of gateway pods.
        let keys = VISIBILITIES
            .iter()
            .map(|v| (*v, BTreeSet::from([*v])))
            .collect::<BTreeMap<_, _>>();

        let mut targets = Vec::new();
        for (visibility, hosts) in self.cluster.hosts_per_visibility(ingress.rules(), &keys) {
            if hosts.is_empty() {
                continue;
            }
            let pod_ips = gateways.get(&visibility).cloned().unwrap_or_default();
            if pod_ips.is_empty() {
                bail!("no gateway pods for {visibility} visibility");
            }
            let urls = hosts
                .iter()
                .map(|host| self.url(host))
                .collect::<Result<Vec<_>>>()?;
            targets.push(ProbeTarget {
                pod_ips,
                pod_port: self.port,
                urls,
            });
        }
        Ok(targets)
    }
}
