//! Indexes the gateway pods that serve each ingress visibility.

use ahash::AHashMap as HashMap;
use linkerd_ingress_prober_core::Visibility;
use linkerd_ingress_prober_k8s_api::{self as k8s, Labels, ResourceExt, Selector};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Debug)]
pub struct Index {
    selectors: BTreeMap<Visibility, Selector>,
    pods: HashMap<PodRef, GatewayPod>,

    /// Receives the IP of every gateway pod that stops serving, so that probes to it can be
    /// cancelled.
    removed: mpsc::UnboundedSender<IpAddr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PodRef {
    namespace: String,
    name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct GatewayPod {
    ip: IpAddr,
    visibilities: BTreeSet<Visibility>,
}

// === impl Index ===

impl Index {
    pub fn shared(
        selectors: BTreeMap<Visibility, Selector>,
        removed: mpsc::UnboundedSender<IpAddr>,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            selectors,
            pods: HashMap::default(),
            removed,
        }))
    }

    /// Returns the IPs of the ready gateway pods for each visibility that has a configured
    /// selector.
    pub fn gateways(&self) -> BTreeMap<Visibility, BTreeSet<IpAddr>> {
        let mut gateways = self
            .selectors
            .keys()
            .map(|v| (*v, BTreeSet::new()))
            .collect::<BTreeMap<_, _>>();
        for pod in self.pods.values() {
            for v in &pod.visibilities {
                gateways.entry(*v).or_default().insert(pod.ip);
            }
        }
        gateways
    }

    /// Returns the gateway state for a pod if it should be probed.
    fn gateway_pod(&self, pod: &k8s::Pod) -> Option<GatewayPod> {
        if pod.metadata.deletion_timestamp.is_some() {
            return None;
        }

        let labels = Labels::from(pod.metadata.labels.clone());
        let visibilities = self
            .selectors
            .iter()
            .filter(|(_, selector)| selector.matches(&labels))
            .map(|(v, _)| *v)
            .collect::<BTreeSet<_>>();
        if visibilities.is_empty() {
            return None;
        }

        let status = pod.status.as_ref()?;
        let ready = status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Ready" && c.status == "True");
        if !ready {
            return None;
        }

        let ip = status.pod_ip.as_deref()?;
        match ip.parse() {
            Ok(ip) => Some(GatewayPod { ip, visibilities }),
            Err(error) => {
                warn!(%error, pod = %pod.name_unchecked(), ip, "Invalid pod IP");
                None
            }
        }
    }

    fn remove(&mut self, pod: &PodRef) {
        let Some(GatewayPod { ip, .. }) = self.pods.remove(pod) else {
            return;
        };
        self.released(ip);
    }

    /// Announces that an IP no longer belongs to a gateway pod, unless another pod still holds it.
    fn released(&self, ip: IpAddr) {
        if self.pods.values().any(|p| p.ip == ip) {
            return;
        }
        debug!(%ip, "Gateway pod removed");
        let _ = self.removed.send(ip);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, pod: k8s::Pod) {
        let pod_ref = PodRef {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_unchecked(),
        };

        let Some(gateway) = self.gateway_pod(&pod) else {
            trace!(ns = %pod_ref.namespace, pod = %pod_ref.name, "Not a ready gateway pod");
            self.remove(&pod_ref);
            return;
        };

        trace!(ns = %pod_ref.namespace, pod = %pod_ref.name, ip = %gateway.ip, "Gateway pod ready");
        let new_ip = gateway.ip;
        if let Some(old) = self.pods.insert(pod_ref, gateway) {
            if old.ip != new_ip {
                self.released(old.ip);
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(&PodRef { namespace, name });
    }
}
