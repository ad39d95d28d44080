use ahash::AHashMap as HashMap;
use linkerd_ingress_prober_core::IngressKey;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio_util::sync::CancellationToken;

/// The probing state of one version of an ingress.
#[derive(Debug)]
pub(crate) struct IngressState {
    pub(crate) key: IngressKey,
    pub(crate) hash: String,

    /// Cancelled when the ingress is deleted, superseded, or expires. Every pod's token is a child
    /// of this token.
    cancel: CancellationToken,

    /// The number of pods that have not yet confirmed this version.
    pending: AtomicUsize,

    /// The pods probed for this version. Fixed when the version is first observed.
    pub(crate) pods: HashMap<IpAddr, Arc<PodState>>,
}

/// The probing state of one pod on behalf of one ingress version.
#[derive(Debug)]
pub(crate) struct PodState {
    /// The number of URLs that the pod has not yet confirmed.
    pending: AtomicUsize,

    /// Cancelled when the pod is removed or when the owning ingress state is cancelled.
    pub(crate) cancel: CancellationToken,
}

/// A single URL to be probed on a single pod.
#[derive(Debug)]
pub(crate) struct WorkItem {
    pub(crate) ingress: Arc<IngressState>,
    pub(crate) pod: Arc<PodState>,
    pub(crate) addr: SocketAddr,
    pub(crate) url: http::Uri,

    /// The number of consecutive failed attempts.
    pub(crate) failures: u32,
}

// === impl IngressState ===

impl IngressState {
    /// Creates the state for an ingress version that must be confirmed by every pod in `pods`,
    /// each of which must confirm the given number of URLs.
    pub(crate) fn new(
        key: IngressKey,
        hash: String,
        cancel: CancellationToken,
        pods: impl IntoIterator<Item = (IpAddr, usize)>,
    ) -> Self {
        let pods = pods
            .into_iter()
            .map(|(ip, urls)| {
                let pod = PodState {
                    pending: AtomicUsize::new(urls),
                    cancel: cancel.child_token(),
                };
                (ip, Arc::new(pod))
            })
            .collect::<HashMap<_, _>>();
        Self {
            key,
            hash,
            pending: AtomicUsize::new(pods.len()),
            cancel,
            pods,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Records that one more pod no longer gates readiness. Returns true if this made the
    /// ingress version ready.
    pub(crate) fn release_pod(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            == Ok(1)
    }
}

// === impl PodState ===

impl PodState {
    /// Records a URL confirmed by the pod. Returns true if it was the pod's last pending URL.
    pub(crate) fn confirm(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            == Ok(1)
    }

    /// Stops waiting on the pod. Returns true if the pod had not yet confirmed every URL.
    pub(crate) fn abandon(&self) -> bool {
        self.pending.swap(0, Ordering::AcqRel) > 0
    }
}

// === impl WorkItem ===

impl WorkItem {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.pod.cancel.is_cancelled()
    }
}
