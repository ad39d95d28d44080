use crate::{
    backoff::Backoff,
    metrics::{ProberMetrics, Scope},
    state::{IngressState, WorkItem},
    ProberConfig,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use linkerd_ingress_prober_core::{IngressKey, ProbeIngress, ProbeTarget, ProbeTargetLister};
use parking_lot::Mutex;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tracks whether every gateway pod serving an ingress has applied its current version.
///
/// `is_ready` may be called repeatedly (and concurrently) for the same ingress; probing for an
/// ingress version is started at most once and its outcome is cached until the ingress changes,
/// is cancelled, or goes unchecked for the configured expiration.
#[derive(Clone)]
pub struct Prober {
    pub(crate) inner: Arc<Inner>,
}

/// Identifies an ingress version that every gateway pod has confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ready {
    pub key: IngressKey,
    pub hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to list probe targets: {0:#}")]
    List(anyhow::Error),

    #[error("probe URL {0} has no authority")]
    MissingAuthority(http::Uri),

    #[error("probe URL {0} has an unsupported scheme")]
    UnsupportedScheme(http::Uri),

    #[error("probe URL {0} has no pods to probe")]
    NoPods(http::Uri),
}

pub(crate) struct Inner {
    pub(crate) config: ProberConfig,
    pub(crate) backoff: Backoff,
    pub(crate) metrics: ProberMetrics,
    lister: Arc<dyn ProbeTargetLister>,
    on_ready: Box<dyn Fn(Ready) + Send + Sync>,
    index: Mutex<Index>,

    /// Cancelled on shutdown. Every ingress state's token is a child of this token.
    pub(crate) root: CancellationToken,

    pub(crate) queue: mpsc::UnboundedSender<WorkItem>,
    pub(crate) rx: Mutex<Option<mpsc::UnboundedReceiver<WorkItem>>>,
}

/// Holds the current version of each ingress and the reverse mapping of pods to the ingresses
/// that wait on them. Both maps are only ever updated together.
#[derive(Debug, Default)]
struct Index {
    ingresses: HashMap<IngressKey, Entry>,
    pods: HashMap<IpAddr, HashSet<IngressKey>>,
}

#[derive(Debug)]
struct Entry {
    state: Arc<IngressState>,
    last_accessed: Instant,
}

/// The probe work for a single pod, keyed by dial address and URL.
type Plan = HashMap<IpAddr, Vec<(SocketAddr, http::Uri)>>;

// === impl Prober ===

impl Prober {
    pub fn new(
        config: ProberConfig,
        lister: Arc<dyn ProbeTargetLister>,
        on_ready: impl Fn(Ready) + Send + Sync + 'static,
        metrics: ProberMetrics,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                metrics,
                lister,
                on_ready: Box::new(on_ready),
                index: Mutex::new(Index::default()),
                root: CancellationToken::new(),
                queue,
                rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Returns true if every gateway pod has confirmed the ingress's current hash.
    ///
    /// When the hash hasn't been seen before, the ingress's probe targets are resolved and probing
    /// is started in the background; `false` is returned until all pods confirm it, at which point
    /// the ready callback is invoked. Errors are returned only when the targets cannot be resolved.
    pub async fn is_ready(&self, ingress: &dyn ProbeIngress) -> Result<bool, ResolveError> {
        let key = ingress.key();
        let hash = ingress.hash();

        if let Some(ready) = self.inner.cached(&key, hash) {
            return Ok(ready);
        }

        let targets = self
            .inner
            .lister
            .list_probe_targets(ingress)
            .await
            .map_err(ResolveError::List)?;
        let plan = plan(targets)?;

        let (state, items) = {
            let mut index = self.inner.index.lock();

            // Another caller may have registered this version while the targets were resolved.
            if let Some(ready) = self.inner.lookup(&mut index, &key, hash) {
                return Ok(ready);
            }

            let state = Arc::new(IngressState::new(
                key.clone(),
                hash.to_string(),
                self.inner.root.child_token(),
                plan.iter().map(|(ip, urls)| (*ip, urls.len())),
            ));
            for ip in state.pods.keys() {
                index.pods.entry(*ip).or_default().insert(key.clone());
            }
            index.ingresses.insert(
                key.clone(),
                Entry {
                    state: state.clone(),
                    last_accessed: Instant::now(),
                },
            );

            let items = plan
                .into_iter()
                .flat_map(|(ip, urls)| {
                    let state = state.clone();
                    let pod = state.pods[&ip].clone();
                    urls.into_iter().map(move |(addr, url)| WorkItem {
                        ingress: state.clone(),
                        pod: pod.clone(),
                        addr,
                        url,
                        failures: 0,
                    })
                })
                .collect::<Vec<_>>();
            (state, items)
        };

        debug!(ingress = %key, %hash, pods = state.pods.len(), probes = items.len(), "Probing");
        for item in items {
            if self.inner.queue.send(item).is_err() {
                debug!(ingress = %key, "Prober has shut down");
                break;
            }
        }

        Ok(state.is_ready())
    }

    /// Stops probing the pod with the given IP.
    ///
    /// Ingress versions waiting on the pod no longer do so; any that were waiting only on this
    /// pod become ready.
    pub fn cancel_pod_probing(&self, ip: IpAddr) {
        let ready = {
            let mut index = self.inner.index.lock();
            let Index { ingresses, pods } = &mut *index;
            let Some(keys) = pods.remove(&ip) else {
                return;
            };

            keys.into_iter()
                .filter_map(|key| {
                    let state = &ingresses.get(&key)?.state;
                    let pod = state.pods.get(&ip)?;
                    pod.cancel.cancel();
                    if pod.abandon() && state.release_pod() {
                        return Some(state.clone());
                    }
                    None
                })
                .collect::<Vec<_>>()
        };

        info!(%ip, "Cancelled pod probing");
        self.inner.metrics.cancelled(Scope::Pod);
        for state in ready {
            self.inner.notify(&state);
        }
    }

    /// Stops probing the ingress and discards its cached state.
    pub fn cancel_ingress_probing(&self, key: &IngressKey) {
        if self.inner.index.lock().remove(key).is_some() {
            info!(ingress = %key, "Cancelled ingress probing");
            self.inner.metrics.cancelled(Scope::Ingress);
        }
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

// === impl Inner ===

impl Inner {
    fn cached(&self, key: &IngressKey, hash: &str) -> Option<bool> {
        let mut index = self.index.lock();
        self.lookup(&mut index, key, hash)
    }

    /// Returns the readiness of the ingress if its current version is known. Probing of any other
    /// version is cancelled.
    fn lookup(&self, index: &mut Index, key: &IngressKey, hash: &str) -> Option<bool> {
        let entry = index.ingresses.get_mut(key)?;
        if entry.state.hash == hash {
            entry.last_accessed = Instant::now();
            return Some(entry.state.is_ready());
        }

        if let Some(state) = index.remove(key) {
            debug!(ingress = %key, old = %state.hash, new = %hash, "Ingress superseded");
            self.metrics.cancelled(Scope::Superseded);
        }
        None
    }

    /// Records that a pod has confirmed every URL, notifying if the ingress became ready.
    pub(crate) fn pod_confirmed(&self, state: &Arc<IngressState>) {
        if !state.release_pod() {
            return;
        }

        // A superseded or cancelled version never notifies.
        let current = {
            let index = self.index.lock();
            index
                .ingresses
                .get(&state.key)
                .is_some_and(|e| Arc::ptr_eq(&e.state, state))
        };
        if current && !state.is_cancelled() {
            self.notify(state);
        }
    }

    fn notify(&self, state: &IngressState) {
        debug!(ingress = %state.key, hash = %state.hash, "Ingress ready");
        self.metrics.ready();
        (self.on_ready)(Ready {
            key: state.key.clone(),
            hash: state.hash.clone(),
        });
    }

    /// Discards the state of ready ingresses that haven't been checked since
    /// `now - state_expiration`.
    ///
    /// Pending versions are kept regardless of age: callers learn of their readiness only through
    /// the ready callback, so they are probed until they complete or are cancelled.
    pub(crate) fn expire(&self, now: Instant) -> usize {
        let mut index = self.index.lock();
        let expired = index
            .ingresses
            .iter()
            .filter(|(_, e)| {
                e.state.is_ready() && e.last_accessed + self.config.state_expiration <= now
            })
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            index.remove(key);
            debug!(ingress = %key, "Expired ingress state");
            self.metrics.cancelled(Scope::Expired);
        }
        expired.len()
    }
}

// === impl Index ===

impl Index {
    fn remove(&mut self, key: &IngressKey) -> Option<Arc<IngressState>> {
        let Entry { state, .. } = self.ingresses.remove(key)?;
        state.cancel();
        for ip in state.pods.keys() {
            if let Some(keys) = self.pods.get_mut(ip) {
                keys.remove(key);
                if keys.is_empty() {
                    self.pods.remove(ip);
                }
            }
        }
        Some(state)
    }
}

/// Groups the targets' URLs by pod, omitting duplicates.
fn plan(targets: Vec<ProbeTarget>) -> Result<Plan, ResolveError> {
    let mut plan = Plan::default();
    for ProbeTarget {
        pod_ips,
        pod_port,
        urls,
    } in targets
    {
        for url in &urls {
            if url.authority().is_none() {
                return Err(ResolveError::MissingAuthority(url.clone()));
            }
            if url.scheme() != Some(&http::uri::Scheme::HTTP) {
                return Err(ResolveError::UnsupportedScheme(url.clone()));
            }
        }
        let Some(first) = urls.first() else {
            continue;
        };
        if pod_ips.is_empty() {
            return Err(ResolveError::NoPods(first.clone()));
        }

        for ip in pod_ips {
            let addr = SocketAddr::new(ip, pod_port);
            let work = plan.entry(ip).or_default();
            for url in &urls {
                if !work.iter().any(|(a, u)| *a == addr && u == url) {
                    work.push((addr, url.clone()));
                }
            }
        }
    }
    Ok(plan)
}
