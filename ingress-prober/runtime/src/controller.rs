use crate::{
    core::{IngressKey, IngressSnapshot},
    index,
    k8s::{self, ResourceExt},
    status::Prober,
};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

pub(crate) type SharedController = Arc<RwLock<Controller>>;

/// Checks the readiness of each version of each ingress as it is observed.
///
/// Readiness checks that fail to resolve probe targets are retried until they succeed or the
/// ingress changes. Deleted ingresses are no longer probed.
pub(crate) struct Controller {
    prober: Prober,
    requeue: time::Duration,
    ingresses: HashMap<IngressKey, Tracked>,
}

struct Tracked {
    hash: String,
    cancel: CancellationToken,
}

// === impl Controller ===

impl Controller {
    pub(crate) fn shared(prober: Prober, requeue: time::Duration) -> SharedController {
        Arc::new(RwLock::new(Self {
            prober,
            requeue,
            ingresses: HashMap::default(),
        }))
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Ingress> for Controller {
    fn apply(&mut self, ingress: k8s::Ingress) {
        let snapshot = match index::snapshot(&ingress) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, ingress = %ingress.name_unchecked(), "Ignoring ingress");
                return;
            }
        };

        if let Some(tracked) = self.ingresses.get(&snapshot.key) {
            if tracked.hash == snapshot.hash {
                return;
            }
            tracked.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        self.ingresses.insert(
            snapshot.key.clone(),
            Tracked {
                hash: snapshot.hash.clone(),
                cancel: cancel.clone(),
            },
        );

        let span = info_span!("ingress", ns = %snapshot.key.namespace, name = %snapshot.key.name);
        tokio::spawn(check(self.prober.clone(), snapshot, self.requeue, cancel).instrument(span));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = IngressKey { namespace, name };
        if let Some(Tracked { cancel, .. }) = self.ingresses.remove(&key) {
            cancel.cancel();
        }
        self.prober.cancel_ingress_probing(&key);
    }
}

async fn check(
    prober: Prober,
    ingress: IngressSnapshot,
    requeue: time::Duration,
    cancel: CancellationToken,
) {
    loop {
        let res = tokio::select! {
            res = prober.is_ready(&ingress) => res,
            _ = cancel.cancelled() => return,
        };
        match res {
            Ok(ready) => {
                debug!(ready, hash = %ingress.hash, "Checked ingress");
                return;
            }
            Err(error) => {
                warn!(%error, hash = %ingress.hash, "Failed to check ingress readiness");
            }
        }

        tokio::select! {
            _ = time::sleep(requeue) => {}
            _ = cancel.cancelled() => return,
        }
    }
}
