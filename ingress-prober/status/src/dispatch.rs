use crate::{
    metrics::ProbeResult,
    probe::{self, ProbeRequest, Verdict},
    prober::{Inner, Prober},
    state::WorkItem,
};
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinSet, time};
use tracing::{debug, info, info_span, trace, Instrument};

type SharedQueue = Arc<Mutex<tokio::sync::mpsc::UnboundedReceiver<WorkItem>>>;

impl Prober {
    /// Spawns the prober's workers and the expiration sweeper.
    ///
    /// The returned task completes once `shutdown` is signaled and every worker has stopped. All
    /// in-flight probes are cancelled on shutdown. Fails if the prober has already been started.
    pub fn start(&self, shutdown: drain::Watch) -> Result<tokio::task::JoinHandle<()>> {
        let Some(rx) = self.inner.rx.lock().take() else {
            bail!("prober already started");
        };
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 0..self.inner.config.workers.max(1) {
            workers.spawn(
                work(self.inner.clone(), rx.clone()).instrument(info_span!("worker", id)),
            );
        }

        let inner = self.inner.clone();
        let task = async move {
            let period = inner.config.cleanup_interval.max(time::Duration::from_millis(1));
            let mut cleanup = time::interval(period);
            cleanup.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            tokio::pin! {
                let shutdown = shutdown.signaled();
            }

            loop {
                tokio::select! {
                    now = cleanup.tick() => {
                        let expired = inner.expire(now);
                        if expired > 0 {
                            debug!(expired, "Discarded expired ingress state");
                        }
                    }

                    release = &mut shutdown => {
                        info!("Shutting down");
                        inner.root.cancel();
                        release
                            .release_after(async {
                                while workers.join_next().await.is_some() {}
                            })
                            .await;
                        return;
                    }
                }
            }
        };

        Ok(tokio::spawn(task.instrument(info_span!("prober"))))
    }
}

async fn work(inner: Arc<Inner>, rx: SharedQueue) {
    loop {
        let item = tokio::select! {
            biased;
            _ = inner.root.cancelled() => return,
            item = async { rx.lock().await.recv().await } => match item {
                Some(item) => item,
                None => return,
            },
        };
        process(&inner, item).await;
    }
}

async fn process(inner: &Arc<Inner>, item: WorkItem) {
    if item.is_cancelled() {
        trace!(addr = %item.addr, url = %item.url, "Skipping cancelled probe");
        return;
    }

    let req = ProbeRequest {
        addr: item.addr,
        url: &item.url,
        hash: &item.ingress.hash,
        user_agent: &inner.config.user_agent,
    };
    let cancel = item.pod.cancel.clone();
    let start = time::Instant::now();
    let res = tokio::select! {
        res = probe::send(req, inner.config.probe_timeout) => res,
        _ = cancel.cancelled() => return,
    };
    let elapsed = start.elapsed();

    let verdict = match res {
        Ok(rsp) => {
            let verdict = probe::verify(rsp.status, &rsp.headers, &item.ingress.hash);
            let result = match verdict {
                Verdict::Ready => ProbeResult::Success,
                Verdict::Stale { .. } => ProbeResult::Mismatch,
                Verdict::Unavailable(_) => ProbeResult::Failure,
            };
            inner.metrics.probed(result, elapsed);
            verdict
        }
        Err(error) => {
            inner.metrics.probed(ProbeResult::Error, elapsed);
            trace!(
                ingress = %item.ingress.key,
                addr = %item.addr,
                url = %item.url,
                %error,
                "Probe failed"
            );
            retry(inner, item);
            return;
        }
    };

    if item.is_cancelled() {
        return;
    }

    match verdict {
        Verdict::Ready => {
            trace!(ingress = %item.ingress.key, addr = %item.addr, url = %item.url, "Probe succeeded");
            if item.pod.confirm() {
                inner.pod_confirmed(&item.ingress);
            }
        }
        Verdict::Stale { hash } => {
            trace!(
                ingress = %item.ingress.key,
                addr = %item.addr,
                url = %item.url,
                expected = %item.ingress.hash,
                actual = %hash,
                "Gateway serves another version"
            );
            retry(inner, item);
        }
        Verdict::Unavailable(status) => {
            trace!(
                ingress = %item.ingress.key,
                addr = %item.addr,
                url = %item.url,
                %status,
                "Gateway has no route"
            );
            retry(inner, item);
        }
    }
}

/// Requeues the item after a backoff, unless it is cancelled first.
fn retry(inner: &Arc<Inner>, mut item: WorkItem) {
    item.failures = item.failures.saturating_add(1);
    let delay = inner.backoff.delay(item.failures);
    let queue = inner.queue.clone();
    let cancel = item.pod.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = time::sleep(delay) => {
                // The queue is closed once the workers have stopped.
                let _ = queue.send(item);
            }
            _ = cancel.cancelled() => {}
        }
    });
}
