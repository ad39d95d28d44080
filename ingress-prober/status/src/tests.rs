mod lifecycle;

use crate::{handler, Prober, ProberConfig, ProberMetrics, Ready};
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use linkerd_ingress_prober_core::{
    IngressKey, IngressSnapshot, ProbeIngress, ProbeTarget, ProbeTargetLister, Rule, Visibility,
    HASH_HEADER, PROBE_PATH,
};
use parking_lot::Mutex;
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{sync::mpsc, time};

const POD_A: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1));
const POD_B: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 2));

type Handler = dyn Fn(IpAddr, &Request<Incoming>) -> Response<Full<Bytes>> + Send + Sync;

/// A loopback gateway. Connections to any 127/8 address are accepted so that several pods can be
/// served from a single port; the handler is told which address was dialed.
struct Gateway {
    port: u16,
    seen: Arc<Mutex<Vec<Seen>>>,
    task: tokio::task::JoinHandle<()>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Seen {
    pod: IpAddr,
    host: String,
    hash: String,
}

struct StaticLister {
    targets: Mutex<Vec<ProbeTarget>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

struct Test {
    prober: Prober,
    lister: Arc<StaticLister>,
    ready: mpsc::UnboundedReceiver<Ready>,
    _tracing: tracing::subscriber::DefaultGuard,
}

fn config() -> ProberConfig {
    ProberConfig {
        workers: 4,
        initial_backoff: time::Duration::from_millis(10),
        max_backoff: time::Duration::from_millis(100),
        ..Default::default()
    }
}

fn ingress(hash: &str) -> IngressSnapshot {
    ingress_named("web", hash)
}

fn ingress_named(name: &str, hash: &str) -> IngressSnapshot {
    IngressSnapshot {
        key: IngressKey::new("default", name),
        rules: vec![Rule {
            hosts: vec!["foo.example.com".to_string()],
            visibility: Visibility::ExternalIp,
        }],
        hash: hash.to_string(),
    }
}

fn target(pods: impl IntoIterator<Item = IpAddr>, port: u16, hosts: &[&str]) -> ProbeTarget {
    ProbeTarget {
        pod_ips: pods.into_iter().collect(),
        pod_port: port,
        urls: hosts
            .iter()
            .map(|host| format!("http://{host}{PROBE_PATH}").parse().unwrap())
            .collect(),
    }
}

/// Answers probes as a gateway that has applied the requested version.
fn echo(_: IpAddr, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    handler::probe_response(req)
}

fn respond(status: StatusCode, hash: Option<&str>) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::default());
    *rsp.status_mut() = status;
    if let Some(hash) = hash {
        rsp.headers_mut().insert(
            HeaderName::from_static(HASH_HEADER),
            HeaderValue::from_str(hash).unwrap(),
        );
    }
    rsp
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

// === impl Gateway ===

impl Gateway {
    async fn serve(
        handler: impl Fn(IpAddr, &Request<Incoming>) -> Response<Full<Bytes>> + Send + Sync + 'static,
    ) -> Self {
        Self::serve_delayed(time::Duration::ZERO, handler).await
    }

    async fn serve_delayed(
        delay: time::Duration,
        handler: impl Fn(IpAddr, &Request<Incoming>) -> Response<Full<Bytes>> + Send + Sync + 'static,
    ) -> Self {
        let listener = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let task = tokio::spawn({
            let seen = seen.clone();
            async move {
                while let Ok((io, _)) = listener.accept().await {
                    let pod = io.local_addr().unwrap().ip();
                    let handler = handler.clone();
                    let seen = seen.clone();
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let header = |name: HeaderName| {
                            req.headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_string()
                        };
                        seen.lock().push(Seen {
                            pod,
                            host: header(header::HOST),
                            hash: header(HeaderName::from_static(HASH_HEADER)),
                        });
                        let rsp = handler(pod, &req);
                        async move {
                            time::sleep(delay).await;
                            Ok::<_, Infallible>(rsp)
                        }
                    });
                    tokio::spawn(async move {
                        let _ = hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(io), svc)
                            .await;
                    });
                }
            }
        });

        Self { port, seen, task }
    }

    fn requests(&self) -> usize {
        self.seen.lock().len()
    }

    fn seen(&self) -> Vec<Seen> {
        let mut seen = self.seen.lock().clone();
        seen.sort();
        seen.dedup();
        seen
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// === impl StaticLister ===

impl StaticLister {
    fn new(targets: Vec<ProbeTarget>) -> Self {
        Self {
            targets: Mutex::new(targets),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProbeTargetLister for StaticLister {
    async fn list_probe_targets(&self, _: &dyn ProbeIngress) -> anyhow::Result<Vec<ProbeTarget>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers race past the cache.
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("no gateway pods");
        }
        Ok(self.targets.lock().clone())
    }
}

// === impl Test ===

impl Test {
    fn new(targets: Vec<ProbeTarget>) -> Self {
        Self::with_config(config(), targets)
    }

    fn with_config(config: ProberConfig, targets: Vec<ProbeTarget>) -> Self {
        let _tracing = init_tracing();
        let lister = Arc::new(StaticLister::new(targets));
        let (tx, ready) = mpsc::unbounded_channel();
        let prober = Prober::new(
            config,
            lister.clone(),
            move |ready| {
                let _ = tx.send(ready);
            },
            ProberMetrics::register(&mut Default::default()),
        );
        Self {
            prober,
            lister,
            ready,
            _tracing,
        }
    }

    /// Starts the prober's workers, returning the signal that stops them.
    fn start(&self) -> (drain::Signal, tokio::task::JoinHandle<()>) {
        let (signal, watch) = drain::channel();
        let task = self.prober.start(watch).expect("prober must start");
        (signal, task)
    }

    async fn next_ready(&mut self) -> Ready {
        time::timeout(time::Duration::from_secs(5), self.ready.recv())
            .await
            .expect("ingress must become ready")
            .expect("prober must not be dropped")
    }

    /// Asserts that nothing became ready during `wait`.
    async fn assert_not_ready(&mut self, wait: time::Duration) {
        time::sleep(wait).await;
        if let Ok(ready) = self.ready.try_recv() {
            panic!("unexpected readiness: {ready:?}");
        }
    }
}

fn ready(ingress: &IngressSnapshot) -> Ready {
    Ready {
        key: ingress.key.clone(),
        hash: ingress.hash.clone(),
    }
}

fn addr(pod: IpAddr, port: u16) -> SocketAddr {
    SocketAddr::new(pod, port)
}
