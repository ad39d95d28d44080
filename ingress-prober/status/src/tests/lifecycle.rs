use super::*;
use crate::ResolveError;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn probes_every_url_on_every_pod() {
    let gateway = Gateway::serve(echo).await;
    let mut test = Test::new(vec![target(
        [POD_A, POD_B],
        gateway.port,
        &["foo.example.com", "foo.default.svc.cluster.local"],
    )]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    assert_eq!(test.next_ready().await, ready(&web));
    assert!(test.prober.is_ready(&web).await.unwrap());

    let seen = |pod, host: &str| Seen {
        pod,
        host: host.to_string(),
        hash: "v1".to_string(),
    };
    assert_eq!(
        gateway.seen(),
        vec![
            seen(POD_A, "foo.default.svc.cluster.local"),
            seen(POD_A, "foo.example.com"),
            seen(POD_B, "foo.default.svc.cluster.local"),
            seen(POD_B, "foo.example.com"),
        ],
    );
    assert_eq!(test.lister.calls(), 1);
}

#[tokio::test]
async fn cached_readiness_skips_probing() {
    let gateway = Gateway::serve(echo).await;
    let mut test = Test::new(vec![target([POD_A], gateway.port, &["foo.example.com"])]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    test.next_ready().await;

    let requests = gateway.requests();
    for _ in 0..3 {
        assert!(test.prober.is_ready(&web).await.unwrap());
    }
    assert_eq!(gateway.requests(), requests);
    assert_eq!(test.lister.calls(), 1);
    test.assert_not_ready(time::Duration::from_millis(50)).await;
}

#[tokio::test]
async fn stale_gateway_is_retried_until_current() {
    let current = Arc::new(Mutex::new("v0".to_string()));
    let gateway = Gateway::serve({
        let current = current.clone();
        move |_: IpAddr, _: &Request<Incoming>| {
            respond(StatusCode::OK, Some(current.lock().as_str()))
        }
    })
    .await;
    let mut test = Test::new(vec![target(
        [POD_A],
        gateway.port,
        &["foo.example.com", "foo.default.svc.cluster.local"],
    )]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    test.assert_not_ready(time::Duration::from_millis(200)).await;
    assert!(gateway.requests() > 2, "stale gateways must be probed again");
    assert!(!test.prober.is_ready(&web).await.unwrap());

    *current.lock() = "v1".to_string();
    assert_eq!(test.next_ready().await, ready(&web));
    assert!(test.prober.is_ready(&web).await.unwrap());

    // Both hosts were probed, and readiness is only reported once.
    let hosts = gateway
        .seen()
        .into_iter()
        .map(|s| s.host)
        .collect::<std::collections::BTreeSet<_>>();
    assert_eq!(hosts.len(), 2, "{hosts:?}");
    test.assert_not_ready(time::Duration::from_millis(200)).await;
}

#[tokio::test]
async fn unrouted_gateway_is_retried() {
    let requests = Arc::new(AtomicUsize::new(0));
    let gateway = Gateway::serve({
        let requests = requests.clone();
        move |pod: IpAddr, req: &Request<Incoming>| match requests.fetch_add(1, Ordering::SeqCst) {
            0 => respond(StatusCode::NOT_FOUND, None),
            1 => respond(StatusCode::SERVICE_UNAVAILABLE, None),
            2 => respond(StatusCode::BAD_GATEWAY, Some("v1")),
            _ => echo(pod, req),
        }
    })
    .await;
    let mut test = Test::new(vec![target([POD_A], gateway.port, &["foo.example.com"])]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    assert_eq!(test.next_ready().await, ready(&web));
    assert_eq!(gateway.requests(), 4);
}

#[tokio::test]
async fn gateway_without_hash_is_ready() {
    let gateway = Gateway::serve(|_, _| respond(StatusCode::FORBIDDEN, None)).await;
    let mut test = Test::new(vec![target([POD_A], gateway.port, &["foo.example.com"])]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    assert_eq!(test.next_ready().await, ready(&web));
}

#[tokio::test]
async fn unreachable_pods_are_retried() {
    // Reserve a port and release it so that connections are refused.
    let port = {
        let listener = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut test = Test::new(vec![target([POD_A], port, &["foo.example.com"])]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    test.assert_not_ready(time::Duration::from_millis(200)).await;
    assert!(!test.prober.is_ready(&web).await.unwrap());
}

#[tokio::test]
async fn new_hash_supersedes_old() {
    // Responses are delayed so that probes for v1 are still in flight when v2 is observed.
    let gateway = Gateway::serve_delayed(time::Duration::from_millis(200), echo).await;
    let mut test = Test::new(vec![target([POD_A], gateway.port, &["foo.example.com"])]);
    let _workers = test.start();

    let v1 = ingress("v1");
    assert!(!test.prober.is_ready(&v1).await.unwrap());
    time::sleep(time::Duration::from_millis(50)).await;

    let v2 = ingress("v2");
    assert!(!test.prober.is_ready(&v2).await.unwrap());
    assert_eq!(test.next_ready().await, ready(&v2));
    test.assert_not_ready(time::Duration::from_millis(300)).await;
    assert_eq!(test.lister.calls(), 2);

    // Returning to the old version starts over.
    assert!(!test.prober.is_ready(&v1).await.unwrap());
    assert_eq!(test.next_ready().await, ready(&v1));
}

#[tokio::test]
async fn resolution_errors_are_returned() {
    let gateway = Gateway::serve(echo).await;
    let mut test = Test::new(vec![target([POD_A], gateway.port, &["foo.example.com"])]);
    let _workers = test.start();
    test.lister.fail.store(true, Ordering::SeqCst);

    let web = ingress("v1");
    let err = test.prober.is_ready(&web).await.unwrap_err();
    assert!(matches!(err, ResolveError::List(_)), "{err}");
    assert!(err.to_string().contains("no gateway pods"), "{err}");

    // Failures aren't cached.
    test.lister.fail.store(false, Ordering::SeqCst);
    assert!(!test.prober.is_ready(&web).await.unwrap());
    assert_eq!(test.next_ready().await, ready(&web));
    assert_eq!(test.lister.calls(), 2);
}

#[tokio::test]
async fn https_targets_are_rejected() {
    let test = Test::new(vec![ProbeTarget {
        pod_ips: [POD_A].into_iter().collect(),
        pod_port: 8443,
        urls: vec!["https://foo.example.com/healthz".parse().unwrap()],
    }]);

    let web = ingress("v1");
    let err = test.prober.is_ready(&web).await.unwrap_err();
    assert!(matches!(err, ResolveError::UnsupportedScheme(_)), "{err}");

    // Nothing was cached.
    let _ = test.prober.is_ready(&web).await.unwrap_err();
    assert_eq!(test.lister.calls(), 2);
}

#[tokio::test]
async fn no_targets_is_ready_without_notification() {
    let mut test = Test::new(vec![]);
    let _workers = test.start();

    let web = ingress("v1");
    assert!(test.prober.is_ready(&web).await.unwrap());
    assert!(test.prober.is_ready(&web).await.unwrap());
    assert_eq!(test.lister.calls(), 1);
    test.assert_not_ready(time::Duration::from_millis(50)).await;
}

#[tokio::test]
async fn concurrent_checks_probe_once() {
    // The prober isn't started so that queued probes can be counted.
    let test = Test::new(vec![target(
        [POD_A, POD_B],
        8080,
        &["foo.example.com", "bar.example.com"],
    )]);

    let web = ingress("v1");
    let (a, b, c) = tokio::join!(
        test.prober.is_ready(&web),
        test.prober.is_ready(&web),
        test.prober.is_ready(&web),
    );
    assert!(!a.unwrap() && !b.unwrap() && !c.unwrap());

    let mut rx = test.prober.inner.rx.lock().take().unwrap();
    let mut queued = Vec::new();
    while let Ok(item) = rx.try_recv() {
        queued.push((item.addr, item.url.to_string()));
    }
    queued.sort();
    assert_eq!(
        queued,
        vec![
            (addr(POD_A, 8080), "http://bar.example.com/healthz".to_string()),
            (addr(POD_A, 8080), "http://foo.example.com/healthz".to_string()),
            (addr(POD_B, 8080), "http://bar.example.com/healthz".to_string()),
            (addr(POD_B, 8080), "http://foo.example.com/healthz".to_string()),
        ],
    );
}

#[tokio::test]
async fn expired_state_is_discarded() {
    let gateway = Gateway::serve(echo).await;
    let config = config();
    let expiration = config.state_expiration;
    let mut test = Test::with_config(
        config,
        vec![target([POD_A], gateway.port, &["foo.example.com"])],
    );
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    test.next_ready().await;

    let now = time::Instant::now();
    assert_eq!(test.prober.inner.expire(now), 0, "recently checked state must be kept");
    assert_eq!(
        test.prober.inner.expire(now + expiration + time::Duration::from_secs(1)),
        1
    );

    assert!(!test.prober.is_ready(&web).await.unwrap());
    assert_eq!(test.lister.calls(), 2);
    assert_eq!(test.next_ready().await, ready(&web));
}

#[tokio::test]
async fn slow_rollouts_outlive_expiration() {
    let routed = Arc::new(AtomicBool::new(false));
    let gateway = Gateway::serve({
        let routed = routed.clone();
        move |pod: IpAddr, req: &Request<Incoming>| {
            if routed.load(Ordering::SeqCst) {
                echo(pod, req)
            } else {
                respond(StatusCode::NOT_FOUND, None)
            }
        }
    })
    .await;
    let config = ProberConfig {
        state_expiration: time::Duration::from_millis(300),
        cleanup_interval: time::Duration::from_millis(50),
        ..config()
    };
    let mut test = Test::with_config(
        config,
        vec![target([POD_A], gateway.port, &["foo.example.com"])],
    );
    let _workers = test.start();

    let web = ingress("v1");
    assert!(!test.prober.is_ready(&web).await.unwrap());
    assert_eq!(
        test.prober.inner.expire(time::Instant::now() + time::Duration::from_secs(3600)),
        0,
        "pending state must be kept"
    );

    // The ingress goes unchecked for well past its expiration while the gateway has no route.
    test.assert_not_ready(time::Duration::from_millis(600)).await;
    let requests = gateway.requests();
    time::sleep(time::Duration::from_millis(200)).await;
    assert!(gateway.requests() > requests, "pending ingresses must still be probed");

    routed.store(true, Ordering::SeqCst);
    assert_eq!(test.next_ready().await, ready(&web));
    assert_eq!(test.lister.calls(), 1);
}

#[tokio::test]
async fn shutdown_stops_workers() {
    let gateway = Gateway::serve(|_, _| respond(StatusCode::NOT_FOUND, None)).await;
    let test = Test::new(vec![target([POD_A], gateway.port, &["foo.example.com"])]);
    let (signal, task) = test.start();

    assert!(!test.prober.is_ready(&ingress("v1")).await.unwrap());
    time::sleep(time::Duration::from_millis(50)).await;

    time::timeout(time::Duration::from_secs(5), signal.drain())
        .await
        .expect("workers must drain");
    time::timeout(time::Duration::from_secs(5), task)
        .await
        .expect("prober must stop")
        .expect("prober must not panic");

    // Probing has stopped.
    let requests = gateway.requests();
    time::sleep(time::Duration::from_millis(200)).await;
    assert!(gateway.requests() <= requests + 1);

    let (_signal, watch) = drain::channel();
    assert!(test.prober.start(watch).is_err(), "prober must only start once");
}
