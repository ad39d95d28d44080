use crate::{
    controller::Controller,
    core::{ClusterInfo, Visibility, PROBE_PATH},
    index::{self, GatewayLister},
    k8s::{self, Selector},
    status::{Prober, ProberConfig, ProberMetrics, Ready},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{collections::BTreeMap, net::IpAddr, sync::Arc};
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "ingress-prober", about = "Probes gateways for ingress readiness")]
pub struct Args {
    #[clap(
        long,
        default_value = "linkerd=info,warn",
        env = "LINKERD_INGRESS_PROBER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// The namespace in which gateway pods run.
    #[clap(long, default_value = "linkerd-ingress")]
    gateway_namespace: String,

    /// Selects the gateway pods that serve externally visible ingress rules.
    #[clap(long, default_value = "app=external-gateway")]
    external_gateway_selector: Selector,

    /// Selects the gateway pods that serve cluster-local ingress rules.
    #[clap(long, default_value = "app=local-gateway")]
    local_gateway_selector: Selector,

    /// The port on which gateway pods answer probes.
    #[clap(long, default_value = "80")]
    gateway_port: u16,

    #[clap(long, default_value = PROBE_PATH)]
    probe_path: String,

    /// The maximum number of concurrent probes.
    #[clap(long, default_value = "15")]
    probe_workers: usize,

    #[clap(long, default_value = "1000")]
    probe_timeout_ms: u64,

    #[clap(long, default_value = "50")]
    initial_backoff_ms: u64,

    #[clap(long, default_value = "5000")]
    max_backoff_ms: u64,

    /// Discards the probe state of ingresses that haven't been checked for this long.
    #[clap(long, default_value = "300")]
    state_expiration_secs: u64,

    #[clap(long, default_value = "60")]
    cleanup_interval_secs: u64,

    /// The delay before an ingress whose probe targets could not be resolved is checked again.
    #[clap(long, default_value = "1000")]
    requeue_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            cluster_domain,
            gateway_namespace,
            external_gateway_selector,
            local_gateway_selector,
            gateway_port,
            probe_path,
            probe_workers,
            probe_timeout_ms,
            initial_backoff_ms,
            max_backoff_ms,
            state_expiration_secs,
            cleanup_interval_secs,
            requeue_ms,
        } = self;

        if initial_backoff_ms > max_backoff_ms {
            bail!("--initial-backoff-ms must not exceed --max-backoff-ms");
        }

        let config = ProberConfig {
            workers: probe_workers,
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            state_expiration: Duration::from_secs(state_expiration_secs),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
            ..ProberConfig::default()
        };

        let mut prom = <Registry>::default();
        let prober_metrics =
            ProberMetrics::register(prom.sub_registry_with_prefix("ingress_prober"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Index the gateway pods of each visibility. Pods that stop serving are announced so that
        // probes waiting on them can be cancelled.
        let (removed_tx, removed_rx) = mpsc::unbounded_channel();
        let selectors = BTreeMap::from([
            (Visibility::ExternalIp, external_gateway_selector),
            (Visibility::ClusterLocal, local_gateway_selector),
        ]);
        let gateways = index::Index::shared(selectors, removed_tx);

        let pods = runtime
            .watch_namespaced::<k8s::Pod>(gateway_namespace, watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(gateways.clone(), pods).instrument(info_span!("pods")),
        );

        let lister = GatewayLister::new(
            gateways,
            ClusterInfo {
                dns_domain: cluster_domain,
            },
            gateway_port,
            probe_path,
        );
        let prober = Prober::new(config, Arc::new(lister), on_ready, prober_metrics);
        prober.start(runtime.shutdown_handle())?;

        tokio::spawn(
            cancel_removed_pods(prober.clone(), removed_rx).instrument(info_span!("gateways")),
        );

        let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
        let controller = Controller::shared(prober, Duration::from_millis(requeue_ms));
        tokio::spawn(
            kubert::index::namespaced(controller, ingresses).instrument(info_span!("ingresses")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn on_ready(Ready { key, hash }: Ready) {
    info!(ingress = %key, %hash, "Ingress ready");
}

async fn cancel_removed_pods(prober: Prober, mut removed: mpsc::UnboundedReceiver<IpAddr>) {
    while let Some(ip) = removed.recv().await {
        prober.cancel_pod_probing(ip);
    }
}
