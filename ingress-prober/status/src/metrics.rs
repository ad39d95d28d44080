use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        histogram::{exponential_buckets, Histogram},
    },
    registry::Registry,
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ProberMetrics {
    probes: Family<ResultLabels, Counter>,
    probe_duration: Histogram,
    ready: Counter,
    cancellations: Family<ScopeLabels, Counter>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ProbeResult {
    Success,
    Mismatch,
    Failure,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    Pod,
    Ingress,
    Superseded,
    Expired,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ScopeLabels {
    scope: &'static str,
}

// === impl ProberMetrics ===

impl ProberMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let probes = Family::<ResultLabels, Counter>::default();
        reg.register(
            "probes",
            "Count of ingress probes by result",
            probes.clone(),
        );

        let probe_duration = Histogram::new(exponential_buckets(0.001, 2.0, 12));
        reg.register(
            "probe_duration_seconds",
            "Time taken by ingress probes that received a response or failed",
            probe_duration.clone(),
        );

        let ready = Counter::default();
        reg.register(
            "ingresses_ready",
            "Count of ingress versions that became ready",
            ready.clone(),
        );

        let cancellations = Family::<ScopeLabels, Counter>::default();
        reg.register(
            "cancellations",
            "Count of probing cancellations by scope",
            cancellations.clone(),
        );

        Self {
            probes,
            probe_duration,
            ready,
            cancellations,
        }
    }

    pub(crate) fn probed(&self, result: ProbeResult, elapsed: time::Duration) {
        self.probe_duration.observe(elapsed.as_secs_f64());
        self.probes
            .get_or_create(&ResultLabels {
                result: result.as_str(),
            })
            .inc();
    }

    pub(crate) fn ready(&self) {
        self.ready.inc();
    }

    pub(crate) fn cancelled(&self, scope: Scope) {
        self.cancellations
            .get_or_create(&ScopeLabels {
                scope: scope.as_str(),
            })
            .inc();
    }
}

impl ProbeResult {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Mismatch => "mismatch",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Ingress => "ingress",
            Self::Superseded => "superseded",
            Self::Expired => "expired",
        }
    }
}
