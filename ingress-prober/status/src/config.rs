use linkerd_ingress_prober_core::PROBER_USER_AGENT;
use tokio::time::Duration;

/// Tunes the prober's concurrency, retries, and state retention.
#[derive(Clone, Debug)]
pub struct ProberConfig {
    /// Bounds the number of probes in flight at once.
    pub workers: usize,

    /// Bounds each individual probe request, including connection establishment.
    pub probe_timeout: Duration,

    /// The delay before a target is probed again after its first failure. The delay doubles with
    /// every consecutive failure.
    pub initial_backoff: Duration,

    pub max_backoff: Duration,

    /// The state of a ready ingress that hasn't been checked for this long is discarded.
    pub state_expiration: Duration,

    /// How often expired ingress state is discarded.
    pub cleanup_interval: Duration,

    pub user_agent: String,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            workers: 15,
            probe_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            state_expiration: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
            user_agent: PROBER_USER_AGENT.to_string(),
        }
    }
}
