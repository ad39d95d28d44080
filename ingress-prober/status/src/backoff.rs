use rand::Rng;
use tokio::time::Duration;

/// Exponential backoff with jitter.
///
/// The nth consecutive failure waits between half of and the full `initial * 2^(n-1)`, capped at
/// `max`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub(crate) fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let ceiling = self.initial.saturating_mul(1 << exponent).min(self.max);
        let floor = ceiling / 2;
        if floor.is_zero() {
            return ceiling;
        }
        floor + rand::thread_rng().gen_range(Duration::ZERO..=ceiling - floor)
    }
}
