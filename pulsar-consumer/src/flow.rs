use std::time;

use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FlowConfig;
use crate::metrics_consts::{FLOW_PERMITS_AVAILABLE, FLOW_WAIT_SECONDS};

/// A bucket of permits shared by every partition of a consumer group.
///
/// Each period the bucket is topped back up to `permits`; permits left over from the
/// previous period do not stack on top. Handling a message costs one permit, so at most
/// `permits` messages are handled per period. Callers that find the bucket empty wait
/// for the next tick instead of dropping anything.
pub struct FlowController {
    topic: String,
    permits: Semaphore,
    per_period: usize,
    period: time::Duration,
}

impl FlowController {
    pub fn new(topic: &str, config: FlowConfig) -> Self {
        Self {
            topic: topic.to_owned(),
            permits: Semaphore::new(0),
            per_period: config.permits(),
            period: config.period(),
        }
    }

    /// Wait for a permit and consume it. Returns false once the controller has shut down.
    pub async fn acquire(&self) -> bool {
        let start = tokio::time::Instant::now();

        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                metrics::histogram!(FLOW_WAIT_SECONDS, &self.labels())
                    .record(start.elapsed().as_secs_f64());
                true
            }
            Err(_) => false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn labels(&self) -> [(&'static str, String); 1] {
        [("topic", self.topic.clone())]
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Top the bucket back up to the per-period allowance, returning how many permits
    /// were issued.
    pub fn replenish(&self) -> usize {
        // Only the ticker adds permits, so a concurrent acquire can only leave us under
        // the cap, never over it.
        let deficit = self.per_period.saturating_sub(self.available());
        if deficit > 0 {
            self.permits.add_permits(deficit);
        }

        metrics::gauge!(FLOW_PERMITS_AVAILABLE, &self.labels()).set(self.available() as f64);
        deficit
    }

    /// Replenish permits every period until `stop` is cancelled. The first tick happens
    /// immediately. On exit the bucket is closed, waking anyone still waiting.
    pub async fn run(&self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    let issued = self.replenish();
                    debug!(topic = %self.topic, issued, per_period = self.per_period, "issued flow permits");
                }
            }
        }

        self.permits.close();
    }
}
