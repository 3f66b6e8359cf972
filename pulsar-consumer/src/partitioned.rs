use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::FlowConfig;
use crate::consumer::{Consumer, SingleConsumer};
use crate::drain::AsyncErrorDrain;
use crate::flow::FlowController;
use crate::handler::PayloadHandler;

/// One logical consumer over every partition of a partitioned topic.
///
/// Each partition gets its own receive task, all feeding the same handler. A shared
/// [`FlowController`] caps how many messages the whole group handles per period.
pub struct PartitionedConsumer {
    topic: String,
    members: Vec<Arc<SingleConsumer>>,
    flow: FlowConfig,
    stopped: CancellationToken,
    stopping: AtomicBool,
    errors: AsyncErrorDrain,
}

impl PartitionedConsumer {
    /// `stopped` must be the token the members' stop tokens were derived from.
    pub(crate) fn new(
        topic: &str,
        members: Vec<SingleConsumer>,
        flow: FlowConfig,
        stopped: CancellationToken,
        errors: AsyncErrorDrain,
    ) -> Self {
        Self {
            topic: topic.to_owned(),
            members: members.into_iter().map(Arc::new).collect(),
            flow,
            stopped,
            stopping: AtomicBool::new(false),
            errors,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partitions(&self) -> usize {
        self.members.len()
    }

    pub fn flow(&self) -> FlowConfig {
        self.flow
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

#[async_trait]
impl Consumer for PartitionedConsumer {
    async fn receive_and_handle(
        &self,
        shutdown: CancellationToken,
        handler: Arc<dyn PayloadHandler>,
    ) {
        let flow = Arc::new(FlowController::new(&self.topic, self.flow));
        let ticker_stop = self.stopped.child_token();

        let ticker = {
            let flow = flow.clone();
            let ticker_stop = ticker_stop.clone();
            tokio::spawn(async move { flow.run(ticker_stop).await })
        };

        info!(
            topic = %self.topic,
            partitions = self.members.len(),
            flow_period_seconds = self.flow.flow_period_seconds.get(),
            flow_permit = self.flow.flow_permit.get(),
            "starting partitioned receive loops"
        );

        let mut loops = JoinSet::new();
        for member in &self.members {
            let member = member.clone();
            let shutdown = shutdown.clone();
            let handler = handler.clone();
            let flow = flow.clone();
            loops.spawn(async move {
                member
                    .run(&shutdown, handler.as_ref(), Some(flow.as_ref()))
                    .await
            });
        }

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(topic = %self.topic, error = %e, "partition receive loop failed");
            }
        }

        ticker_stop.cancel();
        if let Err(e) = ticker.await {
            error!(topic = %self.topic, error = %e, "flow ticker failed");
        }
        info!(topic = %self.topic, "partitioned receive loops exited");
    }

    async fn stop(&self) {
        // Cancelling the group token cancels every member's token too, so running loops
        // start winding down before any subscription is released.
        self.stopped.cancel();

        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        for member in &self.members {
            member.stop().await;
        }
        self.errors.close().await;
        info!(topic = %self.topic, "partitioned consumer stopped");
    }

    fn topics(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|member| member.topic().to_owned())
            .collect()
    }
}
