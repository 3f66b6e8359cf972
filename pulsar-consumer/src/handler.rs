use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::Message;

/// Application hook invoked once per delivered message.
///
/// A partitioned consumer calls the same handler from one task per partition, so
/// implementations must tolerate concurrent calls. Returning an error only gets logged:
/// the stream keeps going and the message is left unacknowledged for the broker to
/// redeliver.
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    async fn handle_payload(
        &self,
        shutdown: &CancellationToken,
        message: &Message,
        payload: &[u8],
    ) -> anyhow::Result<()>;
}
