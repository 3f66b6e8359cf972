use async_trait::async_trait;
use base64::Engine;
use pulsar_consumer::{Message, PayloadHandler};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

const PREVIEW_LEN: usize = 64;

/// The JSON envelope events are published in. `data` carries the base64 encoded event.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub data: String,
    pub protocol: Option<u32>,
    pub pv: Option<String>,
    pub t: Option<i64>,
}

/// Unwraps event envelopes and logs a preview of what they carry.
pub struct EnvelopeHandler;

impl EnvelopeHandler {
    pub fn decode(payload: &[u8]) -> anyhow::Result<(Envelope, Vec<u8>)> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        let data = base64::engine::general_purpose::STANDARD.decode(envelope.data.as_bytes())?;
        Ok((envelope, data))
    }
}

#[async_trait]
impl PayloadHandler for EnvelopeHandler {
    async fn handle_payload(
        &self,
        _shutdown: &CancellationToken,
        message: &Message,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let (envelope, data) = Self::decode(payload)?;

        let preview: String = String::from_utf8_lossy(&data)
            .chars()
            .take(PREVIEW_LEN)
            .collect();
        info!(
            topic = %message.topic,
            message_id = %message.id,
            protocol = ?envelope.protocol,
            t = ?envelope.t,
            bytes = data.len(),
            preview = %preview,
            "decoded payload"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_envelope() {
        let data = base64::engine::general_purpose::STANDARD.encode(br#"{"devId":"dev-1"}"#);
        let payload = serde_json::json!({"data": data, "protocol": 4, "pv": "2.0", "t": 1700000000000i64})
            .to_string();

        let (envelope, decoded) = EnvelopeHandler::decode(payload.as_bytes()).unwrap();

        assert_eq!(envelope.protocol, Some(4));
        assert_eq!(envelope.pv.as_deref(), Some("2.0"));
        assert_eq!(decoded, br#"{"devId":"dev-1"}"#.to_vec());
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(EnvelopeHandler::decode(b"not json").is_err());
        assert!(EnvelopeHandler::decode(br#"{"data": "%%%"}"#).is_err());
        assert!(EnvelopeHandler::decode(br#"{"protocol": 4}"#).is_err());
    }
}
