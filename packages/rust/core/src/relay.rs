use std::sync::Arc;

use jobrelay_shared::{Publisher, RelayError, ResponseEnvelope, Result};
use tracing::{debug, instrument};

/// Publishes response envelopes to the outbound channel.
#[derive(Clone)]
pub struct Relay {
    publisher: Arc<dyn Publisher>,
    channel: String,
}

impl Relay {
    pub fn new(publisher: Arc<dyn Publisher>, channel: impl Into<String>) -> Self {
        Self {
            publisher,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[instrument(skip_all, fields(channel = %self.channel, status = envelope.status()))]
    pub async fn publish(&self, envelope: &ResponseEnvelope) -> Result<()> {
        let message = serde_json::to_value(envelope)
            .map_err(|e| RelayError::validation(format!("unserializable envelope: {e}")))?;
        self.publisher.publish(&self.channel, &message).await?;
        debug!(request_id = envelope.request_id(), "envelope relayed");
        Ok(())
    }
}
