//! Per-request message publisher.

use crate::config::QueueEndpointConfig;
use queue_runtime::{Message, MessageId, QueueError, QueueProvider};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// Publishes text messages to the configured queue
///
/// Created for each request from the shared provider and endpoint. Holds no
/// connection of its own; the provider's pooled transport is used for the
/// duration of the send and released on every exit path.
#[derive(Clone)]
pub struct QueuePublisher {
    provider: Arc<dyn QueueProvider>,
    endpoint: Arc<QueueEndpointConfig>,
}

impl QueuePublisher {
    pub fn new(provider: Arc<dyn QueueProvider>, endpoint: Arc<QueueEndpointConfig>) -> Self {
        Self { provider, endpoint }
    }

    /// Queue this publisher sends to
    pub fn endpoint(&self) -> &QueueEndpointConfig {
        &self.endpoint
    }

    /// Publish `body` as a single message, exactly one attempt
    #[instrument(skip(self, body, correlation_id), fields(
        queue = %self.endpoint.queue_name,
        provider = %self.provider.provider_type(),
        size = body.len()
    ))]
    pub async fn send_message(
        &self,
        body: &str,
        correlation_id: Option<String>,
    ) -> Result<MessageId, QueueError> {
        let mut message = Message::text(body);
        if let Some(correlation_id) = correlation_id {
            message = message.with_correlation_id(correlation_id);
        }

        let message_id = self
            .provider
            .send_message(&self.endpoint.queue_name, &message)
            .await?;

        info!(message_id = %message_id, "Sent message");
        debug!(message_id = %message_id, body = %body, "Sent message body");

        Ok(message_id)
    }
}
