//! Provider trait and factory for queue publish operations.

use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{AzureServiceBusProvider, InMemoryProvider};
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific queue providers (Azure, in-memory)
///
/// Implementations are shared between concurrent requests, so they must not
/// hold per-send state. Each call is a single attempt; retrying is left to
/// the caller.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Factory for creating queue providers from configuration
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create a shareable provider from configuration
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConfigurationError`] when the provider
    /// configuration is unusable, e.g. a malformed connection string.
    pub async fn create_provider(
        config: ProviderConfig,
    ) -> Result<Arc<dyn QueueProvider>, QueueError> {
        let provider: Arc<dyn QueueProvider> = match config {
            ProviderConfig::InMemory(in_memory_config) => {
                Arc::new(InMemoryProvider::new(in_memory_config))
            }
            ProviderConfig::AzureServiceBus(azure_config) => Arc::new(
                AzureServiceBusProvider::new(azure_config)
                    .await
                    .map_err(|e| e.to_queue_error())?,
            ),
        };

        Ok(provider)
    }
}
