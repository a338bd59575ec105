//! In-memory queue provider implementation for testing and development.
//!
//! This module provides an in-memory sink that:
//! - Keeps published messages per queue in FIFO order
//! - Enforces a per-queue capacity limit
//! - Provides thread-safe concurrent access
//! - Lets tests and local runs inspect what was published
//!
//! This provider is intended for:
//! - Unit and integration testing of publishers
//! - Running the service locally without a broker

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, Timestamp};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, VecDeque<StoredMessage>>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }
}

/// A message as it was accepted by the in-memory queue
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub enqueued_at: Timestamp,
}

impl StoredMessage {
    fn from_message(message: &Message) -> Self {
        Self {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            content_type: message.content_type.clone(),
            correlation_id: message.correlation_id.clone(),
            enqueued_at: Timestamp::now(),
        }
    }

    /// Body decoded as UTF-8, lossy for non-text payloads
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
        }
    }

    /// Snapshot of the messages currently held for a queue, oldest first
    pub fn messages(&self, queue: &QueueName) -> Vec<StoredMessage> {
        let storage = self
            .storage
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        storage
            .queues
            .get(queue)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages currently held for a queue
    pub fn message_count(&self, queue: &QueueName) -> usize {
        let storage = self
            .storage
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        storage.queues.get(queue).map_or(0, VecDeque::len)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let max_size = ProviderType::InMemory.max_message_size();
        if message.size() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.size(),
                max_size,
            });
        }

        let mut storage = self.storage.write().map_err(|_| QueueError::ProviderError {
            provider: "InMemory".to_string(),
            code: "StoragePoisoned".to_string(),
            message: "In-memory queue storage lock was poisoned".to_string(),
        })?;

        let max_queue_size = storage.config.max_queue_size;
        let messages = storage.queues.entry(queue.clone()).or_default();

        if messages.len() >= max_queue_size {
            return Err(QueueError::ProviderError {
                provider: "InMemory".to_string(),
                code: "QuotaExceeded".to_string(),
                message: format!(
                    "Queue '{}' is full ({} messages)",
                    queue, max_queue_size
                ),
            });
        }

        let stored = StoredMessage::from_message(message);
        let message_id = stored.message_id.clone();
        messages.push_back(stored);

        debug!(
            queue = %queue,
            message_id = %message_id,
            depth = messages.len(),
            "Message stored in memory"
        );

        Ok(message_id)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
