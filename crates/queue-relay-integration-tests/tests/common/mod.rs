//! Common test utilities for queue-relay-api integration tests
//!
//! This module provides:
//! - Mock queue providers (recording, failing)
//! - Router builders for in-memory, mock and wiremock-backed brokers
//! - Request helpers for `POST /send`

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use queue_relay_api::{create_router, AppState, QueueEndpointConfig};
use queue_runtime::{
    AzureServiceBusConfig, Message, MessageId, ProviderConfig, ProviderType, QueueClientFactory,
    QueueError, QueueName, QueueProvider,
};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tower::ServiceExt;
use wiremock::MockServer;

pub const TEST_QUEUE: &str = "test-queue";

#[allow(dead_code)]
pub fn test_queue() -> QueueName {
    QueueName::new(TEST_QUEUE.to_string()).unwrap()
}

// ============================================================================
// Mock Providers
// ============================================================================

/// Provider that records every message it is asked to send
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct RecordingProvider {
    sent: Arc<Mutex<Vec<(QueueName, Message)>>>,
    delay: Option<Duration>,
}

impl RecordingProvider {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each send, to keep requests in flight concurrently
    #[allow(dead_code)]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    #[allow(dead_code)]
    pub fn sent(&self) -> Vec<(QueueName, Message)> {
        self.sent.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|(_, message)| String::from_utf8_lossy(&message.body).into_owned())
            .collect()
    }
}

#[async_trait]
impl QueueProvider for RecordingProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        self.sent
            .lock()
            .unwrap()
            .push((queue.clone(), message.clone()));
        Ok(message.message_id.clone())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// Provider whose every send fails with a preset error
#[allow(dead_code)]
pub struct FailingProvider {
    error: Box<dyn Fn() -> QueueError + Send + Sync>,
    attempts: Arc<Mutex<usize>>,
}

impl FailingProvider {
    #[allow(dead_code)]
    pub fn new(error: impl Fn() -> QueueError + Send + Sync + 'static) -> Self {
        Self {
            error: Box::new(error),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    #[allow(dead_code)]
    pub fn unreachable() -> Self {
        Self::new(|| QueueError::ConnectionFailed {
            message: "connection refused".to_string(),
        })
    }

    #[allow(dead_code)]
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl QueueProvider for FailingProvider {
    async fn send_message(
        &self,
        _queue: &QueueName,
        _message: &Message,
    ) -> Result<MessageId, QueueError> {
        *self.attempts.lock().unwrap() += 1;
        Err((self.error)())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

// ============================================================================
// Router builders
// ============================================================================

/// Router publishing to [`TEST_QUEUE`] through `provider`
#[allow(dead_code)]
pub fn create_test_app(provider: Arc<dyn QueueProvider>) -> Router {
    let endpoint = QueueEndpointConfig::new(String::new(), test_queue());
    create_router(AppState::new(endpoint, provider))
}

/// Connection string pointing at a wiremock server posing as Service Bus
#[allow(dead_code)]
pub fn emulator_connection_string(server: &MockServer) -> String {
    format!(
        "Endpoint=sb://127.0.0.1:{}/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=dGVzdC1rZXk=;UseDevelopmentEmulator=true",
        server.address().port()
    )
}

/// Router wired to the real Azure Service Bus provider
#[allow(dead_code)]
pub async fn create_azure_app(connection_string: String) -> Router {
    let mut config = AzureServiceBusConfig::new(connection_string.clone());
    config.request_timeout_seconds = 5;

    let provider = QueueClientFactory::create_provider(ProviderConfig::AzureServiceBus(config))
        .await
        .expect("Connection string should build a provider");

    let endpoint = QueueEndpointConfig::new(connection_string, test_queue());
    create_router(AppState::new(endpoint, provider))
}

// ============================================================================
// Request helpers
// ============================================================================

/// `POST /send?message={message}`, percent-encoding the message
#[allow(dead_code)]
pub fn send_request(message: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/send?message={}", urlencoding::encode(message)))
        .body(Body::empty())
        .unwrap()
}

/// Drive one request through the router and decode the JSON response
#[allow(dead_code)]
pub async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
