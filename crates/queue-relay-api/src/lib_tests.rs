//! Tests for the HTTP router, send handler and server lifecycle.

use super::*;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
};
use queue_runtime::{InMemoryProvider, Message, MessageId, ProviderType, QueueError, QueueName};
use tower::ServiceExt;

// ============================================================================
// Test helpers
// ============================================================================

/// Provider whose broker is never reachable
struct UnreachableProvider;

#[async_trait]
impl QueueProvider for UnreachableProvider {
    async fn send_message(
        &self,
        _queue: &QueueName,
        _message: &Message,
    ) -> Result<MessageId, QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "connection refused".to_string(),
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

fn test_queue() -> QueueName {
    QueueName::new("test-queue".to_string()).unwrap()
}

fn app_with(provider: Arc<dyn QueueProvider>) -> Router {
    let endpoint = QueueEndpointConfig::new(String::new(), test_queue());
    create_router(AppState::new(endpoint, provider))
}

fn in_memory_app() -> (Router, Arc<InMemoryProvider>) {
    let provider = Arc::new(InMemoryProvider::default());
    (app_with(provider.clone()), provider)
}

fn post_request(uri: &str) -> axum::http::request::Builder {
    Request::builder().method(Method::POST).uri(uri)
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&bytes).expect("Response body should be JSON")
}

// ============================================================================
// POST /send
// ============================================================================

mod send_endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_query_message_is_published() {
        // Arrange
        let (app, provider) = in_memory_app();

        // Act
        let response = app
            .oneshot(post_request("/send?message=hello").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_json(response).await, "Message sent: hello");

        let stored = provider.messages(&test_queue());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body_text(), "hello");
    }

    #[tokio::test]
    async fn test_percent_encoded_query_is_decoded() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send?message=hello%20world%21")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, "Message sent: hello world!");
        assert_eq!(provider.messages(&test_queue())[0].body_text(), "hello world!");
    }

    #[tokio::test]
    async fn test_empty_query_message_is_published() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(post_request("/send?message=").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, "Message sent: ");

        let stored = provider.messages(&test_queue());
        assert_eq!(stored.len(), 1);
        assert!(stored[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_json_body_message_is_published() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send")
                    .header(CONTENT_TYPE, "application/json; charset=utf-8")
                    .body(Body::from(r#"{"message":"from json"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, "Message sent: from json");
        assert_eq!(provider.messages(&test_queue())[0].body_text(), "from json");
    }

    #[tokio::test]
    async fn test_raw_text_body_is_published() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send")
                    .header(CONTENT_TYPE, "text/plain")
                    .body(Body::from("plain text"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, "Message sent: plain text");
        assert_eq!(provider.messages(&test_queue())[0].body_text(), "plain text");
    }

    #[tokio::test]
    async fn test_query_takes_precedence_over_body() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send?message=query")
                    .body(Body::from("body"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(provider.messages(&test_queue())[0].body_text(), "query");
    }

    #[tokio::test]
    async fn test_missing_message_is_rejected() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(post_request("/send").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert_eq!(provider.message_count(&test_queue()), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(provider.message_count(&test_queue()), 0);
    }

    #[tokio::test]
    async fn test_non_utf8_body_is_rejected() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send")
                    .body(Body::from(vec![0xff, 0xfe, 0xfd]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(provider.message_count(&test_queue()), 0);
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let provider = Arc::new(InMemoryProvider::default());
        let endpoint = QueueEndpointConfig::new(String::new(), test_queue());
        let app = create_router(AppState::new(endpoint, provider.clone()).with_max_body_size(8));

        let response = app
            .oneshot(
                post_request("/send")
                    .body(Body::from("this body is longer than eight bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(provider.message_count(&test_queue()), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_returns_generic_server_error() {
        let app = app_with(Arc::new(UnreachableProvider));

        let response = app
            .oneshot(post_request("/send?message=hello").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Failed to send message");
        assert_eq!(body["status"], 500);
        assert!(
            !body.to_string().contains("connection refused"),
            "broker details must not reach the client: {body}"
        );
    }

    #[tokio::test]
    async fn test_get_is_not_allowed() {
        let (app, _provider) = in_memory_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/send?message=hello")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

// ============================================================================
// Correlation IDs
// ============================================================================

mod correlation_tests {
    use super::*;

    #[tokio::test]
    async fn test_correlation_id_is_echoed_and_forwarded() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(
                post_request("/send?message=hello")
                    .header(CORRELATION_ID_HEADER, "req-abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "req-abc-123"
        );
        assert_eq!(
            provider.messages(&test_queue())[0].correlation_id.as_deref(),
            Some("req-abc-123")
        );
    }

    #[tokio::test]
    async fn test_correlation_id_is_generated_when_absent() {
        let (app, provider) = in_memory_app();

        let response = app
            .oneshot(post_request("/send?message=hello").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Response should carry a correlation ID")
            .to_str()
            .unwrap()
            .to_string();
        assert!(uuid::Uuid::parse_str(&header).is_ok());
        assert_eq!(
            provider.messages(&test_queue())[0].correlation_id.as_deref(),
            Some(header.as_str())
        );
    }

    #[tokio::test]
    async fn test_error_responses_carry_correlation_id() {
        let app = app_with(Arc::new(UnreachableProvider));

        let response = app
            .oneshot(
                post_request("/send?message=hello")
                    .header(CORRELATION_ID_HEADER, "req-failed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "req-failed"
        );
    }
}

// ============================================================================
// Health and routing
// ============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_provider_and_queue() {
        let (app, _provider) = in_memory_app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["provider"], "in_memory");
        assert_eq!(body["queue"], "test-queue");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_unknown_route_returns_not_found() {
        let (app, _provider) = in_memory_app();

        let response = app
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// ============================================================================
// GET /openapi/v1.json
// ============================================================================

mod openapi_route_tests {
    use super::*;

    fn openapi_request() -> Request<Body> {
        Request::builder()
            .uri(OPENAPI_PATH)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_openapi_document_is_not_routed_by_default() {
        let (app, _) = in_memory_app();

        let response = app.oneshot(openapi_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document_is_served_when_enabled() {
        // Arrange
        let endpoint = QueueEndpointConfig::new(String::new(), test_queue());
        let state =
            AppState::new(endpoint, Arc::new(InMemoryProvider::default())).with_openapi(true);
        let app = create_router(state);

        // Act
        let response = app.oneshot(openapi_request()).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert!(doc["openapi"].as_str().unwrap().starts_with("3."));
        assert!(doc["paths"]["/send"]["post"].is_object());
        assert!(doc["paths"]["/health"]["get"].is_object());
    }
}

// ============================================================================
// Server lifecycle
// ============================================================================

mod server_tests {
    use super::*;

    fn in_memory_config(queue_name: &str) -> ServiceConfig {
        ServiceConfig {
            service_bus: ServiceBusSettings {
                provider: ProviderKind::InMemory,
                queue_name: queue_name.to_string(),
                ..ServiceBusSettings::default()
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                ..ServerConfig::default()
            },
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_signal() {
        let config = in_memory_config("test-queue");
        let listener = bind_listener(&config.server).await.unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            serve(
                listener,
                &config,
                Arc::new(InMemoryProvider::default()),
                async move {
                    let _ = shutdown_rx.await;
                },
            )
            .await
        });

        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("Server should stop after the shutdown signal")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_serve_rejects_invalid_queue_name() {
        let config = in_memory_config("");
        let listener = bind_listener(&config.server).await.unwrap();

        let result = serve(
            listener,
            &config,
            Arc::new(InMemoryProvider::default()),
            async {},
        )
        .await;

        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let result = bind_listener(&ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ServerConfig::default()
        })
        .await;

        match result {
            Err(ServiceError::BindFailed { address, .. }) => {
                assert_eq!(address, format!("127.0.0.1:{}", port))
            }
            other => panic!("Expected bind failure, got: {:?}", other.map(|_| ())),
        }
    }
}
