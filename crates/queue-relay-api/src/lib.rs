//! # Queue-Relay HTTP Service
//!
//! HTTP server that forwards text messages to a managed queue.
//!
//! This service provides:
//! - `POST /send` publishing one message per request
//! - `GET /health` reporting the configured provider and queue
//! - `GET /openapi/v1.json` describing both, when enabled
//! - Correlation IDs carried from the request to the broker message
//! - Graceful shutdown on SIGINT/SIGTERM

pub mod config;
pub mod errors;
pub mod openapi;
pub mod publisher;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

pub use config::{
    LoggingConfig, ProviderKind, QueueEndpointConfig, ServerConfig, ServiceBusSettings,
    ServiceConfig,
};
pub use errors::{ConfigError, ErrorResponse, SendMessageError, ServiceError};
pub use openapi::{ApiDoc, OPENAPI_PATH};
pub use publisher::QueuePublisher;

use axum::{
    extract::{rejection::QueryRejection, DefaultBodyLimit, Extension, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use queue_runtime::QueueProvider;
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

/// Header carrying the request correlation ID
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Queue every message is published to
    pub endpoint: Arc<QueueEndpointConfig>,

    /// Provider shared by all requests
    pub provider: Arc<dyn QueueProvider>,

    /// Maximum accepted request body in bytes
    pub max_body_size: usize,

    /// Whether the OpenAPI document is routed
    pub expose_openapi: bool,
}

impl AppState {
    /// Create new application state
    pub fn new(endpoint: QueueEndpointConfig, provider: Arc<dyn QueueProvider>) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            provider,
            max_body_size: ServerConfig::default().max_body_size,
            expose_openapi: false,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_openapi(mut self, expose_openapi: bool) -> Self {
        self.expose_openapi = expose_openapi;
        self
    }

    /// Publisher for a single request
    pub fn publisher(&self) -> QueuePublisher {
        QueuePublisher::new(Arc::clone(&self.provider), Arc::clone(&self.endpoint))
    }
}

/// Correlation ID assigned to a request by the logging middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.max_body_size;

    let mut router = Router::new()
        .route("/send", post(handle_send))
        .route("/health", get(handle_health_check));

    if state.expose_openapi {
        router = router.route(OPENAPI_PATH, get(openapi::handle_openapi));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(DefaultBodyLimit::max(max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Bind the listener for the configured host and port
pub async fn bind_listener(server: &ServerConfig) -> Result<TcpListener, ServiceError> {
    let address = format!("{}:{}", server.host, server.port);

    TcpListener::bind((server.host.as_str(), server.port))
        .await
        .map_err(|e| ServiceError::BindFailed {
            address,
            message: e.to_string(),
        })
}

/// Start HTTP server and run until SIGINT/SIGTERM
pub async fn start_server(
    config: ServiceConfig,
    provider: Arc<dyn QueueProvider>,
) -> Result<(), ServiceError> {
    let listener = bind_listener(&config.server).await?;
    serve(listener, &config, provider, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes
///
/// After `shutdown` completes no new connections are accepted. In-flight
/// requests get `server.shutdown_timeout_seconds` to finish before the
/// server stops waiting for them.
pub async fn serve<F>(
    listener: TcpListener,
    config: &ServiceConfig,
    provider: Arc<dyn QueueProvider>,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let endpoint = config.endpoint_config()?;
    let state = AppState::new(endpoint, provider)
        .with_max_body_size(config.server.max_body_size)
        .with_openapi(config.server.expose_openapi);
    let app = create_router(state);

    let local_addr = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| format!("{}:{}", config.server.host, config.server.port));

    info!(
        address = %local_addr,
        queue = %config.service_bus.queue_name,
        "Starting HTTP server"
    );

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let (signalled_tx, mut signalled_rx) = tokio::sync::watch::channel(false);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.await;
        let _ = signalled_tx.send(true);
    });

    let drain_deadline = async move {
        let signalled = signalled_rx.wait_for(|signalled| *signalled).await.is_ok();
        if !signalled {
            // Server ended without a shutdown signal
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = async move { server.await } => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = drain_deadline => {
            warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "In-flight requests did not finish before the shutdown timeout"
            );
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

// ============================================================================
// Send Handler
// ============================================================================

/// Query string of `POST /send`
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SendParams {
    /// Message to publish; takes precedence over the body
    pub message: Option<String>,
}

/// JSON body of `POST /send`
#[derive(Debug, Deserialize, ToSchema)]
pub struct SendRequest {
    pub message: String,
}

/// Publish the request's message to the configured queue
///
/// The message is read from, in order: the `message` query parameter, a JSON
/// `{"message": ...}` body, or the raw UTF-8 body. An empty string is a valid
/// message when it is given explicitly (`?message=`).
#[utoipa::path(
    post,
    path = "/send",
    operation_id = "SendMessage",
    params(SendParams),
    request_body(
        content = SendRequest,
        content_type = "application/json",
        description = "Alternative to the query parameter; a text/plain body is also accepted"
    ),
    responses(
        (status = 200, description = "Message published", body = String),
        (status = 400, description = "No message could be read from the request", body = ErrorResponse),
        (status = 500, description = "The broker did not accept the message", body = ErrorResponse)
    ),
    tag = "messages"
)]
#[instrument(skip_all, fields(correlation_id = %correlation_id.0))]
pub async fn handle_send(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    query: Result<Query<SendParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<String>, SendMessageError> {
    let Query(params) = query.map_err(|e| SendMessageError::InvalidBody {
        message: e.body_text(),
    })?;

    let message = extract_message(params, &headers, &body)?;

    state
        .publisher()
        .send_message(&message, Some(correlation_id.0))
        .await?;

    Ok(Json(format!("Message sent: {}", message)))
}

/// Read the message from the query string or body
fn extract_message(
    params: SendParams,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<String, SendMessageError> {
    if let Some(message) = params.message {
        return Ok(message);
    }

    if is_json(headers) {
        let request: SendRequest =
            serde_json::from_slice(body).map_err(|e| SendMessageError::InvalidBody {
                message: e.to_string(),
            })?;
        return Ok(request.message);
    }

    if body.is_empty() {
        return Err(SendMessageError::MissingMessage);
    }

    String::from_utf8(body.to_vec()).map_err(|_| SendMessageError::InvalidBody {
        message: "body is not valid UTF-8".to_string(),
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

// ============================================================================
// Health Check Handler
// ============================================================================

/// Basic health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is running", body = HealthResponse)),
    tag = "health"
)]
async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        provider: state.provider.provider_type().to_string(),
        queue: state.endpoint.queue_name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub provider: String,
    pub queue: String,
    pub version: String,
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware
///
/// - Assigns a correlation ID (from `x-correlation-id` or a new UUID)
/// - Logs request start and completion with structured fields
/// - Echoes the correlation ID in the response headers
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());

    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    info!(
        correlation_id = %correlation_id,
        method = %method,
        uri = %uri,
        "Request started"
    );

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}
