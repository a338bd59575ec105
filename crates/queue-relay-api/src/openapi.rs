//! OpenAPI document for the HTTP surface

use crate::{ErrorResponse, HealthResponse, SendRequest};
use axum::response::Json;
use utoipa::OpenApi;

#[cfg(test)]
#[path = "openapi_tests.rs"]
mod tests;

/// Route of the generated document
pub const OPENAPI_PATH: &str = "/openapi/v1.json";

/// OpenAPI description of `POST /send` and `GET /health`
#[derive(OpenApi)]
#[openapi(
    info(title = "Queue Relay", description = "Publishes text messages to a Service Bus queue"),
    paths(crate::handle_send, crate::handle_health_check),
    components(schemas(SendRequest, HealthResponse, ErrorResponse)),
    tags(
        (name = "messages", description = "Message publishing"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub(crate) async fn handle_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
