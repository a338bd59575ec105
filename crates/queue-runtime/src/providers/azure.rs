//! Azure Service Bus provider implementation using the HTTP REST API.
//!
//! This module publishes messages to Azure Service Bus queues with direct
//! HTTP calls instead of an SDK, the same approach the AWS SQS provider takes:
//! - **Connection strings**: `Endpoint`, `SharedAccessKeyName`/`SharedAccessKey`
//!   or a pre-issued `SharedAccessSignature`, optional `EntityPath`, and
//!   `UseDevelopmentEmulator` for the local emulator
//! - **SAS authentication**: tokens are signed per request with HMAC-SHA256
//! - **Pooled transport**: one `reqwest` client per provider, connections are
//!   reused across sends
//! - **Error classification**: HTTP status codes are mapped onto [`QueueError`]
//!
//! Each send is a single attempt. Retrying is left to the caller.
//!
//! ## Example
//!
//! ```no_run
//! use queue_runtime::{AzureServiceBusConfig, Message, QueueName, QueueProvider};
//! use queue_runtime::providers::AzureServiceBusProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AzureServiceBusConfig::new(
//!     "Endpoint=sb://example.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=...".to_string(),
//! );
//!
//! let provider = AzureServiceBusProvider::new(config).await?;
//! let queue: QueueName = "orders".parse()?;
//! provider.send_message(&queue, &Message::text("hello")).await?;
//! # Ok(())
//! # }
//! ```

use crate::client::QueueProvider;
use crate::error::{ConfigurationError, QueueError};
use crate::message::{Message, MessageId, QueueName};
use crate::provider::{AzureServiceBusConfig, ProviderType};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument, warn};
use url::Url;
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

/// REST API version used for the send operation
const API_VERSION: &str = "2015-01";

/// Content type applied when the message does not specify one
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Service Bus error ({status}): {message}")]
    ServiceBusError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
}

impl AzureError {
    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthenticationError(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::QueueNotFound(_) => false,
            Self::AccessDenied(_) => false,
            Self::MessageTooLarge { .. } => false,
            Self::ServiceBusError { status, .. } => *status >= 500,
            Self::ConfigurationError(_) => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::AccessDenied(msg) => QueueError::PermissionDenied { operation: msg },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::ServiceBusError { status, message } => QueueError::ProviderError {
                provider: "AzureServiceBus".to_string(),
                code: status.to_string(),
                message,
            },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
        }
    }
}

// ============================================================================
// Connection String
// ============================================================================

/// Credential embedded in a connection string
#[derive(Clone)]
enum SharedAccessCredential {
    /// Named policy key used to sign a token per request
    Key {
        key_name: String,
        key: Zeroizing<String>,
    },
    /// Pre-issued token used verbatim
    Signature(Zeroizing<String>),
}

impl fmt::Debug for SharedAccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key { key_name, .. } => f
                .debug_struct("Key")
                .field("key_name", key_name)
                .field("key", &"<REDACTED>")
                .finish(),
            Self::Signature(_) => f.debug_tuple("Signature").field(&"<REDACTED>").finish(),
        }
    }
}

/// Parsed Azure Service Bus connection string
///
/// Keys are matched case-insensitively. Values may contain `=` (base64
/// padding), so each segment is split on the first `=` only.
#[derive(Debug, Clone)]
pub struct ServiceBusConnectionString {
    endpoint: Url,
    credential: SharedAccessCredential,
    entity_path: Option<String>,
    use_development_emulator: bool,
}

impl ServiceBusConnectionString {
    /// HTTP(S) base address of the namespace, always ending in `/`
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Queue bound into the connection string, if any
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    /// Name of the shared access policy, when a key is used
    pub fn key_name(&self) -> Option<&str> {
        match &self.credential {
            SharedAccessCredential::Key { key_name, .. } => Some(key_name),
            SharedAccessCredential::Signature(_) => None,
        }
    }

    /// Whether the connection string targets the local emulator
    pub fn uses_development_emulator(&self) -> bool {
        self.use_development_emulator
    }

    /// Turn the `sb://` endpoint into the HTTP base address of the namespace
    fn http_endpoint(raw: &str, use_development_emulator: bool) -> Result<Url, AzureError> {
        let parsed = Url::parse(raw.trim()).map_err(|e| {
            AzureError::ConfigurationError(format!("Endpoint is not a valid URI: {}", e))
        })?;

        let scheme = match parsed.scheme() {
            "sb" | "amqps" if use_development_emulator => "http",
            "sb" | "amqps" | "https" => "https",
            "http" => "http",
            other => {
                return Err(AzureError::ConfigurationError(format!(
                    "Unsupported endpoint scheme '{}'",
                    other
                )))
            }
        };

        let host = parsed.host_str().ok_or_else(|| {
            AzureError::ConfigurationError("Endpoint must include a host".to_string())
        })?;

        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Url::parse(&format!("{}://{}/", scheme, authority)).map_err(|e| {
            AzureError::ConfigurationError(format!("Endpoint is not a valid URI: {}", e))
        })
    }
}

impl FromStr for ServiceBusConnectionString {
    type Err = AzureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;
        let mut entity_path = None;
        let mut use_development_emulator = false;

        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                AzureError::ConfigurationError(
                    "Connection string segments must have the form Key=Value".to_string(),
                )
            })?;
            let value = value.trim().to_string();

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(Zeroizing::new(value)),
                "sharedaccesssignature" => signature = Some(Zeroizing::new(value)),
                "entitypath" => entity_path = Some(value).filter(|v| !v.is_empty()),
                "usedevelopmentemulator" => {
                    use_development_emulator = value.eq_ignore_ascii_case("true")
                }
                // Unknown keys are tolerated, as the official clients do
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            AzureError::ConfigurationError("Connection string is missing 'Endpoint'".to_string())
        })?;
        let endpoint = Self::http_endpoint(&endpoint, use_development_emulator)?;

        let credential = match (key_name, key, signature) {
            (_, _, Some(signature)) => SharedAccessCredential::Signature(signature),
            (Some(key_name), Some(key), None) if !key_name.is_empty() && !key.is_empty() => {
                SharedAccessCredential::Key { key_name, key }
            }
            _ => {
                return Err(AzureError::ConfigurationError(
                    "Connection string requires SharedAccessKeyName and SharedAccessKey, or SharedAccessSignature"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            endpoint,
            credential,
            entity_path,
            use_development_emulator,
        })
    }
}

// ============================================================================
// SAS Token Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Build the `Authorization` header value for a resource
///
/// Token format:
/// `SharedAccessSignature sr={uri}&sig={signature}&se={expiry}&skn={key_name}`
/// where the signature is `base64(HMAC-SHA256(key, "{uri}\n{expiry}"))` and
/// `{uri}` is the URL-encoded, lower-cased resource URI.
fn sas_authorization(
    credential: &SharedAccessCredential,
    resource_uri: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String, AzureError> {
    let (key_name, key) = match credential {
        SharedAccessCredential::Signature(signature) => return Ok(signature.to_string()),
        SharedAccessCredential::Key { key_name, key } => (key_name, key),
    };

    let encoded_uri = urlencoding::encode(&resource_uri.to_lowercase()).into_owned();
    let expiry = (now + ttl).timestamp();
    let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| {
        AzureError::ConfigurationError(format!("Shared access key is unusable: {}", e))
    })?;
    mac.update(string_to_sign.as_bytes());
    let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expiry,
        urlencoding::encode(key_name)
    ))
}

/// System properties sent in the `BrokerProperties` header
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties<'a> {
    message_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

// ============================================================================
// Azure Service Bus Provider
// ============================================================================

/// Azure Service Bus queue provider implementation
///
/// Holds only immutable data and a pooled HTTP client, so one instance is
/// shared by all concurrent senders.
#[derive(Debug)]
pub struct AzureServiceBusProvider {
    http_client: HttpClient,
    connection: ServiceBusConnectionString,
    config: AzureServiceBusConfig,
}

impl AzureServiceBusProvider {
    /// Create new Azure Service Bus provider
    ///
    /// No network traffic happens here; an unreachable namespace or a wrong
    /// key only surfaces on the first send.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::ConfigurationError`] if the connection string
    /// cannot be parsed, and [`AzureError::NetworkError`] if the HTTP client
    /// cannot be built.
    pub async fn new(config: AzureServiceBusConfig) -> Result<Self, AzureError> {
        let connection: ServiceBusConnectionString = config.connection_string.parse()?;

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AzureError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            endpoint = %connection.endpoint(),
            entity_path = ?connection.entity_path(),
            emulator = connection.uses_development_emulator(),
            "Azure Service Bus provider configured"
        );

        Ok(Self {
            http_client,
            connection,
            config,
        })
    }

    /// Parsed connection details
    pub fn connection(&self) -> &ServiceBusConnectionString {
        &self.connection
    }

    /// Resource URI the SAS token is scoped to
    fn resource_uri(&self, queue: &QueueName) -> String {
        format!("{}{}", self.connection.endpoint(), queue)
    }

    /// Address of the send operation for a queue
    ///
    /// The queue name is appended segment by segment so it can only extend
    /// the endpoint path.
    fn messages_url(&self, queue: &QueueName) -> Result<Url, AzureError> {
        let mut url = self.connection.endpoint().clone();
        url.path_segments_mut()
            .map_err(|_| {
                AzureError::ConfigurationError(format!(
                    "Endpoint '{}' cannot carry a queue path",
                    self.connection.endpoint()
                ))
            })?
            .pop_if_empty()
            .extend(queue.segments())
            .push("messages");

        url.query_pairs_mut()
            .append_pair("api-version", API_VERSION)
            .append_pair("timeout", &self.config.request_timeout_seconds.to_string());

        Ok(url)
    }

    /// Reject sends to a queue other than the one bound in the connection string
    fn check_entity_path(&self, queue: &QueueName) -> Result<(), AzureError> {
        match self.connection.entity_path() {
            Some(entity_path) if !entity_path.eq_ignore_ascii_case(queue.as_str()) => {
                Err(AzureError::ConfigurationError(format!(
                    "Connection string is bound to '{}' but the send targets '{}'",
                    entity_path, queue
                )))
            }
            _ => Ok(()),
        }
    }

    async fn send(&self, queue: &QueueName, message: &Message) -> Result<MessageId, AzureError> {
        self.check_entity_path(queue)?;

        let max_size = ProviderType::AzureServiceBus.max_message_size();
        if message.size() > max_size {
            return Err(AzureError::MessageTooLarge {
                size: message.size(),
                max_size,
            });
        }

        let url = self.messages_url(queue)?;
        let authorization = sas_authorization(
            &self.connection.credential,
            &self.resource_uri(queue),
            Utc::now(),
            Duration::seconds(self.config.sas_token_ttl_seconds as i64),
        )?;

        let broker_properties = serde_json::to_string(&BrokerProperties {
            message_id: message.message_id.as_str(),
            correlation_id: message.correlation_id.as_deref(),
        })
        .map_err(|e| {
            AzureError::ConfigurationError(format!("Failed to encode broker properties: {}", e))
        })?;

        let response = self
            .http_client
            .post(url)
            .header("Authorization", authorization)
            .header(
                "Content-Type",
                message.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
            )
            .header("BrokerProperties", broker_properties)
            .body(message.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AzureError::Timeout(Duration::seconds(self.config.request_timeout_seconds as i64))
                } else if e.is_connect() {
                    AzureError::NetworkError(format!("Connection failed: {}", e))
                } else if e.is_builder() {
                    AzureError::ConfigurationError(format!("Invalid request: {}", e))
                } else {
                    AzureError::NetworkError(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(message.message_id.clone());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error_response(status, &body, queue, message.size()))
    }
}

#[async_trait]
impl QueueProvider for AzureServiceBusProvider {
    #[instrument(skip(self, message), fields(
        queue = %queue,
        message_id = %message.message_id,
        size = message.size()
    ))]
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        match self.send(queue, message).await {
            Ok(message_id) => {
                debug!("Message accepted by Service Bus");
                Ok(message_id)
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Service Bus send failed");
                Err(e.to_queue_error())
            }
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

// ============================================================================
// Response Handling
// ============================================================================

/// Map a non-success response onto an [`AzureError`]
fn classify_error_response(
    status: StatusCode,
    body: &str,
    queue: &QueueName,
    size: usize,
) -> AzureError {
    let detail = parse_error_detail(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    });

    match status {
        StatusCode::UNAUTHORIZED => AzureError::AuthenticationError(detail),
        StatusCode::FORBIDDEN => AzureError::AccessDenied(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE => AzureError::QueueNotFound(queue.to_string()),
        StatusCode::PAYLOAD_TOO_LARGE => AzureError::MessageTooLarge {
            size,
            max_size: ProviderType::AzureServiceBus.max_message_size(),
        },
        _ => AzureError::ServiceBusError {
            status: status.as_u16(),
            message: detail,
        },
    }
}

/// Extract the `<Detail>` text from a Service Bus XML error body
///
/// Error bodies look like
/// `<Error><Code>401</Code><Detail>...</Detail></Error>`.
fn parse_error_detail(xml: &str) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_detail = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Detail" => {
                in_detail = true;
            }
            Ok(Event::Text(e)) if in_detail => {
                return e
                    .unescape()
                    .ok()
                    .map(|s| s.into_owned())
                    .filter(|s| !s.is_empty());
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    None
}
