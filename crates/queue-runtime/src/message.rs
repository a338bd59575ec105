//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Maximum queue name length accepted by Azure Service Bus
pub const MAX_QUEUE_NAME_LENGTH: usize = 260;

/// Validated queue name
///
/// Follows the Service Bus entity naming rules: letters, digits, periods,
/// hyphens, underscores and forward slashes, starting and ending with a
/// letter or digit. A slash separates path segments and never repeats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be at most {} characters", MAX_QUEUE_NAME_LENGTH),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII letters, digits, periods, hyphens, underscores and slashes allowed"
                    .to_string(),
            });
        }

        let starts_and_ends_alphanumeric = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
            && name
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        if !starts_and_ends_alphanumeric || name.contains("//") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "must start and end with a letter or digit, without empty path segments"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Path segments of the name, split on `/`
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue system
///
/// The body is opaque to the runtime. An empty body is a valid message; any
/// limits on content are for the broker to decide.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: MessageId,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create new message with body and a freshly generated message ID
    pub fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::new(),
            body,
            content_type: None,
            correlation_id: None,
        }
    }

    /// Create a UTF-8 text message
    pub fn text(body: &str) -> Self {
        Self::new(Bytes::copy_from_slice(body.as_bytes()))
            .with_content_type("text/plain; charset=utf-8".to_string())
    }

    /// Add correlation ID for tracking
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set content type
    pub fn with_content_type(mut self, content_type: String) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Body size in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
