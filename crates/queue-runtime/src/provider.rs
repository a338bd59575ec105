//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureServiceBus => 1024 * 1024, // 1MB
            Self::InMemory => 10 * 1024 * 1024,   // 10MB
        }
    }

    /// Stable name used in logs and health output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureServiceBus => "azure_service_bus",
            Self::InMemory => "in_memory",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    AzureServiceBus(AzureServiceBusConfig),
    InMemory(InMemoryConfig),
}

/// Azure Service Bus configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AzureServiceBusConfig {
    /// Connection string with embedded credentials
    pub connection_string: String,

    /// HTTP request timeout in seconds for calls to the namespace
    pub request_timeout_seconds: u64,

    /// Lifetime of generated SAS tokens in seconds
    pub sas_token_ttl_seconds: u64,
}

impl AzureServiceBusConfig {
    /// Create configuration with default timeouts
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            request_timeout_seconds: 30,
            sas_token_ttl_seconds: 3600,
        }
    }
}

impl fmt::Debug for AzureServiceBusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureServiceBusConfig")
            .field("connection_string", &"<REDACTED>")
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("sas_token_ttl_seconds", &self.sas_token_ttl_seconds)
            .finish()
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of messages held per queue
    pub max_queue_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
