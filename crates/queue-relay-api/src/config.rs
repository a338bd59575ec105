//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use queue_runtime::{
    providers::ServiceBusConnectionString, AzureServiceBusConfig, InMemoryConfig, ProviderConfig,
    QueueName,
};
use serde::Deserialize;
use std::fmt;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "QR_CONFIG_FILE";

/// Prefix of configuration environment variables, e.g. `QR__SERVER__PORT`
pub const ENV_PREFIX: &str = "QR";

/// System-wide configuration file, extension resolved by the loader
const SYSTEM_CONFIG_FILE: &str = "/etc/queue-relay/service";

/// Deployment-local configuration file, extension resolved by the loader
const LOCAL_CONFIG_FILE: &str = "config/service";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Service configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Queue broker settings, also read from the `ServiceBus` section
    #[serde(alias = "ServiceBus", alias = "servicebus")]
    pub service_bus: ServiceBusSettings,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from files and environment
    ///
    /// Sources, later ones overriding earlier ones:
    /// 1. `/etc/queue-relay/service.yaml`
    /// 2. `config/service.yaml`
    /// 3. the file named by `QR_CONFIG_FILE`, which must exist when set; its
    ///    extension selects the format (`.yaml`, `.toml` or `.json`)
    /// 4. environment variables prefixed `QR__`, e.g.
    ///    `QR__SERVICE_BUS__QUEUE_NAME=orders`
    ///
    /// The broker settings are also accepted under the `ServiceBus` section
    /// names, e.g. `ServiceBus: { ConnectionString, QueueName }` or
    /// `QR__SERVICEBUS__QUEUENAME=orders`.
    ///
    /// Absent files are skipped. A malformed file or a value that cannot be
    /// coerced to its field type is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name(SYSTEM_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name(LOCAL_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Ok(explicit_path) = std::env::var(CONFIG_FILE_ENV) {
            if !explicit_path.is_empty() {
                info!(path = %explicit_path, "Loading configuration from explicit path");
                builder = builder.add_source(
                    config::File::with_name(&explicit_path).required(true),
                );
            }
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the configuration before the service starts
    ///
    /// Missing broker settings are fatal here rather than on the first
    /// request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service_bus.validate()?;

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "logging.level '{}' is not one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        Ok(())
    }

    /// Build the shared queue endpoint
    pub fn endpoint_config(&self) -> Result<QueueEndpointConfig, ConfigError> {
        let queue_name =
            QueueName::new(self.service_bus.queue_name.clone()).map_err(|e| ConfigError::Invalid {
                message: format!("service_bus.queue_name: {}", e),
            })?;

        Ok(QueueEndpointConfig::new(
            self.service_bus.connection_string.clone(),
            queue_name,
        ))
    }

    /// Build the provider configuration for the queue runtime
    pub fn provider_config(&self) -> ProviderConfig {
        match self.service_bus.provider {
            ProviderKind::AzureServiceBus => {
                let mut azure =
                    AzureServiceBusConfig::new(self.service_bus.connection_string.clone());
                azure.request_timeout_seconds = self.service_bus.request_timeout_seconds;
                ProviderConfig::AzureServiceBus(azure)
            }
            ProviderKind::InMemory => ProviderConfig::InMemory(InMemoryConfig::default()),
        }
    }
}

/// Queue backend selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    AzureServiceBus,
    InMemory,
}

/// Queue broker settings (`ServiceBus:ConnectionString`, `ServiceBus:QueueName`)
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServiceBusSettings {
    /// Backend to publish to
    pub provider: ProviderKind,

    /// Broker connection string, not needed for the in-memory backend
    #[serde(alias = "ConnectionString", alias = "connectionstring")]
    pub connection_string: String,

    /// Queue every message is published to
    #[serde(alias = "QueueName", alias = "queuename")]
    pub queue_name: String,

    /// Timeout of a single broker request in seconds
    pub request_timeout_seconds: u64,
}

impl ServiceBusSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "service_bus.queue_name".to_string(),
            });
        }

        QueueName::new(self.queue_name.clone()).map_err(|e| ConfigError::Invalid {
            message: format!("service_bus.queue_name: {}", e),
        })?;

        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "service_bus.request_timeout_seconds must be greater than zero"
                    .to_string(),
            });
        }

        if self.provider == ProviderKind::AzureServiceBus {
            if self.connection_string.trim().is_empty() {
                return Err(ConfigError::Missing {
                    key: "service_bus.connection_string".to_string(),
                });
            }

            // The parse error never echoes the connection string itself
            self.connection_string
                .parse::<ServiceBusConnectionString>()
                .map_err(|e| ConfigError::Invalid {
                    message: format!("service_bus.connection_string: {}", e),
                })?;
        }

        Ok(())
    }
}

impl Default for ServiceBusSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            connection_string: String::new(),
            queue_name: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

impl fmt::Debug for ServiceBusSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusSettings")
            .field("provider", &self.provider)
            .field("connection_string", &"<REDACTED>")
            .field("queue_name", &self.queue_name)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Serve the OpenAPI document at `/openapi/v1.json`, for development
    pub expose_openapi: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            expose_openapi: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        format!(
            "queue_relay_service={level},queue_relay_api={level},queue_runtime={level},tower_http=debug"
        )
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Queue endpoint shared by every request
///
/// Built once at start-up and never mutated.
#[derive(Clone)]
pub struct QueueEndpointConfig {
    pub connection_string: String,
    pub queue_name: QueueName,
}

impl QueueEndpointConfig {
    pub fn new(connection_string: String, queue_name: QueueName) -> Self {
        Self {
            connection_string,
            queue_name,
        }
    }
}

impl fmt::Debug for QueueEndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEndpointConfig")
            .field("connection_string", &"<REDACTED>")
            .field("queue_name", &self.queue_name)
            .finish()
    }
}
