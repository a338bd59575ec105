//! # Queue-Relay Service
//!
//! Binary entry point for the Queue-Relay HTTP service.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Builds the queue provider for the configured broker
//! - Starts the HTTP server from queue-relay-api

use queue_relay_api::{start_server, LoggingConfig, ServiceConfig};
use queue_runtime::QueueClientFactory;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Loaded before logging is initialised so the configured level applies.
    // A load failure is reported once logging is up, with default settings.
    // -------------------------------------------------------------------------
    let loaded = ServiceConfig::load();
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();

    init_tracing(&logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Queue-Relay Service");

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(
                error = %e,
                "Could not load service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    // Missing broker settings stop the service here, not on the first request
    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let provider = match QueueClientFactory::create_provider(service_config.provider_config()).await
    {
        Ok(provider) => provider,
        Err(e) => {
            error!(error = %e, "Failed to create queue provider; aborting");
            std::process::exit(3);
        }
    };

    info!(
        provider = %provider.provider_type(),
        queue = %service_config.service_bus.queue_name,
        host = %service_config.server.host,
        port = service_config.server.port,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(service_config, provider).await {
        error!("Failed to start server: {}", e);
        std::process::exit(e.exit_code());
    }

    Ok(())
}

/// Install the global subscriber, `RUST_LOG` taking precedence over configuration
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    let registry = tracing_subscriber::registry().with(filter);

    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
