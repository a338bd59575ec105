//! # Queue Runtime
//!
//! Provider-agnostic queue publishing for Azure Service Bus and an in-memory
//! sink used by tests and local runs.
//!
//! This library provides:
//! - A single `QueueProvider` seam for sending messages
//! - Azure Service Bus publishing over the REST API with SAS authentication
//! - Validated queue names and message identifiers
//! - Error classification into transient and permanent failures
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures and identifiers
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Provider trait and factory
//! - [`providers`] - Concrete provider implementations

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::{QueueClientFactory, QueueProvider};
pub use error::{ConfigurationError, QueueError, ValidationError};
pub use message::{Message, MessageId, QueueName, Timestamp};
pub use provider::{AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::{AzureServiceBusProvider, InMemoryProvider, StoredMessage};
