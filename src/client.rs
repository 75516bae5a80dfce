//! Router client module
//!
//! This module provides configuration, the crate-level error type, the
//! publisher and the [`MqttRouter`] facade wiring handlers to connections.

/// Router and connection configuration
pub mod config;
/// Client error types
pub mod error;
/// Typed publishing through managed connections
pub mod publisher;
/// Router facade and builder
pub mod router;

// Re-export commonly used types for convenience
pub use config::{ConfigError, ConnectionConfig, RouterConfig, RouterSettings};
pub use error::RouterError;
pub use publisher::{MqttPublisher, PublishCallback, PublishRequest};
pub use router::{MqttRouter, RouterBuilder};
