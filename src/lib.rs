//! # MQTT Topic Router
//!
//! Client-side routing layer for MQTT: handlers declare topic templates with
//! named parameters, the router merges them into a small set of wire
//! subscriptions per connection, keeps connections alive and invokes the
//! handlers with typed arguments when messages arrive.
//!
//! ## Features
//!
//! - **Topic templates**: `sensors/{zone}/{id}` style templates compiled to
//!   wire filters (`sensors/+/+`) and parameter extractors
//! - **Subscription merging**: overlapping filters with equal QoS collapse
//!   into the widest one before subscribing
//! - **Managed connections**: several named connections, fixed-delay
//!   reconnect, resubscribe after transparent reconnects
//! - **Typed binding**: payloads decoded through pluggable serializers,
//!   path values converted to the argument type
//! - **Shared subscriptions**: `$share/{group}/` or `$queue/` rewrites,
//!   pluggable per broker
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt_topic_router::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> mqtt_topic_router::Result<()> {
//!     let config = RouterConfig::default()
//!         .with_connection("plant", ConnectionConfig::new("tcp://localhost:1883"));
//!
//!     let router = MqttRouter::builder(config)
//!         .handler(
//!             HandlerDefinition::new("sensors", "on_reading", |args| {
//!                 let id = args.get::<u32>(0).copied();
//!                 let value = args.get::<f64>(1).copied();
//!                 println!("sensor {id:?} reported {value:?}");
//!                 Ok(())
//!             })
//!             .topic("sensors/{zone}/{id}")
//!             .qos(QoS::AtLeastOnce)
//!             .argument(ArgumentSpec::path::<u32>("id").required())
//!             .argument(ArgumentSpec::payload::<f64>("value")),
//!         )
//!         .build();
//!
//!     router.start().await;
//!     router.publisher().send("sensors/west/7", 23.5f64).await?;
//!     router.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Topic templates
//!
//! - `+` matches a single topic level, `#` the remaining levels
//! - `{name}` captures one level; the captured text is bound to path
//!   arguments named `name`
//! - Templates are sorted by specificity inside a handler: the more
//!   parameters, the earlier a template is tried

#![warn(missing_docs)]

// Core modules
pub mod client;
pub mod connection;
pub mod message_serializer;
pub mod routing;
pub mod topic;
pub mod transport;

// === Core Public API ===
pub use client::{
	ConnectionConfig, MqttPublisher, MqttRouter, PublishRequest, RouterConfig,
	RouterError,
};
pub use connection::{ConnectionManager, ConnectionState};

// Message serialization
#[cfg(feature = "json")]
pub use message_serializer::JsonSerializer;
pub use message_serializer::{
	BincodeSerializer, BytesSerializer, MessageSerializer, TextSerializer,
};

// Handler registration
pub use routing::{
	ArgumentSpec, Arguments, DispatchOutcome, HandlerDefinition, HandlerError,
	Placeholders,
};

// Essential external types
pub use rumqttc::QoS;

// Topic pattern types
pub use topic::{TopicPattern, TopicPatternError};

/// Result type alias for operations that may fail with RouterError
pub type Result<T> = std::result::Result<T, RouterError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_topic_router::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most router applications

	pub use crate::{
		ArgumentSpec, Arguments, ConnectionConfig, HandlerDefinition,
		HandlerError, MessageSerializer, MqttPublisher, MqttRouter,
		PublishRequest, QoS, Result, RouterConfig, RouterError,
	};
}

/// Types for custom transports, codecs and routing internals
///
/// ```rust
/// use mqtt_topic_router::advanced::*;
/// ```
pub mod advanced {
	//! Advanced types for complex use cases

	pub use crate::connection::{
		ConnectionHandle, ConnectionRegistry, ReconnectScheduler,
	};
	pub use crate::routing::{
		ArgumentKind, Dispatcher, HandlerRegistration, OwnerIdentity,
		PathConversions, PayloadCodecs, StringConversion, SubscriptionRegistry,
		TargetType, merge_topics,
	};
	pub use crate::topic::{
		ShareGroupStrategy, SharedSubscriptionStrategy, limits, topic_filter,
		validation,
	};
	pub use crate::transport::{
		InboundMessage, Transport, TransportError, TransportEvent,
		TransportFactory, WireSubscription,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_topic_router::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::client::ConfigError;
	pub use crate::routing::{ConversionError, RegistrationError};
	pub use crate::topic::TopicError;
	pub use crate::transport::TransportError;
	pub use crate::{HandlerError, RouterError, TopicPatternError};
}
