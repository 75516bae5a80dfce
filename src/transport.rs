//! Wire protocol seam
//!
//! The router never talks to a broker directly. A [`Transport`] is created
//! per logical connection by a [`TransportFactory`] and reports what happens
//! on the wire through [`TransportEvent`]s sent on a channel owned by the
//! connection manager. Events for one connection are consumed by a single
//! task, which also runs the message handlers.

pub mod rumqtt;

use std::sync::Arc;
use std::time::Duration;

use arcstr::ArcStr;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::client::config::ConnectionConfig;

pub use rumqtt::{RumqttTransport, RumqttTransportFactory};

/// Message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
	/// Concrete topic the message was published on
	pub topic: ArcStr,
	/// Raw payload
	pub payload: Bytes,
	/// Delivery QoS
	pub qos: QoS,
	/// Retained flag
	pub retain: bool,
	/// Duplicate delivery flag
	pub dup: bool,
}

impl InboundMessage {
	/// Creates a QoS 0, non-retained message.
	pub fn new(topic: impl Into<ArcStr>, payload: impl Into<Bytes>) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos: QoS::AtMostOnce,
			retain: false,
			dup: false,
		}
	}

	/// Sets the delivery QoS.
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Sets the retained flag.
	pub fn with_retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}

	/// Payload as UTF-8 text, if it is valid UTF-8.
	pub fn payload_str(&self) -> Option<&str> {
		std::str::from_utf8(&self.payload).ok()
	}
}

impl From<rumqttc::Publish> for InboundMessage {
	fn from(publish: rumqttc::Publish) -> Self {
		Self {
			topic: ArcStr::from(publish.topic),
			payload: publish.payload,
			qos: publish.qos,
			retain: publish.retain,
			dup: publish.dup,
		}
	}
}

/// Filter and QoS actually sent in a SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSubscription {
	/// Topic filter in wire form (shared prefix included)
	pub topic_filter: ArcStr,
	/// Requested maximum QoS
	pub qos: QoS,
}

impl WireSubscription {
	/// Creates a wire subscription.
	pub fn new(topic_filter: impl Into<ArcStr>, qos: QoS) -> Self {
		Self {
			topic_filter: topic_filter.into(),
			qos,
		}
	}
}

impl std::fmt::Display for WireSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "('{}', {})", self.topic_filter, self.qos as u8)
	}
}

/// Notification emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
	/// Handshake finished. `reconnect` is true when the transport restored
	/// a lost link on its own.
	ConnectComplete {
		/// Transparent reconnect flag
		reconnect: bool,
		/// Broker the link is established with
		server_uri: ArcStr,
	},
	/// The link went down after being established
	ConnectionLost {
		/// Human readable cause
		cause: String,
	},
	/// Inbound PUBLISH
	MessageArrived(InboundMessage),
}

/// Failures reported by the wire layer.
#[derive(Debug, Error)]
pub enum TransportError {
	/// Client request queue failure
	#[error("Client operation failed: {0}")]
	Client(#[from] rumqttc::ClientError),

	/// Broker URI could not be turned into connection options
	#[error("Invalid connection options: {0}")]
	Options(#[from] rumqttc::OptionError),

	/// Network level failure
	#[error("Network connection failed: {0}")]
	Network(#[from] rumqttc::ConnectionError),

	/// Broker answered CONNECT with an error code
	#[error("Broker rejected connection: {code:?}")]
	BrokerRejected {
		/// CONNACK return code
		code: rumqttc::ConnectReturnCode,
	},

	/// No CONNACK within the connect timeout
	#[error("Connection establishment timed out after {timeout_millis}ms")]
	Timeout {
		/// Timeout that elapsed
		timeout_millis: u64,
	},

	/// The connection has no server URI configured
	#[error("No server URI configured")]
	NoServers,

	/// Operation needs an established link
	#[error("Transport is not connected")]
	NotConnected,

	/// Anything else, mostly from custom transports
	#[error("{0}")]
	Other(String),
}

impl TransportError {
	/// Creates an error from a message
	pub fn other(message: impl Into<String>) -> Self {
		Self::Other(message.into())
	}

	/// Returns the error type for categorization
	pub fn error_type(&self) -> &'static str {
		match self {
			| TransportError::Client(_) => "client",
			| TransportError::Options(_) => "options",
			| TransportError::Network(_) => "network",
			| TransportError::BrokerRejected { .. } => "broker_rejected",
			| TransportError::Timeout { .. } => "timeout",
			| TransportError::NoServers => "no_servers",
			| TransportError::NotConnected => "not_connected",
			| TransportError::Other(_) => "other",
		}
	}
}

/// Wire protocol client bound to one logical connection.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Performs the handshake. Returns the URI of the broker that accepted
	/// the connection.
	async fn connect(&self) -> Result<ArcStr, TransportError>;

	/// Sends one SUBSCRIBE covering every filter.
	async fn subscribe(
		&self,
		subscriptions: &[WireSubscription],
	) -> Result<(), TransportError>;

	/// Publishes a message.
	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), TransportError>;

	/// Sends DISCONNECT.
	async fn disconnect(&self) -> Result<(), TransportError>;

	/// Releases every resource held by the transport.
	async fn close(&self) -> Result<(), TransportError>;

	/// Fixed delay between failed connect attempts.
	fn max_reconnect_delay(&self) -> Duration;

	/// Configured broker URIs, tried in order.
	fn server_uris(&self) -> &[ArcStr];
}

/// Creates transports for configured connections.
pub trait TransportFactory: Send + Sync {
	/// Builds a transport that reports to `events`.
	fn create(
		&self,
		connection_id: &str,
		config: &ConnectionConfig,
		events: mpsc::Sender<TransportEvent>,
	) -> Result<Arc<dyn Transport>, TransportError>;
}
