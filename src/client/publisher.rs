use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;
use bytes::Bytes;
use rumqttc::QoS;
use tracing::{debug, error};

use super::error::RouterError;
use crate::connection::ConnectionRegistry;
use crate::routing::PayloadCodecs;
use crate::topic::validation;
use crate::transport::TransportError;

/// Called once the transport accepted or rejected a publish.
pub type PublishCallback =
	Box<dyn FnOnce(Result<(), TransportError>) + Send + 'static>;

/// A message to publish.
///
/// Without [`to`](Self::to) the default connection is used; without
/// [`qos`](Self::qos) the QoS comes from the connection.
pub struct PublishRequest<T> {
	connection_id: Option<ArcStr>,
	topic: String,
	payload: T,
	qos: Option<QoS>,
	retain: bool,
	callback: Option<PublishCallback>,
}

impl<T> PublishRequest<T> {
	/// Creates a non-retained request for the default connection.
	pub fn new(topic: impl Into<String>, payload: T) -> Self {
		Self {
			connection_id: None,
			topic: topic.into(),
			payload,
			qos: None,
			retain: false,
			callback: None,
		}
	}

	/// Targets connection `connection_id`.
	pub fn to(mut self, connection_id: impl Into<ArcStr>) -> Self {
		self.connection_id = Some(connection_id.into());
		self
	}

	/// Publishes with `qos`.
	pub fn qos(mut self, qos: QoS) -> Self {
		self.qos = Some(qos);
		self
	}

	/// Sets the retained flag.
	pub fn retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}

	/// Calls `callback` with the transport outcome.
	pub fn on_complete<F>(mut self, callback: F) -> Self
	where F: FnOnce(Result<(), TransportError>) + Send + 'static {
		self.callback = Some(Box::new(callback));
		self
	}
}

impl<T: fmt::Debug> fmt::Debug for PublishRequest<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PublishRequest")
			.field("connection_id", &self.connection_id)
			.field("topic", &self.topic)
			.field("payload", &self.payload)
			.field("qos", &self.qos)
			.field("retain", &self.retain)
			.field("has_callback", &self.callback.is_some())
			.finish()
	}
}

/// Publishes typed payloads through the managed connections.
///
/// Payloads are encoded with the first registered codec for their type that
/// succeeds. Transport failures are logged and reported to the request's
/// callback only; the returned `Result` covers argument and connection
/// resolution.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
	connections: Arc<ConnectionRegistry>,
	codecs: Arc<PayloadCodecs>,
}

impl MqttPublisher {
	/// Creates a publisher over `connections`.
	pub fn new(
		connections: Arc<ConnectionRegistry>,
		codecs: Arc<PayloadCodecs>,
	) -> Self {
		Self {
			connections,
			codecs,
		}
	}

	/// Publishes `payload` on `topic` through the default connection.
	pub async fn send<T: Any + Send>(
		&self,
		topic: impl Into<String>,
		payload: T,
	) -> Result<(), RouterError> {
		self.publish(PublishRequest::new(topic, payload)).await
	}

	/// Publishes `payload` on `topic` through connection `connection_id`.
	pub async fn send_to<T: Any + Send>(
		&self,
		connection_id: impl Into<ArcStr>,
		topic: impl Into<String>,
		payload: T,
	) -> Result<(), RouterError> {
		self.publish(PublishRequest::new(topic, payload).to(connection_id))
			.await
	}

	/// Publishes `request`.
	///
	/// # Errors
	///
	/// - [`RouterError::InvalidArgument`] for a blank topic
	/// - [`RouterError::Topic`] for a topic containing wildcards
	/// - [`RouterError::UnresolvedConnection`] when the target connection
	///   does not exist
	pub async fn publish<T: Any + Send>(
		&self,
		request: PublishRequest<T>,
	) -> Result<(), RouterError> {
		let PublishRequest {
			connection_id,
			topic,
			payload,
			qos,
			retain,
			callback,
		} = request;

		if topic.trim().is_empty() {
			return Err(RouterError::invalid_argument("topic must not be blank"));
		}
		validation::validate_topic_name(&topic)?;

		let (connection, qos) = match connection_id {
			| Some(id) => {
				let connection = self
					.connections
					.get(&id)
					.await
					.ok_or_else(|| RouterError::unresolved_connection(id.as_str()))?;
				let qos = qos.unwrap_or(connection.default_qos());
				(connection, qos)
			}
			| None => {
				let connection = self
					.connections
					.default_connection()
					.await
					.ok_or_else(RouterError::no_connection)?;
				let qos = match qos {
					| Some(qos) => qos,
					| None => self
						.connections
						.global_default_qos()
						.await
						.unwrap_or(connection.default_qos()),
				};
				(connection, qos)
			}
		};

		let Some(bytes) = self.codecs.encode(&payload) else {
			debug!(client_id = %connection.id(), topic = %topic, payload_type = std::any::type_name::<T>(), "No encoder produced bytes, publish skipped");
			return Ok(());
		};

		let result = connection
			.transport()
			.publish(&topic, Bytes::from(bytes), qos, retain)
			.await;
		match &result {
			| Ok(()) => {
				debug!(client_id = %connection.id(), topic = %topic, qos = ?qos, retain, "Published");
			}
			| Err(err) => {
				error!(client_id = %connection.id(), topic = %topic, error = %err, error_type = err.error_type(), "Publish failed");
			}
		}
		if let Some(callback) = callback {
			callback(result);
		}
		Ok(())
	}
}
