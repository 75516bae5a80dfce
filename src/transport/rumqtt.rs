//! [`Transport`] implementation on top of rumqttc

use std::sync::Arc;
use std::time::Duration;

use arcstr::ArcStr;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::Packet::{self, Disconnect, Publish};
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, EventLoop, QoS};
use rumqttc::{Event::Incoming, Event::Outgoing, SubscribeFilter};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::{
	Transport, TransportError, TransportEvent, TransportFactory,
	WireSubscription,
};
use crate::client::config::{ConnectionConfig, RouterSettings};

struct ActiveLink {
	client: AsyncClient,
	event_loop_handle: JoinHandle<()>,
}

/// rumqttc client for one logical connection.
///
/// Every `connect` builds a fresh `AsyncClient`, tries the configured
/// brokers in order and, once a CONNACK arrives, moves the event loop into
/// a background task that forwards inbound publishes as
/// [`TransportEvent::MessageArrived`]. When the link drops the task reports
/// [`TransportEvent::ConnectionLost`] once, waits the reconnect delay
/// between polls and reports [`TransportEvent::ConnectComplete`] with
/// `reconnect: true` when the broker accepts it again.
pub struct RumqttTransport {
	connection_id: ArcStr,
	config: ConnectionConfig,
	server_uris: Vec<ArcStr>,
	event_loop_capacity: usize,
	connection_timeout_millis: u64,
	events: mpsc::Sender<TransportEvent>,
	link: Mutex<Option<ActiveLink>>,
}

impl RumqttTransport {
	/// Creates a transport; nothing is sent until `connect`.
	pub fn new(
		connection_id: &str,
		config: &ConnectionConfig,
		settings: &RouterSettings,
		events: mpsc::Sender<TransportEvent>,
	) -> Self {
		let server_uris = config
			.server_uris
			.iter()
			.map(|uri| uri.trim())
			.filter(|uri| !uri.is_empty())
			.map(ArcStr::from)
			.collect();
		Self {
			connection_id: ArcStr::from(connection_id),
			config: config.clone(),
			server_uris,
			event_loop_capacity: settings.event_loop_capacity,
			connection_timeout_millis: settings.connection_timeout_millis,
			events,
			link: Mutex::new(None),
		}
	}

	async fn client(&self) -> Result<AsyncClient, TransportError> {
		self.link
			.lock()
			.await
			.as_ref()
			.map(|link| link.client.clone())
			.ok_or(TransportError::NotConnected)
	}

	async fn connect_to(
		&self,
		server_uri: &ArcStr,
	) -> Result<(AsyncClient, EventLoop), TransportError> {
		let options = self.config.mqtt_options(&self.connection_id, server_uri)?;
		let (client, event_loop) =
			AsyncClient::new(options, self.event_loop_capacity);
		let timeout_millis = self.connection_timeout_millis;
		let event_loop = time::timeout(
			Duration::from_millis(timeout_millis),
			Self::establish_connection(event_loop),
		)
		.await
		.map_err(|_| TransportError::Timeout { timeout_millis })??;
		Ok((client, event_loop))
	}

	async fn establish_connection(
		mut event_loop: EventLoop,
	) -> Result<EventLoop, TransportError> {
		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
					if code == ConnectReturnCode::Success {
						debug!("MQTT connection established successfully");
						return Ok(event_loop);
					} else {
						debug!(code = ?code, "MQTT connection rejected by broker");
						return Err(TransportError::BrokerRejected { code });
					}
				}
				| Ok(notification) => {
					debug!(notification = ?notification, "Bootstrap phase notification");
				}
				| Err(connection_err) => {
					debug!(error = %connection_err, "MQTT connection error during bootstrap phase");
					return Err(TransportError::Network(connection_err));
				}
			}
		}
	}

	/// Forwards broker traffic until the client disconnects or nobody
	/// listens to the events anymore.
	async fn run(
		mut event_loop: EventLoop,
		connection_id: ArcStr,
		server_uri: ArcStr,
		events: mpsc::Sender<TransportEvent>,
		reconnect_delay: Duration,
	) {
		let mut link_up = true;
		loop {
			let event = match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck {
					code: ConnectReturnCode::Success,
					..
				}))) if !link_up => {
					link_up = true;
					info!(client_id = %connection_id, server_uri = %server_uri, "MQTT link restored");
					Some(TransportEvent::ConnectComplete {
						reconnect: true,
						server_uri: server_uri.clone(),
					})
				}
				| Ok(Incoming(Publish(p))) => {
					debug!(client_id = %connection_id, topic = %p.topic, payload_size = p.payload.len(), "Received MQTT message");
					Some(TransportEvent::MessageArrived(p.into()))
				}
				| Ok(Incoming(Disconnect)) => {
					info!(client_id = %connection_id, "Received MQTT Disconnect packet from server");
					let event = link_lost(&mut link_up, "server sent DISCONNECT");
					if let Some(event) = event {
						if events.send(event).await.is_err() {
							break;
						}
					}
					time::sleep(reconnect_delay).await;
					None
				}
				| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
					info!(client_id = %connection_id, "Sent MQTT Disconnect packet to server");
					break;
				}
				| Ok(notification) => {
					debug!(client_id = %connection_id, notification = ?notification, "Received OTHER MQTT notification");
					None
				}
				| Err(err) => {
					if link_up {
						warn!(client_id = %connection_id, error = %err, "MQTT link lost");
					} else {
						debug!(client_id = %connection_id, error = %err, "MQTT reconnect attempt failed");
					}
					let event = link_lost(&mut link_up, err.to_string());
					if let Some(event) = event {
						if events.send(event).await.is_err() {
							break;
						}
					}
					time::sleep(reconnect_delay).await;
					None
				}
			};
			if let Some(event) = event {
				if events.send(event).await.is_err() {
					debug!(client_id = %connection_id, "Event receiver dropped, stopping MQTT event loop");
					break;
				}
			}
		}
		info!(client_id = %connection_id, "MQTT event loop terminated");
	}
}

/// `ConnectionLost` for the first failure of an outage, `None` while the
/// link is already down.
fn link_lost(
	link_up: &mut bool,
	cause: impl Into<String>,
) -> Option<TransportEvent> {
	if !std::mem::replace(link_up, false) {
		return None;
	}
	Some(TransportEvent::ConnectionLost {
		cause: cause.into(),
	})
}

#[async_trait]
impl Transport for RumqttTransport {
	async fn connect(&self) -> Result<ArcStr, TransportError> {
		if let Some(previous) = self.link.lock().await.take() {
			previous.event_loop_handle.abort();
		}
		let mut last_error = None;
		for server_uri in &self.server_uris {
			match self.connect_to(server_uri).await {
				| Ok((client, event_loop)) => {
					let event_loop_handle = tokio::spawn(Self::run(
						event_loop,
						self.connection_id.clone(),
						server_uri.clone(),
						self.events.clone(),
						self.config.max_reconnect_delay(),
					));
					*self.link.lock().await = Some(ActiveLink {
						client,
						event_loop_handle,
					});
					return Ok(server_uri.clone());
				}
				| Err(err) => {
					warn!(client_id = %self.connection_id, server_uri = %server_uri, error = %err, "MQTT broker unreachable");
					last_error = Some(err);
				}
			}
		}
		Err(last_error.unwrap_or(TransportError::NoServers))
	}

	async fn subscribe(
		&self,
		subscriptions: &[WireSubscription],
	) -> Result<(), TransportError> {
		let client = self.client().await?;
		let filters = subscriptions.iter().map(|subscription| {
			SubscribeFilter::new(
				subscription.topic_filter.to_string(),
				subscription.qos,
			)
		});
		client.subscribe_many(filters).await?;
		Ok(())
	}

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), TransportError> {
		let client = self.client().await?;
		client.publish_bytes(topic, qos, retain, payload).await?;
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		let client = self.client().await?;
		client.disconnect().await?;
		Ok(())
	}

	async fn close(&self) -> Result<(), TransportError> {
		if let Some(link) = self.link.lock().await.take() {
			if !link.event_loop_handle.is_finished() {
				// Gives the event loop a moment to flush DISCONNECT.
				let mut handle = link.event_loop_handle;
				if time::timeout(Duration::from_secs(1), &mut handle)
					.await
					.is_err()
				{
					handle.abort();
				}
			}
		}
		Ok(())
	}

	fn max_reconnect_delay(&self) -> Duration {
		self.config.max_reconnect_delay()
	}

	fn server_uris(&self) -> &[ArcStr] {
		&self.server_uris
	}
}

impl Drop for RumqttTransport {
	fn drop(&mut self) {
		if let Some(link) = self.link.get_mut().take() {
			link.event_loop_handle.abort();
		}
	}
}

/// Creates a [`RumqttTransport`] per connection.
#[derive(Debug, Clone, Default)]
pub struct RumqttTransportFactory {
	settings: RouterSettings,
}

impl RumqttTransportFactory {
	/// Creates a factory using the router settings for channel sizes and
	/// timeouts.
	pub fn new(settings: &RouterSettings) -> Self {
		Self {
			settings: settings.clone(),
		}
	}
}

impl TransportFactory for RumqttTransportFactory {
	fn create(
		&self,
		connection_id: &str,
		config: &ConnectionConfig,
		events: mpsc::Sender<TransportEvent>,
	) -> Result<Arc<dyn Transport>, TransportError> {
		let transport =
			RumqttTransport::new(connection_id, config, &self.settings, events);
		if transport.server_uris.is_empty() {
			return Err(TransportError::NoServers);
		}
		Ok(Arc::new(transport))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn factory() -> RumqttTransportFactory {
		RumqttTransportFactory::new(&RouterSettings::default())
	}

	#[test]
	fn test_blank_uris_dropped() {
		let (events, _rx) = mpsc::channel(1);
		let config = ConnectionConfig {
			server_uris: vec![
				" tcp://a:1883 ".into(),
				"".into(),
				"tcp://b:1883".into(),
			],
			..ConnectionConfig::default()
		};
		let transport = factory().create("gw", &config, events).unwrap();
		let uris: Vec<&str> =
			transport.server_uris().iter().map(ArcStr::as_str).collect();
		assert_eq!(uris, ["tcp://a:1883", "tcp://b:1883"]);
		assert_eq!(
			transport.max_reconnect_delay(),
			config.max_reconnect_delay()
		);
	}

	#[test]
	fn test_link_lost_reported_once_per_outage() {
		let mut link_up = true;
		assert!(matches!(
			link_lost(&mut link_up, "server sent DISCONNECT"),
			Some(TransportEvent::ConnectionLost { cause }) if cause == "server sent DISCONNECT"
		));
		assert!(!link_up);
		assert!(link_lost(&mut link_up, "refused").is_none());
	}

	#[test]
	fn test_no_servers_rejected() {
		let (events, _rx) = mpsc::channel(1);
		let config = ConnectionConfig {
			server_uris: vec!["  ".into()],
			..ConnectionConfig::default()
		};
		let result = factory().create("gw", &config, events);
		assert!(matches!(result, Err(TransportError::NoServers)));
	}

	#[tokio::test]
	async fn test_operations_need_connection() {
		let (events, _rx) = mpsc::channel(1);
		let transport = RumqttTransport::new(
			"gw",
			&ConnectionConfig::new("tcp://localhost:1883"),
			&RouterSettings::default(),
			events,
		);
		let result = transport
			.publish("a/b", Bytes::from_static(b"1"), QoS::AtMostOnce, false)
			.await;
		assert!(matches!(result, Err(TransportError::NotConnected)));
		assert!(transport.close().await.is_ok());
	}
}
