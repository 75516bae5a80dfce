//! Scripted transport shared by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arcstr::ArcStr;
use async_trait::async_trait;
use bytes::Bytes;
use mqtt_topic_router::advanced::{
	InboundMessage, Transport, TransportError, TransportEvent,
	TransportFactory, WireSubscription,
};
use mqtt_topic_router::client::ConnectionConfig;
use mqtt_topic_router::QoS;
use tokio::sync::mpsc;

/// Operation recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Connect,
	Subscribe(Vec<WireSubscription>),
	Publish {
		topic: String,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	},
	Disconnect,
	Close,
}

pub struct MockTransport {
	server_uris: Vec<ArcStr>,
	reconnect_delay: Duration,
	connect_delay: Duration,
	connect_results: Mutex<VecDeque<Result<(), String>>>,
	fail_publish: bool,
	calls: Mutex<Vec<Call>>,
	events: mpsc::Sender<TransportEvent>,
}

impl MockTransport {
	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	pub fn connects(&self) -> usize {
		self.count(|call| matches!(call, Call::Connect))
	}

	pub fn subscriptions(&self) -> Vec<Vec<WireSubscription>> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				| Call::Subscribe(subscriptions) => Some(subscriptions),
				| _ => None,
			})
			.collect()
	}

	pub fn publishes(&self) -> Vec<Call> {
		self.calls()
			.into_iter()
			.filter(|call| matches!(call, Call::Publish { .. }))
			.collect()
	}

	pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
		self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
	}

	/// Sends `event` as if it came from the wire.
	pub async fn emit(&self, event: TransportEvent) {
		self.events.send(event).await.unwrap();
	}

	pub async fn deliver(&self, topic: &str, payload: &'static str) {
		self.emit(TransportEvent::MessageArrived(InboundMessage::new(
			topic.to_string(),
			payload,
		)))
		.await;
	}

	fn record(&self, call: Call) {
		self.calls.lock().unwrap().push(call);
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn connect(&self) -> Result<ArcStr, TransportError> {
		self.record(Call::Connect);
		if !self.connect_delay.is_zero() {
			tokio::time::sleep(self.connect_delay).await;
		}
		let next = self.connect_results.lock().unwrap().pop_front();
		match next {
			| Some(Err(reason)) => Err(TransportError::other(reason)),
			| _ => Ok(self.server_uris[0].clone()),
		}
	}

	async fn subscribe(
		&self,
		subscriptions: &[WireSubscription],
	) -> Result<(), TransportError> {
		self.record(Call::Subscribe(subscriptions.to_vec()));
		Ok(())
	}

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), TransportError> {
		self.record(Call::Publish {
			topic: topic.to_string(),
			payload,
			qos,
			retain,
		});
		if self.fail_publish {
			return Err(TransportError::NotConnected);
		}
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.record(Call::Disconnect);
		Ok(())
	}

	async fn close(&self) -> Result<(), TransportError> {
		self.record(Call::Close);
		Ok(())
	}

	fn max_reconnect_delay(&self) -> Duration {
		self.reconnect_delay
	}

	fn server_uris(&self) -> &[ArcStr] {
		&self.server_uris
	}
}

/// Creates [`MockTransport`]s and keeps every one it created.
#[derive(Default)]
pub struct MockFactory {
	scripts: Mutex<HashMap<String, VecDeque<Result<(), String>>>>,
	connect_delays: HashMap<String, Duration>,
	fail_publish: bool,
	created: Mutex<HashMap<String, Vec<Arc<MockTransport>>>>,
}

impl MockFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn failing_publish() -> Self {
		Self {
			fail_publish: true,
			..Self::default()
		}
	}

	/// Connect outcomes for the next transport of `connection_id`; once
	/// exhausted every connect succeeds.
	pub fn script(
		self,
		connection_id: &str,
		results: impl IntoIterator<Item = Result<(), &'static str>>,
	) -> Self {
		self.scripts.lock().unwrap().insert(
			connection_id.to_string(),
			results
				.into_iter()
				.map(|result| result.map_err(String::from))
				.collect(),
		);
		self
	}

	/// Every connect of `connection_id` takes `delay` before its outcome.
	pub fn slow_connect(mut self, connection_id: &str, delay: Duration) -> Self {
		self.connect_delays.insert(connection_id.to_string(), delay);
		self
	}

	/// Latest transport created for `connection_id`.
	pub fn transport(&self, connection_id: &str) -> Arc<MockTransport> {
		self.created.lock().unwrap()[connection_id]
			.last()
			.cloned()
			.unwrap()
	}

	pub fn created(&self, connection_id: &str) -> usize {
		self.created
			.lock()
			.unwrap()
			.get(connection_id)
			.map_or(0, Vec::len)
	}
}

impl TransportFactory for MockFactory {
	fn create(
		&self,
		connection_id: &str,
		config: &ConnectionConfig,
		events: mpsc::Sender<TransportEvent>,
	) -> Result<Arc<dyn Transport>, TransportError> {
		let script = self
			.scripts
			.lock()
			.unwrap()
			.remove(connection_id)
			.unwrap_or_default();
		let transport = Arc::new(MockTransport {
			server_uris: config
				.server_uris
				.iter()
				.map(|uri| ArcStr::from(uri.as_str()))
				.collect(),
			reconnect_delay: config.max_reconnect_delay(),
			connect_delay: self
				.connect_delays
				.get(connection_id)
				.copied()
				.unwrap_or_default(),
			connect_results: Mutex::new(script),
			fail_publish: self.fail_publish,
			calls: Mutex::new(Vec::new()),
			events,
		});
		self.created
			.lock()
			.unwrap()
			.entry(connection_id.to_string())
			.or_default()
			.push(transport.clone());
		Ok(transport)
	}
}

/// Lets spawned tasks run; with a paused clock the sleep is skipped
/// as soon as the runtime is idle.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn connection(uri: &str, reconnect_delay: Duration) -> ConnectionConfig {
	let mut config = ConnectionConfig::new(uri);
	config.max_reconnect_delay_millis = reconnect_delay.as_millis() as u64;
	config
}
