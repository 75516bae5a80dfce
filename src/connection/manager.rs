//! Connection lifecycle: connect, retry, resubscribe, disconnect

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::scheduler::ReconnectScheduler;
use super::{ConnectionHandle, ConnectionRegistry, ConnectionState};
use crate::client::config::{ConnectionConfig, RouterConfig};
use crate::client::error::RouterError;
use crate::routing::{Dispatcher, SubscriptionRegistry};
use crate::topic::{ShareGroupStrategy, SharedSubscriptionStrategy};
use crate::transport::{TransportEvent, TransportFactory};

/// Everything a connect attempt or an event task needs, cheap to clone
/// into spawned tasks.
#[derive(Clone)]
struct Lifecycle {
	subscriptions: Arc<SubscriptionRegistry>,
	dispatcher: Arc<Dispatcher>,
	sharing: Arc<dyn SharedSubscriptionStrategy>,
	scheduler: Arc<ReconnectScheduler>,
}

impl Lifecycle {
	/// One connect attempt. On failure the next attempt is scheduled after
	/// the transport's reconnect delay.
	fn attempt(self, handle: Arc<ConnectionHandle>) -> BoxFuture<'static, ()> {
		async move {
			let _guard = handle.lock().await;
			match handle.state() {
				| ConnectionState::Idle | ConnectionState::ReconnectPending => {}
				| state => {
					debug!(client_id = %handle.id(), state = %state, "Connect attempt skipped");
					return;
				}
			}

			handle.set_state(ConnectionState::Connecting);
			match handle.transport().connect().await {
				| Ok(server_uri) => {
					info!(client_id = %handle.id(), server_uri = %server_uri, "Connected");
					handle.set_state(ConnectionState::Connected);
					self.subscribe(&handle).await;
				}
				| Err(err) => {
					handle.set_state(ConnectionState::ReconnectPending);
					let delay = handle.transport().max_reconnect_delay();
					warn!(
						client_id = %handle.id(),
						error = %err,
						error_type = err.error_type(),
						retry_in_millis = delay.as_millis() as u64,
						"Connect failed"
					);
					let next = self.clone().attempt(handle.clone());
					let task = self.scheduler.schedule_retry(delay, next);
					handle.set_pending_attempt(task);
				}
			}
		}
		.boxed()
	}

	/// Resolves the wire subscriptions of the connection and issues them in
	/// one SUBSCRIBE.
	async fn subscribe(&self, handle: &ConnectionHandle) {
		let sharing: Option<&dyn SharedSubscriptionStrategy> =
			if handle.sharing_enabled() {
				Some(self.sharing.as_ref())
			} else {
				None
			};
		let subscriptions = self.subscriptions.resolve(handle.id(), sharing);
		if subscriptions.is_empty() {
			warn!(client_id = %handle.id(), "No subscriptions for connection");
			return;
		}

		let summary = subscriptions
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join(", ");
		info!(client_id = %handle.id(), subscriptions = %summary, "Subscribing");
		if let Err(err) = handle.transport().subscribe(&subscriptions).await {
			error!(client_id = %handle.id(), error = %err, error_type = err.error_type(), "Subscribe failed");
		}
	}

	/// Consumes the transport events of one connection.
	async fn handle_events(
		self,
		handle: Arc<ConnectionHandle>,
		mut events: mpsc::Receiver<TransportEvent>,
	) {
		while let Some(event) = events.recv().await {
			if handle.is_closed() {
				break;
			}
			match event {
				| TransportEvent::ConnectComplete {
					reconnect: true,
					server_uri,
				} => {
					info!(client_id = %handle.id(), server_uri = %server_uri, "Connection restored");
					handle.set_state(ConnectionState::Connected);
					self.subscribe(&handle).await;
				}
				| TransportEvent::ConnectComplete { server_uri, .. } => {
					debug!(client_id = %handle.id(), server_uri = %server_uri, "Connect complete");
				}
				| TransportEvent::ConnectionLost { cause } => {
					warn!(client_id = %handle.id(), cause = %cause, "Connection lost");
					handle.set_state(ConnectionState::Connecting);
				}
				| TransportEvent::MessageArrived(message) => {
					self.dispatcher.dispatch(handle.id(), &message);
				}
			}
		}
		debug!(client_id = %handle.id(), "Transport event task finished");
	}
}

/// Drives every configured connection through its lifecycle.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use mqtt_topic_router::client::config::RouterConfig;
/// use mqtt_topic_router::connection::ConnectionManager;
/// use mqtt_topic_router::routing::{Dispatcher, SubscriptionRegistry};
/// use mqtt_topic_router::transport::RumqttTransportFactory;
///
/// # async fn run() -> mqtt_topic_router::Result<()> {
/// let config = RouterConfig::load("router.toml")?;
/// let subscriptions = Arc::new(SubscriptionRegistry::new());
/// let dispatcher = Arc::new(Dispatcher::new(subscriptions.clone()));
/// let factory = Arc::new(RumqttTransportFactory::new(&config.settings));
/// let manager =
/// 	ConnectionManager::new(config, subscriptions, dispatcher, factory);
/// manager.start().await;
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
	config: RouterConfig,
	factory: Arc<dyn TransportFactory>,
	registry: Arc<ConnectionRegistry>,
	lifecycle: Lifecycle,
}

impl ConnectionManager {
	/// Creates a manager using `$share/{group}/` shared subscriptions.
	pub fn new(
		config: RouterConfig,
		subscriptions: Arc<SubscriptionRegistry>,
		dispatcher: Arc<Dispatcher>,
		factory: Arc<dyn TransportFactory>,
	) -> Self {
		let scheduler =
			Arc::new(ReconnectScheduler::new(config.settings.reconnect_workers));
		Self {
			config,
			factory,
			registry: Arc::new(ConnectionRegistry::new()),
			lifecycle: Lifecycle {
				subscriptions,
				dispatcher,
				sharing: Arc::new(ShareGroupStrategy),
				scheduler,
			},
		}
	}

	/// Replaces the shared subscription rewrite.
	pub fn with_sharing_strategy(
		mut self,
		strategy: Arc<dyn SharedSubscriptionStrategy>,
	) -> Self {
		self.lifecycle.sharing = strategy;
		self
	}

	/// Configuration the manager was built from.
	pub fn config(&self) -> &RouterConfig {
		&self.config
	}

	/// Live connections.
	pub fn registry(&self) -> &Arc<ConnectionRegistry> {
		&self.registry
	}

	/// Scheduler running connect attempts.
	pub fn scheduler(&self) -> &ReconnectScheduler {
		&self.lifecycle.scheduler
	}

	/// Connects every configured connection unless the router is disabled.
	pub async fn start(&self) {
		if self.config.disabled {
			info!("Router disabled, no connection started");
			return;
		}
		self.connect(false).await;
	}

	/// Connects every configured connection. With `force`, live
	/// connections are torn down and created again.
	pub async fn connect(&self, force: bool) {
		for connection_id in self.config.connections.keys() {
			if let Err(err) = self.connect_connection(connection_id, force).await
			{
				error!(client_id = %connection_id, error = %err, error_type = err.error_type(), "Cannot start connection");
			}
		}
	}

	/// Creates connection `connection_id` and schedules its first attempt.
	///
	/// Does nothing if the connection exists and `force` is false, or if it
	/// is disabled in the configuration.
	pub async fn connect_connection(
		&self,
		connection_id: &str,
		force: bool,
	) -> Result<(), RouterError> {
		let config = self
			.config
			.connections
			.get(connection_id)
			.ok_or_else(|| RouterError::unresolved_connection(connection_id))?;
		if config.disabled {
			info!(client_id = connection_id, "Connection disabled, skipped");
			return Ok(());
		}
		if !force && self.registry.get(connection_id).await.is_some() {
			debug!(client_id = connection_id, "Connection already exists");
			return Ok(());
		}

		let handle = self.create_handle(connection_id, config)?;
		if let Some(previous) = self.registry.insert(handle.clone()).await {
			info!(client_id = connection_id, "Replacing connection");
			close_handle(&previous).await;
		}
		if self.config.default_client_id.as_deref() == Some(connection_id) {
			self.registry.set_default(connection_id).await;
		}

		// Held until the task is stored so a retry scheduled by the attempt
		// is never overwritten by it.
		let _guard = handle.lock().await;
		let task = self
			.lifecycle
			.scheduler
			.run_now(self.lifecycle.clone().attempt(handle.clone()));
		handle.set_pending_attempt(task);
		Ok(())
	}

	fn create_handle(
		&self,
		connection_id: &str,
		config: &ConnectionConfig,
	) -> Result<Arc<ConnectionHandle>, RouterError> {
		let (events_tx, events_rx) =
			mpsc::channel(self.config.settings.event_channel_capacity.max(1));
		let transport = self.factory.create(connection_id, config, events_tx)?;
		let handle = Arc::new(ConnectionHandle::new(
			connection_id,
			config.publish_qos(),
			config.shared_subscription_enabled,
			transport,
		));
		let events = tokio::spawn(
			self.lifecycle
				.clone()
				.handle_events(handle.clone(), events_rx),
		);
		handle.set_event_task(events);
		Ok(handle)
	}

	/// Closes connection `connection_id` and removes it from the registry.
	pub async fn disconnect(
		&self,
		connection_id: &str,
	) -> Result<(), RouterError> {
		let handle = self
			.registry
			.remove(connection_id)
			.await
			.ok_or_else(|| RouterError::unresolved_connection(connection_id))?;
		close_handle(&handle).await;
		info!(client_id = connection_id, "Disconnected");
		Ok(())
	}

	/// Closes every connection and clears the registry.
	pub async fn shutdown(&self) {
		let handles = self.registry.clear().await;
		info!(connections = handles.len(), "Shutting down connections");
		future::join_all(handles.iter().map(|handle| close_handle(handle))).await;
	}

	/// State of connection `connection_id`.
	pub async fn state(&self, connection_id: &str) -> Option<ConnectionState> {
		self.registry
			.get(connection_id)
			.await
			.map(|handle| handle.state())
	}
}

impl std::fmt::Debug for ConnectionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionManager")
			.field("config", &self.config)
			.field("registry", &self.registry)
			.finish()
	}
}

/// Moves `handle` to `Closed` and releases its transport. Transport errors
/// are logged.
async fn close_handle(handle: &ConnectionHandle) {
	handle.abort_pending_attempt();
	let _guard = handle.lock().await;
	handle.set_state(ConnectionState::Closed);
	let transport = handle.transport();
	if let Err(err) = transport.disconnect().await {
		warn!(client_id = %handle.id(), error = %err, error_type = err.error_type(), "Disconnect failed");
	}
	if let Err(err) = transport.close().await {
		warn!(client_id = %handle.id(), error = %err, error_type = err.error_type(), "Close failed");
	}
	handle.abort_event_task();
}
