//! Logical MQTT connections
//!
//! A connection is identified by the id it has in the configuration. Its
//! live state is held by a [`ConnectionHandle`]; all handles are owned by a
//! [`ConnectionRegistry`] that also tracks the default connection used by
//! publishes without an explicit id. The [`ConnectionManager`] drives the
//! lifecycle of every handle.

pub mod manager;
pub mod scheduler;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use arcstr::ArcStr;
use rumqttc::QoS;
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::transport::Transport;

pub use manager::ConnectionManager;
pub use scheduler::ReconnectScheduler;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	/// Created, no attempt made yet
	Idle,
	/// Handshake in progress, or link lost and being restored
	Connecting,
	/// Link established and subscriptions issued
	Connected,
	/// Last attempt failed, a retry is scheduled
	ReconnectPending,
	/// Explicitly disconnected; terminal
	Closed,
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			| ConnectionState::Idle => "idle",
			| ConnectionState::Connecting => "connecting",
			| ConnectionState::Connected => "connected",
			| ConnectionState::ReconnectPending => "reconnect_pending",
			| ConnectionState::Closed => "closed",
		};
		f.write_str(name)
	}
}

/// Live state of one logical connection.
pub struct ConnectionHandle {
	id: ArcStr,
	default_qos: QoS,
	sharing_enabled: bool,
	transport: Arc<dyn Transport>,
	state: watch::Sender<ConnectionState>,
	connect_lock: Mutex<()>,
	pending_attempt: StdMutex<Option<JoinHandle<()>>>,
	event_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
	pub(crate) fn new(
		id: impl Into<ArcStr>,
		default_qos: QoS,
		sharing_enabled: bool,
		transport: Arc<dyn Transport>,
	) -> Self {
		let (state, _) = watch::channel(ConnectionState::Idle);
		Self {
			id: id.into(),
			default_qos,
			sharing_enabled,
			transport,
			state,
			connect_lock: Mutex::new(()),
			pending_attempt: StdMutex::new(None),
			event_task: StdMutex::new(None),
		}
	}

	/// Connection id.
	pub fn id(&self) -> &ArcStr {
		&self.id
	}

	/// QoS used by publishes addressed to this connection.
	pub fn default_qos(&self) -> QoS {
		self.default_qos
	}

	/// Returns true if shared subscriptions are honored.
	pub fn sharing_enabled(&self) -> bool {
		self.sharing_enabled
	}

	/// Wire transport.
	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Current state.
	pub fn state(&self) -> ConnectionState {
		*self.state.borrow()
	}

	/// Receiver notified on every state transition.
	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}

	/// Waits until the connection reaches `state`.
	pub async fn wait_for(&self, state: ConnectionState) {
		let mut receiver = self.state.subscribe();
		// The sender lives as long as `self`, so this cannot fail.
		let _ = receiver.wait_for(|current| *current == state).await;
	}

	/// Returns true once the connection is closed.
	pub fn is_closed(&self) -> bool {
		self.state() == ConnectionState::Closed
	}

	pub(crate) fn set_state(&self, next: ConnectionState) -> ConnectionState {
		let previous = self.state.send_replace(next);
		if previous != next {
			debug!(client_id = %self.id, from = %previous, to = %next, "Connection state changed");
		}
		previous
	}

	/// Serializes connect and disconnect for this id.
	pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
		self.connect_lock.lock().await
	}

	/// Stores the task running the next connect attempt. The previous
	/// handle is detached, it may be the task calling this.
	pub(crate) fn set_pending_attempt(&self, task: JoinHandle<()>) {
		let mut slot = self
			.pending_attempt
			.lock()
			.unwrap_or_else(PoisonError::into_inner);
		*slot = Some(task);
	}

	pub(crate) fn abort_pending_attempt(&self) {
		let task = self
			.pending_attempt
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(task) = task {
			task.abort();
		}
	}

	pub(crate) fn set_event_task(&self, task: JoinHandle<()>) {
		let previous = self
			.event_task
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.replace(task);
		if let Some(previous) = previous {
			previous.abort();
		}
	}

	pub(crate) fn abort_event_task(&self) {
		let task = self
			.event_task
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(task) = task {
			task.abort();
		}
	}
}

impl fmt::Debug for ConnectionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionHandle")
			.field("id", &self.id)
			.field("default_qos", &self.default_qos)
			.field("sharing_enabled", &self.sharing_enabled)
			.field("state", &self.state())
			.finish()
	}
}

#[derive(Debug, Default)]
struct RegistryInner {
	connections: HashMap<ArcStr, Arc<ConnectionHandle>>,
	default_id: Option<ArcStr>,
	default_qos: Option<QoS>,
}

impl RegistryInner {
	fn promote(&mut self, handle: &ConnectionHandle) {
		self.default_id = Some(handle.id().clone());
		if self.default_qos.is_none() {
			self.default_qos = Some(handle.default_qos());
		}
		info!(client_id = %handle.id(), "Default connection set");
	}
}

/// Set of live connections and the default connection.
///
/// Owned by the connection manager and shared with publishers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `handle`, replacing any handle with the same id.
	///
	/// The first connection added while no default exists becomes the
	/// default; the global default QoS is taken from it the first time.
	pub async fn insert(
		&self,
		handle: Arc<ConnectionHandle>,
	) -> Option<Arc<ConnectionHandle>> {
		let mut inner = self.inner.write().await;
		if inner.default_id.is_none() {
			inner.promote(&handle);
		}
		inner.connections.insert(handle.id().clone(), handle)
	}

	/// Looks up a connection.
	pub async fn get(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
		self.inner.read().await.connections.get(id).cloned()
	}

	/// Removes a connection, moving the default to a remaining connection
	/// or clearing it.
	pub async fn remove(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
		let mut inner = self.inner.write().await;
		let removed = inner.connections.remove(id)?;
		if inner.default_id.as_deref() == Some(id) {
			let next = inner.connections.values().next().cloned();
			match next {
				| Some(next) => inner.promote(&next),
				| None => {
					inner.default_id = None;
					info!(client_id = id, "Default connection cleared");
				}
			}
		}
		Some(removed)
	}

	/// Removes every connection and clears the default.
	pub async fn clear(&self) -> Vec<Arc<ConnectionHandle>> {
		let mut inner = self.inner.write().await;
		inner.default_id = None;
		inner.connections.drain().map(|(_, handle)| handle).collect()
	}

	/// Makes `id` the default connection. Returns false if it is unknown.
	pub async fn set_default(&self, id: &str) -> bool {
		let mut inner = self.inner.write().await;
		let Some(handle) = inner.connections.get(id).cloned() else {
			return false;
		};
		inner.promote(&handle);
		true
	}

	/// Default connection id.
	pub async fn default_id(&self) -> Option<ArcStr> {
		self.inner.read().await.default_id.clone()
	}

	/// Default connection.
	pub async fn default_connection(&self) -> Option<Arc<ConnectionHandle>> {
		let inner = self.inner.read().await;
		let id = inner.default_id.as_ref()?;
		inner.connections.get(id).cloned()
	}

	/// QoS for publishes addressed to the default connection.
	pub async fn global_default_qos(&self) -> Option<QoS> {
		self.inner.read().await.default_qos
	}

	/// Ids of every connection, unordered.
	pub async fn ids(&self) -> Vec<ArcStr> {
		self.inner.read().await.connections.keys().cloned().collect()
	}

	/// Number of connections.
	pub async fn len(&self) -> usize {
		self.inner.read().await.connections.len()
	}

	/// Returns true if there is no connection.
	pub async fn is_empty(&self) -> bool {
		self.inner.read().await.connections.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_trait::async_trait;
	use bytes::Bytes;

	use super::*;
	use crate::transport::{TransportError, WireSubscription};

	struct IdleTransport;

	#[async_trait]
	impl Transport for IdleTransport {
		async fn connect(&self) -> Result<ArcStr, TransportError> {
			Ok(arcstr::literal!("tcp://idle"))
		}

		async fn subscribe(
			&self,
			_: &[WireSubscription],
		) -> Result<(), TransportError> {
			Ok(())
		}

		async fn publish(
			&self,
			_: &str,
			_: Bytes,
			_: QoS,
			_: bool,
		) -> Result<(), TransportError> {
			Ok(())
		}

		async fn disconnect(&self) -> Result<(), TransportError> {
			Ok(())
		}

		async fn close(&self) -> Result<(), TransportError> {
			Ok(())
		}

		fn max_reconnect_delay(&self) -> Duration {
			Duration::from_secs(1)
		}

		fn server_uris(&self) -> &[ArcStr] {
			&[]
		}
	}

	fn handle(id: &str, qos: QoS) -> Arc<ConnectionHandle> {
		Arc::new(ConnectionHandle::new(id, qos, true, Arc::new(IdleTransport)))
	}

	#[tokio::test]
	async fn test_first_connection_becomes_default() {
		let registry = ConnectionRegistry::new();
		assert!(registry.default_id().await.is_none());
		registry.insert(handle("a", QoS::ExactlyOnce)).await;
		registry.insert(handle("b", QoS::AtMostOnce)).await;
		assert_eq!(registry.default_id().await.as_deref(), Some("a"));
		assert_eq!(registry.global_default_qos().await, Some(QoS::ExactlyOnce));
		assert_eq!(registry.len().await, 2);
	}

	#[tokio::test]
	async fn test_default_reassigned_on_remove() {
		let registry = ConnectionRegistry::new();
		registry.insert(handle("a", QoS::AtLeastOnce)).await;
		registry.insert(handle("b", QoS::AtLeastOnce)).await;
		registry.insert(handle("c", QoS::AtLeastOnce)).await;

		assert!(registry.remove("a").await.is_some());
		let next = registry.default_id().await.unwrap();
		assert!(next.as_str() == "b" || next.as_str() == "c");

		// Removing a non-default keeps the default.
		let other = if next.as_str() == "b" { "c" } else { "b" };
		registry.remove(other).await;
		assert_eq!(registry.default_id().await, Some(next.clone()));

		registry.remove(&next).await;
		assert!(registry.default_id().await.is_none());
		assert!(registry.default_connection().await.is_none());
		assert!(registry.is_empty().await);
	}

	#[tokio::test]
	async fn test_global_qos_set_once() {
		let registry = ConnectionRegistry::new();
		registry.insert(handle("a", QoS::AtMostOnce)).await;
		registry.insert(handle("b", QoS::ExactlyOnce)).await;
		registry.remove("a").await;
		assert_eq!(registry.default_id().await.as_deref(), Some("b"));
		assert_eq!(registry.global_default_qos().await, Some(QoS::AtMostOnce));
	}

	#[tokio::test]
	async fn test_state_transitions_are_observable() {
		let handle = handle("a", QoS::AtLeastOnce);
		let mut states = handle.watch_state();
		assert_eq!(handle.state(), ConnectionState::Idle);
		handle.set_state(ConnectionState::Connecting);
		states.changed().await.unwrap();
		assert_eq!(*states.borrow(), ConnectionState::Connecting);
		handle.set_state(ConnectionState::Closed);
		handle.wait_for(ConnectionState::Closed).await;
		assert!(handle.is_closed());
	}
}
