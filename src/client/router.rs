use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use super::config::RouterConfig;
use super::publisher::MqttPublisher;
use crate::connection::{ConnectionManager, ConnectionRegistry};
use crate::message_serializer::MessageSerializer;
use crate::routing::{
	Dispatcher, HandlerDefinition, PayloadCodecs, Placeholders,
	StringConversion, SubscriptionRegistry,
};
use crate::topic::SharedSubscriptionStrategy;
use crate::transport::{RumqttTransportFactory, TransportFactory};

/// Handlers, connections and publisher wired together.
///
/// ```no_run
/// use mqtt_topic_router::prelude::*;
///
/// # async fn run() -> mqtt_topic_router::Result<()> {
/// let config = RouterConfig::load("router.toml")?;
/// let router = MqttRouter::builder(config)
/// 	.handler(
/// 		HandlerDefinition::new("sensors", "on_reading", |args| {
/// 			let id = args.get::<u32>(0);
/// 			let value = args.get::<f64>(1);
/// 			println!("sensor {id:?}: {value:?}");
/// 			Ok(())
/// 		})
/// 		.topic("sensors/{zone}/{id}")
/// 		.argument(ArgumentSpec::path::<u32>("id").required())
/// 		.argument(ArgumentSpec::payload::<f64>("value")),
/// 	)
/// 	.build();
///
/// router.start().await;
/// router.publisher().send("sensors/west/7", 23.5f64).await?;
/// router.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MqttRouter {
	subscriptions: Arc<SubscriptionRegistry>,
	dispatcher: Arc<Dispatcher>,
	manager: ConnectionManager,
	publisher: MqttPublisher,
}

impl MqttRouter {
	/// Starts building a router for `config`.
	pub fn builder(config: RouterConfig) -> RouterBuilder {
		RouterBuilder::new(config)
	}

	/// Connects every configured connection.
	pub async fn start(&self) {
		self.manager.start().await;
	}

	/// Closes every connection.
	pub async fn shutdown(&self) {
		self.manager.shutdown().await;
	}

	/// Publisher bound to the router's connections.
	pub fn publisher(&self) -> &MqttPublisher {
		&self.publisher
	}

	/// Connection lifecycle manager.
	pub fn manager(&self) -> &ConnectionManager {
		&self.manager
	}

	/// Live connections.
	pub fn connections(&self) -> &Arc<ConnectionRegistry> {
		self.manager.registry()
	}

	/// Frozen handler registry.
	pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
		&self.subscriptions
	}

	/// Dispatcher invoked for inbound messages.
	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}
}

/// Collects handlers and collaborators before the registry is frozen.
pub struct RouterBuilder {
	config: RouterConfig,
	subscriptions: SubscriptionRegistry,
	codecs: PayloadCodecs,
	conversions: Option<Arc<dyn StringConversion>>,
	factory: Option<Arc<dyn TransportFactory>>,
	sharing: Option<Arc<dyn SharedSubscriptionStrategy>>,
}

impl RouterBuilder {
	fn new(config: RouterConfig) -> Self {
		Self {
			config,
			subscriptions: SubscriptionRegistry::new(),
			codecs: PayloadCodecs::default(),
			conversions: None,
			factory: None,
			sharing: None,
		}
	}

	/// Sets the `${key}` values used by handlers registered afterwards.
	/// Handlers registered before keep their resolved topics.
	pub fn placeholders(mut self, placeholders: Placeholders) -> Self {
		let registered = std::mem::replace(
			&mut self.subscriptions,
			SubscriptionRegistry::with_placeholders(placeholders),
		);
		for registration in registered.registrations() {
			self.subscriptions.insert(registration.as_ref().clone());
		}
		self
	}

	/// Registers a handler. A handler that does not compile is logged and
	/// left out.
	pub fn handler(mut self, definition: HandlerDefinition) -> Self {
		let _ = self.subscriptions.register(definition).inspect_err(|err| {
			debug!(error_type = err.error_type(), "Handler left out of router");
		});
		self
	}

	/// Adds a payload codec for `T`, after the default ones.
	pub fn codec<T, S>(mut self, serializer: S) -> Self
	where
		T: Any + Send + Sync,
		S: MessageSerializer<T>,
	{
		self.codecs.register::<T, S>(serializer);
		self
	}

	/// Replaces every payload codec.
	pub fn codecs(mut self, codecs: PayloadCodecs) -> Self {
		self.codecs = codecs;
		self
	}

	/// Replaces the path value conversions.
	pub fn conversions(
		mut self,
		conversions: Arc<dyn StringConversion>,
	) -> Self {
		self.conversions = Some(conversions);
		self
	}

	/// Uses `factory` instead of rumqttc transports.
	pub fn transport_factory(
		mut self,
		factory: Arc<dyn TransportFactory>,
	) -> Self {
		self.factory = Some(factory);
		self
	}

	/// Replaces the shared subscription rewrite.
	pub fn sharing_strategy(
		mut self,
		strategy: Arc<dyn SharedSubscriptionStrategy>,
	) -> Self {
		self.sharing = Some(strategy);
		self
	}

	/// Freezes the handler registry and wires the router.
	pub fn build(self) -> MqttRouter {
		let subscriptions = Arc::new(self.subscriptions);
		let codecs = Arc::new(self.codecs);
		let mut dispatcher =
			Dispatcher::new(subscriptions.clone()).with_codecs(codecs.clone());
		if let Some(conversions) = self.conversions {
			dispatcher = dispatcher.with_conversions(conversions);
		}
		let dispatcher = Arc::new(dispatcher);
		let factory = self.factory.unwrap_or_else(|| {
			Arc::new(RumqttTransportFactory::new(&self.config.settings))
				as Arc<dyn TransportFactory>
		});
		let mut manager = ConnectionManager::new(
			self.config,
			subscriptions.clone(),
			dispatcher.clone(),
			factory,
		);
		if let Some(sharing) = self.sharing {
			manager = manager.with_sharing_strategy(sharing);
		}
		let publisher = MqttPublisher::new(manager.registry().clone(), codecs);
		MqttRouter {
			subscriptions,
			dispatcher,
			manager,
			publisher,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn handler(entry_point: &str, topic: &str) -> HandlerDefinition {
		HandlerDefinition::new("h", entry_point, |_| Ok(())).topic(topic)
	}

	#[test]
	fn test_invalid_handler_left_out() {
		let router = MqttRouter::builder(RouterConfig::default())
			.handler(handler("good", "a/{id}"))
			.handler(handler("bad", "a/#/b"))
			.handler(handler("other", "b/+"))
			.build();
		let entry_points: Vec<_> = router
			.subscriptions()
			.registrations()
			.iter()
			.map(|registration| registration.owner().entry_point().to_string())
			.collect();
		assert_eq!(entry_points, ["good", "other"]);
	}
}
