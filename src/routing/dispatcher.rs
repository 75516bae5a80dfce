//! Routing of inbound messages to registered handlers

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arcstr::ArcStr;
use tracing::{debug, error, warn};

use super::argument::{ArgumentKind, ArgumentSpec, Arguments, Value};
use super::conversion::{PathConversions, PayloadCodecs, StringConversion};
use super::registration::{HandlerRegistration, OwnerIdentity};
use super::subscription_registry::SubscriptionRegistry;
use crate::topic::TopicPattern;
use crate::transport::InboundMessage;

/// What happened to one handler for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// The handler ran and returned `Ok`
	Invoked {
		/// Handler owner
		owner: OwnerIdentity,
	},
	/// A required argument resolved to nothing; the handler did not run
	NullParameter {
		/// Handler owner
		owner: OwnerIdentity,
		/// Argument that was missing
		argument: ArcStr,
	},
	/// The handler returned an error or panicked
	HandlerFailed {
		/// Handler owner
		owner: OwnerIdentity,
		/// Error or panic message
		error: String,
	},
}

impl DispatchOutcome {
	/// Owner of the handler this outcome is about.
	pub fn owner(&self) -> &OwnerIdentity {
		match self {
			| DispatchOutcome::Invoked { owner }
			| DispatchOutcome::NullParameter { owner, .. }
			| DispatchOutcome::HandlerFailed { owner, .. } => owner,
		}
	}

	/// Returns true if the handler ran successfully.
	pub fn is_invoked(&self) -> bool {
		matches!(self, DispatchOutcome::Invoked { .. })
	}
}

/// Binds arguments and invokes every handler applicable to a message.
///
/// Handlers run inline, in registry order. Each handler independently uses
/// the first of its patterns that matches the topic; a failing handler does
/// not prevent the others from running.
#[derive(Clone)]
pub struct Dispatcher {
	registry: Arc<SubscriptionRegistry>,
	codecs: Arc<PayloadCodecs>,
	conversions: Arc<dyn StringConversion>,
}

impl Dispatcher {
	/// Creates a dispatcher with default payload codecs and path
	/// conversions.
	pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
		Self {
			registry,
			codecs: Arc::new(PayloadCodecs::default()),
			conversions: Arc::new(PathConversions::default()),
		}
	}

	/// Replaces the payload codecs.
	pub fn with_codecs(mut self, codecs: Arc<PayloadCodecs>) -> Self {
		self.codecs = codecs;
		self
	}

	/// Replaces the path conversions.
	pub fn with_conversions(
		mut self,
		conversions: Arc<dyn StringConversion>,
	) -> Self {
		self.conversions = conversions;
		self
	}

	/// Handler registry.
	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		&self.registry
	}

	/// Payload codecs.
	pub fn codecs(&self) -> &Arc<PayloadCodecs> {
		&self.codecs
	}

	/// Routes `message` received on `connection_id`.
	pub fn dispatch(
		&self,
		connection_id: &str,
		message: &InboundMessage,
	) -> Vec<DispatchOutcome> {
		let mut outcomes = Vec::new();
		for registration in self.registry.registrations() {
			if !registration.applies_to(connection_id) {
				continue;
			}
			let Some(pattern) = registration.first_match(&message.topic) else {
				continue;
			};
			debug!(client_id = connection_id, topic = %message.topic, owner = %registration.owner(), pattern = %pattern, "Dispatching message");
			outcomes.push(self.invoke(
				registration,
				pattern,
				connection_id,
				message,
			));
		}
		if outcomes.is_empty() {
			debug!(client_id = connection_id, topic = %message.topic, "No handler for message");
		}
		outcomes
	}

	fn invoke(
		&self,
		registration: &HandlerRegistration,
		pattern: &TopicPattern,
		connection_id: &str,
		message: &InboundMessage,
	) -> DispatchOutcome {
		let owner = registration.owner().clone();
		let mut arguments =
			match self.bind(registration, pattern, connection_id, message) {
				| Ok(arguments) => arguments,
				| Err(argument) => {
					warn!(client_id = connection_id, topic = %message.topic, owner = %owner, argument = %argument, "Required parameter is null, handler skipped");
					return DispatchOutcome::NullParameter { owner, argument };
				}
			};

		let result = panic::catch_unwind(AssertUnwindSafe(|| {
			registration.invoke(&mut arguments)
		}));
		match result {
			| Ok(Ok(())) => DispatchOutcome::Invoked { owner },
			| Ok(Err(err)) => {
				error!(client_id = connection_id, topic = %message.topic, owner = %owner, error = %err, "Handler failed");
				DispatchOutcome::HandlerFailed {
					owner,
					error: err.to_string(),
				}
			}
			| Err(payload) => {
				let error = payload
					.downcast_ref::<&str>()
					.map(|s| s.to_string())
					.or_else(|| payload.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "handler panicked".to_string());
				error!(client_id = connection_id, topic = %message.topic, owner = %owner, error = %error, "Handler panicked");
				DispatchOutcome::HandlerFailed { owner, error }
			}
		}
	}

	/// Resolves every argument; `Err` names the first required argument
	/// that resolved to nothing.
	fn bind(
		&self,
		registration: &HandlerRegistration,
		pattern: &TopicPattern,
		connection_id: &str,
		message: &InboundMessage,
	) -> Result<Arguments, ArcStr> {
		let specs = registration.arguments();
		let params = if specs
			.iter()
			.any(|spec| matches!(spec.kind(), ArgumentKind::PathValue(_)))
		{
			pattern.extract_params(&message.topic)
		} else {
			HashMap::new()
		};

		let mut arguments = Arguments::new(
			ArcStr::from(connection_id),
			message.topic.clone(),
			specs.len(),
		);
		for spec in specs {
			let value = match self.resolve(spec, &params, message) {
				| Some(value) => Some(value),
				| None if spec.is_required() => return Err(spec.name().clone()),
				| None => spec.default_value(),
			};
			arguments.push(spec.name().clone(), value);
		}
		Ok(arguments)
	}

	fn resolve(
		&self,
		spec: &ArgumentSpec,
		params: &HashMap<ArcStr, String>,
		message: &InboundMessage,
	) -> Option<Value> {
		match spec.kind() {
			| ArgumentKind::RawMessage => Some(Box::new(message.clone())),
			| ArgumentKind::RawTopic => Some(Box::new(message.topic.to_string())),
			| ArgumentKind::PayloadBody | ArgumentKind::ImplicitPayload => {
				self.decode_payload(spec, &message.payload)
			}
			| ArgumentKind::PathValue(name) => {
				let raw = params.get(name.as_str())?;
				match self.conversions.convert(raw, spec.target()) {
					| Ok(value) => Some(value),
					| Err(err) => {
						debug!(argument = %spec.name(), error = %err, "Path value conversion failed");
						None
					}
				}
			}
		}
	}

	fn decode_payload(&self, spec: &ArgumentSpec, payload: &[u8]) -> Option<Value> {
		if spec.converters().is_empty() {
			return self.codecs.decode(spec.target(), payload);
		}
		spec.converters().iter().find_map(|convert| convert(payload))
	}
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher")
			.field("registrations", &self.registry.len())
			.field("codecs", &self.codecs)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use tracing_subscriber::Layer;
	use tracing_subscriber::layer::{Context, SubscriberExt};

	use super::*;
	use crate::routing::{HandlerDefinition, HandlerError};

	fn dispatcher(registry: SubscriptionRegistry) -> Dispatcher {
		Dispatcher::new(Arc::new(registry))
	}

	/// Counts WARN events.
	struct WarnCounter(Arc<AtomicUsize>);

	impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
		fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
			if *event.metadata().level() == tracing::Level::WARN {
				self.0.fetch_add(1, Ordering::SeqCst);
			}
		}
	}

	#[test]
	fn test_path_and_payload_binding() {
		let seen = Arc::new(Mutex::new(None));
		let sink = seen.clone();
		let mut registry = SubscriptionRegistry::new();
		registry
			.register(
				HandlerDefinition::new("sensors", "reading", move |args| {
					let id = args.get::<i32>(0).copied();
					let value = args.get::<f64>(1).copied();
					*sink.lock().unwrap() = Some((id, value));
					Ok(())
				})
				.topic("sensors/{zone}/{id}")
				.argument(ArgumentSpec::path::<i32>("id"))
				.argument(ArgumentSpec::payload::<f64>("value")),
			)
			.unwrap();

		let outcomes = dispatcher(registry)
			.dispatch("c1", &InboundMessage::new("sensors/west/7", "23.5"));
		assert_eq!(outcomes.len(), 1);
		assert!(outcomes[0].is_invoked());
		assert_eq!(*seen.lock().unwrap(), Some((Some(7), Some(23.5))));
	}

	#[test]
	fn test_required_null_skips_handler() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut registry = SubscriptionRegistry::new();
		registry
			.register(
				HandlerDefinition::new("h", "run", move |_| {
					counter.fetch_add(1, Ordering::SeqCst);
					Ok(())
				})
				.topic("values/{id}")
				.argument(ArgumentSpec::payload::<i64>("value").required()),
			)
			.unwrap();

		let dispatcher = dispatcher(registry);
		let warnings = Arc::new(AtomicUsize::new(0));
		let subscriber =
			tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
		let outcomes = tracing::subscriber::with_default(subscriber, || {
			let message = InboundMessage::new("values/1", "not a number");
			let first = dispatcher.dispatch("c1", &message);
			assert_eq!(warnings.load(Ordering::SeqCst), 1);
			dispatcher.dispatch("c1", &InboundMessage::new("values/2", ""));
			first
		});
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert_eq!(warnings.load(Ordering::SeqCst), 2);
		assert!(matches!(
			&outcomes[..],
			[DispatchOutcome::NullParameter { argument, .. }] if argument == "value"
		));
	}

	#[test]
	fn test_optional_null_uses_default() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let mut registry = SubscriptionRegistry::new();
		registry
			.register(
				HandlerDefinition::new("h", "run", move |args| {
					sink.lock().unwrap().push((
						args.get::<u32>(0).copied(),
						args.get::<u32>(1).copied(),
					));
					Ok(())
				})
				.topic("t")
				.argument(ArgumentSpec::payload::<u32>("a").with_default(5u32))
				.argument(ArgumentSpec::payload::<u32>("b")),
			)
			.unwrap();

		dispatcher(registry).dispatch("c1", &InboundMessage::new("t", "x"));
		assert_eq!(*seen.lock().unwrap(), [(Some(5), Some(0))]);
	}

	#[test]
	fn test_raw_topic_message_and_converters() {
		let seen = Arc::new(Mutex::new(None));
		let sink = seen.clone();
		let mut registry = SubscriptionRegistry::new();
		registry
			.register(
				HandlerDefinition::new("h", "run", move |args| {
					let topic = args.get::<String>(0).cloned();
					let raw = args.get::<InboundMessage>(1).map(|m| m.payload.len());
					let upper = args.get::<String>(2).cloned();
					*sink.lock().unwrap() = Some((topic, raw, upper));
					Ok(())
				})
				.topic("logs/#")
				.argument(ArgumentSpec::infer::<String>("topic"))
				.argument(ArgumentSpec::infer::<InboundMessage>("message"))
				.argument(
					ArgumentSpec::payload::<String>("upper")
						.convert_with(|_| None::<String>)
						.convert_with(|bytes| {
							std::str::from_utf8(bytes).ok().map(str::to_uppercase)
						}),
				),
			)
			.unwrap();

		dispatcher(registry).dispatch("c1", &InboundMessage::new("logs/app", "hi"));
		assert_eq!(
			*seen.lock().unwrap(),
			Some((
				Some("logs/app".to_string()),
				Some(2),
				Some("HI".to_string())
			))
		);
	}

	#[test]
	fn test_every_applicable_handler_runs() {
		let calls = Arc::new(Mutex::new(Vec::new()));
		let mut registry = SubscriptionRegistry::new();
		for (name, topic, scope) in [
			("wide", "a/#", None),
			("narrow", "a/{x}", None),
			("other_connection", "a/#", Some("c2")),
			("no_match", "b/#", None),
		] {
			let sink = calls.clone();
			let mut definition = HandlerDefinition::new(name, "run", move |_| {
				sink.lock().unwrap().push(name);
				Ok(())
			})
			.topic(topic);
			if let Some(scope) = scope {
				definition = definition.client_id(scope);
			}
			registry.register(definition).unwrap();
		}

		let outcomes =
			dispatcher(registry).dispatch("c1", &InboundMessage::new("a/1", ""));
		assert_eq!(outcomes.len(), 2);
		assert_eq!(*calls.lock().unwrap(), ["wide", "narrow"]);
	}

	#[test]
	fn test_failures_are_isolated() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut registry = SubscriptionRegistry::new();
		registry
			.register(
				HandlerDefinition::new("failing", "run", |_| {
					Err(HandlerError::msg("boom"))
				})
				.topic("t"),
			)
			.unwrap();
		registry
			.register(
				HandlerDefinition::new("panicking", "run", |_| {
					panic!("kaboom");
				})
				.topic("t"),
			)
			.unwrap();
		registry
			.register(
				HandlerDefinition::new("healthy", "run", move |_| {
					counter.fetch_add(1, Ordering::SeqCst);
					Ok(())
				})
				.topic("t"),
			)
			.unwrap();

		let outcomes =
			dispatcher(registry).dispatch("c1", &InboundMessage::new("t", ""));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(
			outcomes[0],
			DispatchOutcome::HandlerFailed {
				owner: OwnerIdentity::new("failing", "run"),
				error: "boom".to_string(),
			}
		);
		assert_eq!(
			outcomes[1],
			DispatchOutcome::HandlerFailed {
				owner: OwnerIdentity::new("panicking", "run"),
				error: "kaboom".to_string(),
			}
		);
		assert!(outcomes[2].is_invoked());
	}
}
