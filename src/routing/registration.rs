//! Handler declarations and their compiled registrations

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use arcstr::ArcStr;
use regex::Regex;
use rumqttc::QoS;

use super::argument::{ArgumentKind, ArgumentSpec, Arguments};
use super::error::{HandlerError, RegistrationError};
use crate::topic::{ParamType, TopicPattern};

/// Application callback.
pub type HandlerFn =
	Arc<dyn Fn(&mut Arguments) -> Result<(), HandlerError> + Send + Sync>;

/// `${key}` or `${key:default}`
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}")
		.expect("placeholder regex is valid")
});

/// Who a registration belongs to: handler instance and entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerIdentity {
	instance: ArcStr,
	entry_point: ArcStr,
}

impl OwnerIdentity {
	/// Creates an owner identity.
	pub fn new(
		instance: impl Into<ArcStr>,
		entry_point: impl Into<ArcStr>,
	) -> Self {
		Self {
			instance: instance.into(),
			entry_point: entry_point.into(),
		}
	}

	/// Handler instance name.
	pub fn instance(&self) -> &str {
		&self.instance
	}

	/// Entry point name.
	pub fn entry_point(&self) -> &str {
		&self.entry_point
	}
}

impl fmt::Display for OwnerIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}::{}", self.instance, self.entry_point)
	}
}

/// Values for `${key}` placeholders in client ids and topics.
///
/// Keys missing from the map are looked up in the process environment
/// unless that fallback is turned off.
#[derive(Debug, Clone)]
pub struct Placeholders {
	values: HashMap<String, String>,
	env_fallback: bool,
}

impl Default for Placeholders {
	fn default() -> Self {
		Self {
			values: HashMap::new(),
			env_fallback: true,
		}
	}
}

impl Placeholders {
	/// Creates an empty map with environment fallback.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a value.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.values.insert(key.into(), value.into());
		self
	}

	/// Turns the environment fallback on or off.
	pub fn with_env_fallback(mut self, enabled: bool) -> Self {
		self.env_fallback = enabled;
		self
	}

	fn lookup(&self, key: &str) -> Option<String> {
		self.values.get(key).cloned().or_else(|| {
			self.env_fallback
				.then(|| std::env::var(key).ok())
				.flatten()
		})
	}

	/// Replaces every placeholder in `text`.
	pub fn resolve(&self, text: &str) -> Result<String, RegistrationError> {
		if !text.contains("${") {
			return Ok(text.to_string());
		}
		let mut resolved = String::with_capacity(text.len());
		let mut last = 0;
		for captures in PLACEHOLDER.captures_iter(text) {
			let (Some(whole), Some(key)) = (captures.get(0), captures.get(1))
			else {
				continue;
			};
			let key = key.as_str().trim();
			let value = match self.lookup(key) {
				| Some(value) => value,
				| None => match captures.get(2) {
					| Some(default) => default.as_str().to_string(),
					| None => {
						return Err(RegistrationError::unresolved_placeholder(
							key, text,
						));
					}
				},
			};
			resolved.push_str(&text[last .. whole.start()]);
			resolved.push_str(&value);
			last = whole.end();
		}
		resolved.push_str(&text[last ..]);
		Ok(resolved)
	}
}

/// Declaration of a handler, before compilation.
///
/// `qos`, `shared` and `groups` are matched with `topics` by position; a
/// shorter list repeats its last value, a longer one is truncated.
///
/// ```
/// use mqtt_topic_router::routing::{ArgumentSpec, HandlerDefinition};
/// use rumqttc::QoS;
///
/// let definition = HandlerDefinition::new("sensors", "on_reading", |args| {
///     let id = args.get::<u32>(0);
///     let value = args.get::<f64>(1);
///     println!("{id:?} {value:?}");
///     Ok(())
/// })
/// .topic("sensors/{zone}/{id}")
/// .qos(QoS::AtLeastOnce)
/// .argument(ArgumentSpec::path::<u32>("id").required())
/// .argument(ArgumentSpec::payload::<f64>("value"));
/// # let _ = definition;
/// ```
#[derive(Clone)]
pub struct HandlerDefinition {
	owner: OwnerIdentity,
	client_ids: Vec<String>,
	topics: Vec<String>,
	qos: Vec<QoS>,
	shared: Vec<bool>,
	groups: Vec<String>,
	arguments: Vec<ArgumentSpec>,
	priority: i32,
	handler: HandlerFn,
}

impl HandlerDefinition {
	/// Starts a definition for `instance::entry_point`.
	pub fn new<F>(
		instance: impl Into<ArcStr>,
		entry_point: impl Into<ArcStr>,
		handler: F,
	) -> Self
	where
		F: Fn(&mut Arguments) -> Result<(), HandlerError> + Send + Sync + 'static,
	{
		Self {
			owner: OwnerIdentity::new(instance, entry_point),
			client_ids: Vec::new(),
			topics: Vec::new(),
			qos: Vec::new(),
			shared: Vec::new(),
			groups: Vec::new(),
			arguments: Vec::new(),
			priority: 0,
			handler: Arc::new(handler),
		}
	}

	/// Restricts the handler to a connection id (may contain placeholders).
	pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_ids.push(client_id.into());
		self
	}

	/// Adds a topic template.
	pub fn topic(mut self, topic: impl Into<String>) -> Self {
		self.topics.push(topic.into());
		self
	}

	/// Adds several topic templates.
	pub fn topics<I, S>(mut self, topics: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.topics.extend(topics.into_iter().map(Into::into));
		self
	}

	/// Adds a subscription QoS.
	pub fn qos(mut self, qos: QoS) -> Self {
		self.qos.push(qos);
		self
	}

	/// Adds a shared flag.
	pub fn shared(mut self, shared: bool) -> Self {
		self.shared.push(shared);
		self
	}

	/// Adds a shared subscription group.
	pub fn group(mut self, group: impl Into<String>) -> Self {
		self.groups.push(group.into());
		self
	}

	/// Appends an argument.
	pub fn argument(mut self, argument: ArgumentSpec) -> Self {
		self.arguments.push(argument);
		self
	}

	/// Sets the dispatch priority, lower runs first.
	pub fn priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	/// Owner identity.
	pub fn owner(&self) -> &OwnerIdentity {
		&self.owner
	}
}

impl fmt::Debug for HandlerDefinition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandlerDefinition")
			.field("owner", &self.owner)
			.field("client_ids", &self.client_ids)
			.field("topics", &self.topics)
			.field("priority", &self.priority)
			.finish()
	}
}

fn broadcast<T: Clone>(values: &[T], index: usize) -> Option<T> {
	values.get(index).or_else(|| values.last()).cloned()
}

/// Compiled, routable handler.
#[derive(Clone)]
pub struct HandlerRegistration {
	owner: OwnerIdentity,
	client_ids: Vec<ArcStr>,
	topics: Vec<TopicPattern>,
	arguments: Vec<ArgumentSpec>,
	priority: i32,
	handler: HandlerFn,
}

impl HandlerRegistration {
	/// Resolves placeholders and compiles every topic.
	///
	/// Topics are ordered most specific first; the same wire filter declared
	/// twice is kept once, with the metadata of its first declaration.
	pub fn compile(
		definition: HandlerDefinition,
		placeholders: &Placeholders,
	) -> Result<Self, RegistrationError> {
		let HandlerDefinition {
			owner,
			client_ids,
			topics,
			qos,
			shared,
			groups,
			arguments,
			priority,
			handler,
		} = definition;

		if topics.is_empty() {
			return Err(RegistrationError::NoTopics {
				owner: owner.to_string(),
			});
		}

		let client_ids = client_ids
			.iter()
			.map(|id| placeholders.resolve(id))
			.collect::<Result<Vec<_>, _>>()?
			.into_iter()
			.map(|id| id.trim().to_string())
			.filter(|id| !id.is_empty())
			.map(ArcStr::from)
			.collect();

		let param_types: HashMap<String, ParamType> = arguments
			.iter()
			.filter_map(|argument| match argument.kind() {
				| ArgumentKind::PathValue(name) if argument.target().is_numeric() => {
					Some((name.to_string(), ParamType::Numeric))
				}
				| _ => None,
			})
			.collect();

		let mut seen = HashSet::new();
		let mut patterns = Vec::with_capacity(topics.len());
		for (index, template) in topics.iter().enumerate() {
			let template = placeholders.resolve(template)?;
			let group = broadcast(&groups, index)
				.filter(|group| !group.trim().is_empty())
				.map(|group| placeholders.resolve(&group))
				.transpose()?
				.map(ArcStr::from);
			let pattern = TopicPattern::compile(
				template.as_str(),
				broadcast(&qos, index).unwrap_or(QoS::AtLeastOnce),
				broadcast(&shared, index).unwrap_or(false),
				group,
				&param_types,
			)
			.map_err(|err| {
				RegistrationError::invalid_topic(owner.to_string(), &template, err)
			})?;
			if seen.insert(pattern.literal().clone()) {
				patterns.push(pattern);
			}
		}
		patterns.sort_by_key(TopicPattern::order);

		Ok(Self {
			owner,
			client_ids,
			topics: patterns,
			arguments,
			priority,
			handler,
		})
	}

	/// Owner identity.
	pub fn owner(&self) -> &OwnerIdentity {
		&self.owner
	}

	/// Connection ids the handler is restricted to; empty means all.
	pub fn client_ids(&self) -> &[ArcStr] {
		&self.client_ids
	}

	/// Topic patterns, most specific first.
	pub fn topics(&self) -> &[TopicPattern] {
		&self.topics
	}

	/// Argument binding rules.
	pub fn arguments(&self) -> &[ArgumentSpec] {
		&self.arguments
	}

	/// Dispatch priority.
	pub fn priority(&self) -> i32 {
		self.priority
	}

	/// Returns true if the handler applies to `connection_id`.
	pub fn applies_to(&self, connection_id: &str) -> bool {
		self.client_ids.is_empty()
			|| self.client_ids.iter().any(|id| id == connection_id)
	}

	/// First pattern matching `topic`, in specificity order.
	pub fn first_match(&self, topic: &str) -> Option<&TopicPattern> {
		self.topics.iter().find(|pattern| pattern.matches(topic))
	}

	/// Runs the handler.
	pub fn invoke(&self, arguments: &mut Arguments) -> Result<(), HandlerError> {
		(self.handler)(arguments)
	}
}

impl PartialEq for HandlerRegistration {
	fn eq(&self, other: &Self) -> bool {
		self.owner == other.owner
	}
}

impl Eq for HandlerRegistration {}

impl fmt::Debug for HandlerRegistration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HandlerRegistration")
			.field("owner", &self.owner)
			.field("client_ids", &self.client_ids)
			.field(
				"topics",
				&self.topics.iter().map(|t| t.template()).collect::<Vec<_>>(),
			)
			.field("arguments", &self.arguments)
			.field("priority", &self.priority)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::topic::TopicPatternError;

	fn noop(_: &mut Arguments) -> Result<(), HandlerError> {
		Ok(())
	}

	fn no_env() -> Placeholders {
		Placeholders::new().with_env_fallback(false)
	}

	#[test]
	fn test_placeholders() {
		let placeholders = no_env().with("site", "berlin");
		assert_eq!(placeholders.resolve("a/${site}/b").unwrap(), "a/berlin/b");
		assert_eq!(placeholders.resolve("${zone:west}").unwrap(), "west");
		assert_eq!(placeholders.resolve("${site:x}-${n:1}").unwrap(), "berlin-1");
		assert_eq!(placeholders.resolve("plain/{id}").unwrap(), "plain/{id}");
		assert_eq!(
			placeholders.resolve("${missing}"),
			Err(RegistrationError::unresolved_placeholder("missing", "${missing}"))
		);
	}

	#[test]
	fn test_metadata_broadcast() {
		let definition = HandlerDefinition::new("h", "run", noop)
			.topics(["a", "b", "c"])
			.qos(QoS::AtMostOnce)
			.qos(QoS::ExactlyOnce)
			.shared(true)
			.group("g1")
			.group("g2")
			.group("g3")
			.group("g4");
		let registration =
			HandlerRegistration::compile(definition, &no_env()).unwrap();
		let topics = registration.topics();
		assert_eq!(topics[0].qos(), QoS::AtMostOnce);
		assert_eq!(topics[1].qos(), QoS::ExactlyOnce);
		assert_eq!(topics[2].qos(), QoS::ExactlyOnce);
		assert!(topics.iter().all(TopicPattern::is_shared));
		assert_eq!(topics[2].group().map(ArcStr::as_str), Some("g3"));
	}

	#[test]
	fn test_defaults_without_metadata() {
		let definition = HandlerDefinition::new("h", "run", noop).topic("a/b");
		let registration =
			HandlerRegistration::compile(definition, &no_env()).unwrap();
		let topic = &registration.topics()[0];
		assert_eq!(topic.qos(), QoS::AtLeastOnce);
		assert!(!topic.is_shared());
		assert_eq!(topic.group(), None);
		assert!(registration.applies_to("anything"));
	}

	#[test]
	fn test_topics_sorted_by_specificity() {
		let definition = HandlerDefinition::new("h", "run", noop)
			.topics(["sensors/#", "sensors/{zone}/+", "sensors/{zone}/{id}"]);
		let registration =
			HandlerRegistration::compile(definition, &no_env()).unwrap();
		let templates: Vec<_> = registration
			.topics()
			.iter()
			.map(|t| t.template().as_str())
			.collect();
		assert_eq!(
			templates,
			["sensors/{zone}/{id}", "sensors/{zone}/+", "sensors/#"]
		);
		assert_eq!(
			registration
				.first_match("sensors/west/7")
				.map(|t| t.template().as_str()),
			Some("sensors/{zone}/{id}")
		);
	}

	#[test]
	fn test_duplicate_literals_collapse() {
		let definition = HandlerDefinition::new("h", "run", noop)
			.topics(["a/{x}", "a/+"])
			.qos(QoS::ExactlyOnce)
			.qos(QoS::AtMostOnce);
		let registration =
			HandlerRegistration::compile(definition, &no_env()).unwrap();
		assert_eq!(registration.topics().len(), 1);
		assert_eq!(registration.topics()[0].qos(), QoS::ExactlyOnce);
	}

	#[test]
	fn test_numeric_path_argument_narrows_capture() {
		let definition = HandlerDefinition::new("h", "run", noop)
			.topic("meters/{id}")
			.argument(ArgumentSpec::path::<u32>("id"));
		let registration =
			HandlerRegistration::compile(definition, &no_env()).unwrap();
		assert!(registration.first_match("meters/12").is_some());
		assert!(registration.first_match("meters/abc").is_none());
	}

	#[test]
	fn test_client_ids_resolved() {
		let definition = HandlerDefinition::new("h", "run", noop)
			.topic("a")
			.client_id("${site}-gw")
			.client_id(" ");
		let registration = HandlerRegistration::compile(
			definition,
			&no_env().with("site", "berlin"),
		)
		.unwrap();
		assert_eq!(registration.client_ids(), ["berlin-gw"]);
		assert!(registration.applies_to("berlin-gw"));
		assert!(!registration.applies_to("paris-gw"));
	}

	#[test]
	fn test_invalid_topic_rejected() {
		let definition =
			HandlerDefinition::new("h", "run", noop).topics(["ok", "a/#/b"]);
		let err =
			HandlerRegistration::compile(definition, &no_env()).unwrap_err();
		assert_eq!(
			err,
			RegistrationError::invalid_topic(
				"h::run",
				"a/#/b",
				TopicPatternError::hash_position("a/#/b")
			)
		);
	}

	#[test]
	fn test_no_topics_rejected() {
		let definition = HandlerDefinition::new("h", "run", noop);
		assert!(matches!(
			HandlerRegistration::compile(definition, &no_env()),
			Err(RegistrationError::NoTopics { .. })
		));
	}
}
