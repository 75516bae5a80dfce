//! Handler call arguments and the rules that bind them

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;

use crate::transport::InboundMessage;

/// Type-erased argument value.
pub type Value = Box<dyn Any + Send + Sync>;

/// Custom `bytes -> T` conversion attached to a payload argument.
pub type PayloadConverter = Arc<dyn Fn(&[u8]) -> Option<Value> + Send + Sync>;

type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Where an argument's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentKind {
	/// The whole [`InboundMessage`]
	RawMessage,
	/// Payload decoded into the target type
	PayloadBody,
	/// Named path parameter converted into the target type
	PathValue(ArcStr),
	/// Topic the message arrived on, as `String`
	RawTopic,
	/// Payload of an argument without explicit marker
	ImplicitPayload,
}

impl ArgumentKind {
	/// Returns true for kinds bound from the payload.
	pub fn is_payload(&self) -> bool {
		matches!(self, ArgumentKind::PayloadBody | ArgumentKind::ImplicitPayload)
	}
}

/// Runtime description of an argument's Rust type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetType {
	id: TypeId,
	name: &'static str,
	numeric: bool,
}

impl TargetType {
	/// Describes `T`.
	pub fn of<T: Any>() -> Self {
		let id = TypeId::of::<T>();
		Self {
			id,
			name: type_name::<T>(),
			numeric: is_numeric(id),
		}
	}

	/// `TypeId` of the type.
	pub fn id(&self) -> TypeId {
		self.id
	}

	/// Type name for diagnostics.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Returns true for the primitive integer and float types.
	pub fn is_numeric(&self) -> bool {
		self.numeric
	}

	/// Returns true if this describes `T`.
	pub fn is<T: Any>(&self) -> bool {
		self.id == TypeId::of::<T>()
	}
}

fn is_numeric(id: TypeId) -> bool {
	[
		TypeId::of::<i8>(),
		TypeId::of::<i16>(),
		TypeId::of::<i32>(),
		TypeId::of::<i64>(),
		TypeId::of::<i128>(),
		TypeId::of::<isize>(),
		TypeId::of::<u8>(),
		TypeId::of::<u16>(),
		TypeId::of::<u32>(),
		TypeId::of::<u64>(),
		TypeId::of::<u128>(),
		TypeId::of::<usize>(),
		TypeId::of::<f32>(),
		TypeId::of::<f64>(),
	]
	.contains(&id)
}

/// Zero value for the primitive numbers and `bool`.
fn zero_default(id: TypeId) -> Option<DefaultFactory> {
	macro_rules! zero {
		($($ty:ty),*) => {
			$(
				if id == TypeId::of::<$ty>() {
					let zero: DefaultFactory =
						Arc::new(|| Box::new(<$ty>::default()) as Value);
					return Some(zero);
				}
			)*
		};
	}
	zero!(
		i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32,
		f64, bool
	);
	None
}

/// Binding rule for one handler argument.
///
/// ```
/// use mqtt_topic_router::routing::ArgumentSpec;
///
/// let id = ArgumentSpec::path::<u32>("id").required();
/// let value = ArgumentSpec::payload::<f64>("value").or_default::<f64>();
/// # let _ = (id, value);
/// ```
#[derive(Clone)]
pub struct ArgumentSpec {
	name: ArcStr,
	kind: ArgumentKind,
	required: bool,
	target: TargetType,
	default_value: Option<DefaultFactory>,
	converters: Vec<PayloadConverter>,
}

impl ArgumentSpec {
	fn with_kind<T: Any>(name: impl Into<ArcStr>, kind: ArgumentKind) -> Self {
		Self {
			name: name.into(),
			kind,
			required: false,
			target: TargetType::of::<T>(),
			default_value: zero_default(TypeId::of::<T>()),
			converters: Vec::new(),
		}
	}

	/// Binds the raw [`InboundMessage`].
	pub fn raw_message(name: impl Into<ArcStr>) -> Self {
		Self::with_kind::<InboundMessage>(name, ArgumentKind::RawMessage)
	}

	/// Binds the payload decoded as `T`.
	pub fn payload<T: Any + Send + Sync>(name: impl Into<ArcStr>) -> Self {
		Self::with_kind::<T>(name, ArgumentKind::PayloadBody)
	}

	/// Binds the path parameter `name` converted to `T`.
	pub fn path<T: Any + Send + Sync>(name: impl Into<ArcStr>) -> Self {
		let name = name.into();
		Self::with_kind::<T>(name.clone(), ArgumentKind::PathValue(name))
	}

	/// Binds path parameter `param` to an argument called `name`.
	pub fn path_named<T: Any + Send + Sync>(
		name: impl Into<ArcStr>,
		param: impl Into<ArcStr>,
	) -> Self {
		Self::with_kind::<T>(name, ArgumentKind::PathValue(param.into()))
	}

	/// Binds the topic string.
	pub fn topic(name: impl Into<ArcStr>) -> Self {
		Self::with_kind::<String>(name, ArgumentKind::RawTopic)
	}

	/// Picks the kind from the type alone: `InboundMessage` is the raw
	/// message, `String` the topic, anything else the payload.
	pub fn infer<T: Any + Send + Sync>(name: impl Into<ArcStr>) -> Self {
		let kind = if TypeId::of::<T>() == TypeId::of::<InboundMessage>() {
			ArgumentKind::RawMessage
		} else if TypeId::of::<T>() == TypeId::of::<String>() {
			ArgumentKind::RawTopic
		} else {
			ArgumentKind::ImplicitPayload
		};
		Self::with_kind::<T>(name, kind)
	}

	/// Skips the invocation when this argument resolves to nothing.
	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	/// Uses `T::default()` when the value resolves to nothing. Numbers and
	/// `bool` already default to zero and `false`.
	pub fn or_default<T: Any + Default + Send + Sync>(self) -> Self {
		self.with_default_factory(|| Box::new(T::default()) as Value)
	}

	/// Uses `value` when the value resolves to nothing.
	pub fn with_default<T: Any + Clone + Send + Sync>(self, value: T) -> Self {
		self.with_default_factory(move || Box::new(value.clone()) as Value)
	}

	fn with_default_factory(
		mut self,
		factory: impl Fn() -> Value + Send + Sync + 'static,
	) -> Self {
		self.default_value = Some(Arc::new(factory));
		self
	}

	/// Adds a custom payload conversion; converters are tried in order and
	/// replace the codec lookup.
	pub fn convert_with<T, F>(mut self, converter: F) -> Self
	where
		T: Any + Send + Sync,
		F: Fn(&[u8]) -> Option<T> + Send + Sync + 'static,
	{
		self.converters.push(Arc::new(move |bytes: &[u8]| {
			converter(bytes).map(|value| Box::new(value) as Value)
		}));
		self
	}

	/// Argument name.
	pub fn name(&self) -> &ArcStr {
		&self.name
	}

	/// Binding kind.
	pub fn kind(&self) -> &ArgumentKind {
		&self.kind
	}

	/// Returns true if a missing value skips the invocation.
	pub fn is_required(&self) -> bool {
		self.required
	}

	/// Target type.
	pub fn target(&self) -> &TargetType {
		&self.target
	}

	/// Custom payload converters.
	pub fn converters(&self) -> &[PayloadConverter] {
		&self.converters
	}

	/// Value used in place of a missing one.
	pub fn default_value(&self) -> Option<Value> {
		self.default_value.as_ref().map(|factory| factory())
	}
}

impl fmt::Debug for ArgumentSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ArgumentSpec")
			.field("name", &self.name)
			.field("kind", &self.kind)
			.field("required", &self.required)
			.field("target", &self.target.name)
			.field("has_default", &self.default_value.is_some())
			.field("converters", &self.converters.len())
			.finish()
	}
}

/// Values bound for one handler invocation.
///
/// Slots follow the order of the registration's argument specs. A slot is
/// empty when the value resolved to nothing and no default was given.
pub struct Arguments {
	connection_id: ArcStr,
	topic: ArcStr,
	names: Vec<ArcStr>,
	values: Vec<Option<Value>>,
}

impl Arguments {
	pub(crate) fn new(
		connection_id: ArcStr,
		topic: ArcStr,
		capacity: usize,
	) -> Self {
		Self {
			connection_id,
			topic,
			names: Vec::with_capacity(capacity),
			values: Vec::with_capacity(capacity),
		}
	}

	pub(crate) fn push(&mut self, name: ArcStr, value: Option<Value>) {
		self.names.push(name);
		self.values.push(value);
	}

	/// Connection the message arrived on.
	pub fn connection_id(&self) -> &str {
		&self.connection_id
	}

	/// Topic the message arrived on.
	pub fn topic(&self) -> &str {
		&self.topic
	}

	/// Number of slots.
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Returns true if the handler declares no arguments.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Borrows slot `index` as `T`.
	pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
		self.values
			.get(index)
			.and_then(Option::as_ref)
			.and_then(|value| value.downcast_ref::<T>())
	}

	/// Moves slot `index` out as `T`. The slot is left untouched when the
	/// type does not match.
	pub fn take<T: Any>(&mut self, index: usize) -> Option<T> {
		let slot = self.values.get_mut(index)?;
		if !slot.as_ref().is_some_and(|value| value.is::<T>()) {
			return None;
		}
		slot.take()
			.and_then(|value| value.downcast::<T>().ok())
			.map(|value| *value)
	}

	/// Borrows the slot bound to argument `name` as `T`.
	pub fn by_name<T: Any>(&self, name: &str) -> Option<&T> {
		let index = self.names.iter().position(|n| n == name)?;
		self.get(index)
	}
}

impl fmt::Debug for Arguments {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Arguments")
			.field("connection_id", &self.connection_id)
			.field("topic", &self.topic)
			.field("names", &self.names)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_infer_kind() {
		assert_eq!(
			ArgumentSpec::infer::<InboundMessage>("m").kind(),
			&ArgumentKind::RawMessage
		);
		assert_eq!(
			ArgumentSpec::infer::<String>("t").kind(),
			&ArgumentKind::RawTopic
		);
		assert_eq!(
			ArgumentSpec::infer::<f64>("v").kind(),
			&ArgumentKind::ImplicitPayload
		);
	}

	#[test]
	fn test_target_type() {
		assert!(TargetType::of::<u16>().is_numeric());
		assert!(TargetType::of::<f64>().is_numeric());
		assert!(!TargetType::of::<String>().is_numeric());
		assert!(TargetType::of::<bool>().is::<bool>());
	}

	#[test]
	fn test_defaults() {
		let spec = ArgumentSpec::path::<String>("id");
		assert!(spec.default_value().is_none());
		let spec = spec.or_default::<String>();
		let value = spec.default_value().unwrap();
		assert_eq!(value.downcast_ref::<String>().unwrap(), "");
		let spec = ArgumentSpec::topic("t").with_default("none".to_string());
		let value = spec.default_value().unwrap();
		assert_eq!(value.downcast_ref::<String>().unwrap(), "none");
	}

	#[test]
	fn test_primitives_default_to_zero() {
		let value = ArgumentSpec::payload::<i32>("v").default_value().unwrap();
		assert_eq!(value.downcast_ref::<i32>(), Some(&0));
		let value = ArgumentSpec::path::<f64>("v").default_value().unwrap();
		assert_eq!(value.downcast_ref::<f64>(), Some(&0.0));
		let value = ArgumentSpec::infer::<bool>("v").default_value().unwrap();
		assert_eq!(value.downcast_ref::<bool>(), Some(&false));
		let value = ArgumentSpec::path::<u8>("v")
			.with_default(9u8)
			.default_value()
			.unwrap();
		assert_eq!(value.downcast_ref::<u8>(), Some(&9));
		assert!(ArgumentSpec::raw_message("m").default_value().is_none());
	}

	#[test]
	fn test_arguments_access() {
		let mut args = Arguments::new("c".into(), "a/b".into(), 2);
		args.push("id".into(), Some(Box::new(7u32) as Value));
		args.push("missing".into(), None);
		assert_eq!(args.len(), 2);
		assert_eq!(args.get::<u32>(0), Some(&7));
		assert_eq!(args.get::<i64>(0), None);
		assert_eq!(args.by_name::<u32>("id"), Some(&7));
		assert_eq!(args.get::<u32>(1), None);
		assert_eq!(args.take::<String>(0), None);
		assert_eq!(args.take::<u32>(0), Some(7));
		assert_eq!(args.take::<u32>(0), None);
	}
}
