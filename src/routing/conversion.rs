//! Payload codecs and path-segment conversions selected by target type

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use arcstr::ArcStr;
use bytes::Bytes;
use tracing::debug;

use super::argument::{TargetType, Value};
use super::error::ConversionError;
use crate::message_serializer::{
	BytesSerializer, MessageSerializer, TextSerializer,
};

type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Value, String> + Send + Sync>;
type EncodeFn =
	Box<dyn Fn(&dyn Any) -> Option<Result<Vec<u8>, String>> + Send + Sync>;

struct CodecEntry {
	target: TargetType,
	codec: &'static str,
	decode: DecodeFn,
	encode: EncodeFn,
}

/// Registry of payload serializers keyed by payload type.
///
/// Several serializers may be registered for the same type; decoding tries
/// them in registration order and the first success wins, encoding uses the
/// first one that succeeds as well.
pub struct PayloadCodecs {
	entries: Vec<CodecEntry>,
}

impl PayloadCodecs {
	/// Creates a registry without any codec.
	pub fn empty() -> Self {
		Self {
			entries: Vec::new(),
		}
	}

	/// Registers `serializer` for payloads of type `T`.
	pub fn register<T, S>(&mut self, serializer: S) -> &mut Self
	where
		T: Any + Send + Sync,
		S: MessageSerializer<T>,
	{
		let decoder = serializer.clone();
		let decode: DecodeFn = Box::new(move |bytes: &[u8]| {
			decoder
				.deserialize(bytes)
				.map(|value| Box::new(value) as Value)
				.map_err(|err| format!("{err:?}"))
		});
		let encode: EncodeFn = Box::new(move |value: &dyn Any| {
			value.downcast_ref::<T>().map(|value| {
				serializer.serialize(value).map_err(|err| format!("{err:?}"))
			})
		});
		self.entries.push(CodecEntry {
			target: TargetType::of::<T>(),
			codec: std::any::type_name::<S>(),
			decode,
			encode,
		});
		self
	}

	/// Builder form of [`register`](Self::register).
	pub fn with<T, S>(mut self, serializer: S) -> Self
	where
		T: Any + Send + Sync,
		S: MessageSerializer<T>,
	{
		self.register::<T, S>(serializer);
		self
	}

	/// Returns true if some codec handles `target`.
	pub fn supports(&self, target: &TargetType) -> bool {
		self.entries.iter().any(|entry| entry.target == *target)
	}

	/// Decodes `bytes` into a value of type `target`.
	///
	/// `None` when no codec handles the type or every codec fails.
	pub fn decode(&self, target: &TargetType, bytes: &[u8]) -> Option<Value> {
		for entry in self.entries.iter().filter(|e| e.target == *target) {
			match (entry.decode)(bytes) {
				| Ok(value) => return Some(value),
				| Err(err) => {
					debug!(target_type = target.name(), codec = entry.codec, error = %err, "Payload decoding failed");
				}
			}
		}
		None
	}

	/// Typed form of [`decode`](Self::decode).
	pub fn decode_as<T: Any>(&self, bytes: &[u8]) -> Option<T> {
		self.decode(&TargetType::of::<T>(), bytes)
			.and_then(|value| value.downcast::<T>().ok())
			.map(|value| *value)
	}

	/// Encodes `value`. `None` when no codec for `T` produces bytes.
	pub fn encode<T: Any>(&self, value: &T) -> Option<Vec<u8>> {
		let target = TargetType::of::<T>();
		for entry in self.entries.iter().filter(|e| e.target == target) {
			match (entry.encode)(value) {
				| Some(Ok(bytes)) => return Some(bytes),
				| Some(Err(err)) => {
					debug!(target_type = target.name(), codec = entry.codec, error = %err, "Payload encoding failed");
				}
				| None => {}
			}
		}
		None
	}
}

impl Default for PayloadCodecs {
	/// Text codecs for strings, booleans and numbers, pass-through codecs
	/// for `Bytes` and `Vec<u8>`.
	fn default() -> Self {
		let mut codecs = Self::empty();
		codecs
			.register::<String, _>(TextSerializer)
			.register::<bool, _>(TextSerializer)
			.register::<i8, _>(TextSerializer)
			.register::<i16, _>(TextSerializer)
			.register::<i32, _>(TextSerializer)
			.register::<i64, _>(TextSerializer)
			.register::<i128, _>(TextSerializer)
			.register::<isize, _>(TextSerializer)
			.register::<u8, _>(TextSerializer)
			.register::<u16, _>(TextSerializer)
			.register::<u32, _>(TextSerializer)
			.register::<u64, _>(TextSerializer)
			.register::<u128, _>(TextSerializer)
			.register::<usize, _>(TextSerializer)
			.register::<f32, _>(TextSerializer)
			.register::<f64, _>(TextSerializer)
			.register::<Bytes, _>(BytesSerializer)
			.register::<Vec<u8>, _>(BytesSerializer);
		codecs
	}
}

impl fmt::Debug for PayloadCodecs {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list()
			.entries(self.entries.iter().map(|e| (e.target.name(), e.codec)))
			.finish()
	}
}

/// Converts path segments into typed argument values.
pub trait StringConversion: Send + Sync {
	/// Returns true if values of `target` can be produced.
	fn can_convert(&self, target: &TargetType) -> bool;

	/// Converts `raw` into a value of `target`.
	fn convert(
		&self,
		raw: &str,
		target: &TargetType,
	) -> Result<Value, ConversionError>;
}

type ParseFn = Box<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// `FromStr` based [`StringConversion`].
pub struct PathConversions {
	parsers: HashMap<TypeId, ParseFn>,
}

impl PathConversions {
	/// Creates a conversion table without any type.
	pub fn empty() -> Self {
		Self {
			parsers: HashMap::new(),
		}
	}

	/// Adds `T`, parsed with its `FromStr` implementation.
	pub fn register<T>(&mut self) -> &mut Self
	where
		T: FromStr + Any + Send + Sync,
		T::Err: Display,
	{
		self.parsers.insert(
			TypeId::of::<T>(),
			Box::new(|raw: &str| {
				raw.parse::<T>()
					.map(|value| Box::new(value) as Value)
					.map_err(|err| err.to_string())
			}),
		);
		self
	}

	/// Builder form of [`register`](Self::register).
	pub fn with<T>(mut self) -> Self
	where
		T: FromStr + Any + Send + Sync,
		T::Err: Display,
	{
		self.register::<T>();
		self
	}
}

impl Default for PathConversions {
	fn default() -> Self {
		let mut conversions = Self::empty();
		conversions
			.register::<String>()
			.register::<bool>()
			.register::<char>()
			.register::<i8>()
			.register::<i16>()
			.register::<i32>()
			.register::<i64>()
			.register::<i128>()
			.register::<isize>()
			.register::<u8>()
			.register::<u16>()
			.register::<u32>()
			.register::<u64>()
			.register::<u128>()
			.register::<usize>()
			.register::<f32>()
			.register::<f64>();
		conversions.parsers.insert(
			TypeId::of::<ArcStr>(),
			Box::new(|raw: &str| Ok(Box::new(ArcStr::from(raw)) as Value)),
		);
		conversions
	}
}

impl StringConversion for PathConversions {
	fn can_convert(&self, target: &TargetType) -> bool {
		self.parsers.contains_key(&target.id())
	}

	fn convert(
		&self,
		raw: &str,
		target: &TargetType,
	) -> Result<Value, ConversionError> {
		let parser = self.parsers.get(&target.id()).ok_or(
			ConversionError::Unsupported {
				type_name: target.name(),
			},
		)?;
		parser(raw).map_err(|reason| ConversionError::Parse {
			value: raw.to_string(),
			type_name: target.name(),
			reason,
		})
	}
}

impl fmt::Debug for PathConversions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PathConversions")
			.field("types", &self.parsers.len())
			.finish()
	}
}
