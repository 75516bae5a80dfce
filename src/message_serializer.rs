//! Message serialization traits and implementations.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use bincode::{Decode, Encode};
use bytes::Bytes;
use thiserror::Error;

/// Trait for serializing and deserializing MQTT message payloads.
///
/// Implement this trait to use custom serialization formats. Serializers are
/// registered per payload type in
/// [`PayloadCodecs`](crate::routing::PayloadCodecs).
pub trait MessageSerializer<T>:
	Default + Clone + Send + Sync + 'static
{
	/// Error type for serialization failures
	type SerializeError: Debug + Send + Sync + 'static;
	/// Error type for deserialization failures
	type DeserializeError: Debug + Send + Sync + 'static;

	/// Convert data to bytes for MQTT transmission
	fn serialize(&self, data: &T) -> Result<Vec<u8>, Self::SerializeError>;
	/// Convert bytes from MQTT into typed data
	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError>;
}

/// Serializer using bincode format.
///
/// Requires types to implement `bincode::Encode` and `bincode::Decode`.
#[derive(Clone, Default)]
pub struct BincodeSerializer {
	config: bincode::config::Configuration,
}

impl BincodeSerializer {
	/// Creates a new serializer with default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a serializer with custom bincode configuration.
	pub fn with_config(config: bincode::config::Configuration) -> Self {
		Self { config }
	}
}

impl<T> MessageSerializer<T> for BincodeSerializer
where T: Encode + Decode<()> + 'static
{
	type SerializeError = bincode::error::EncodeError;
	type DeserializeError = bincode::error::DecodeError;

	fn serialize(&self, data: &T) -> Result<Vec<u8>, Self::SerializeError> {
		bincode::encode_to_vec(data, self.config)
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError> {
		bincode::decode_from_slice(bytes, self.config).map(|(value, _)| value)
	}
}

/// Failure to read a UTF-8 text payload.
#[derive(Error, Debug)]
pub enum TextDecodeError<E: Debug> {
	/// Payload is not valid UTF-8
	#[error("payload is not valid UTF-8: {0}")]
	Utf8(#[from] std::str::Utf8Error),
	/// Text could not be parsed into the target type
	#[error("cannot parse payload: {0:?}")]
	Parse(E),
}

/// UTF-8 text serializer for anything with `FromStr` and `Display`.
///
/// Covers `String`, numbers and `bool`. Parsing does not trim.
#[derive(Clone, Copy, Default, Debug)]
pub struct TextSerializer;

impl<T> MessageSerializer<T> for TextSerializer
where
	T: FromStr + Display + 'static,
	T::Err: Debug + Send + Sync + 'static,
{
	type SerializeError = std::convert::Infallible;
	type DeserializeError = TextDecodeError<T::Err>;

	fn serialize(&self, data: &T) -> Result<Vec<u8>, Self::SerializeError> {
		Ok(data.to_string().into_bytes())
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError> {
		let text = std::str::from_utf8(bytes)?;
		text.parse().map_err(TextDecodeError::Parse)
	}
}

/// Pass-through serializer for raw payloads.
#[derive(Clone, Copy, Default, Debug)]
pub struct BytesSerializer;

impl MessageSerializer<Bytes> for BytesSerializer {
	type SerializeError = std::convert::Infallible;
	type DeserializeError = std::convert::Infallible;

	fn serialize(&self, data: &Bytes) -> Result<Vec<u8>, Self::SerializeError> {
		Ok(data.to_vec())
	}

	fn deserialize(
		&self,
		bytes: &[u8],
	) -> Result<Bytes, Self::DeserializeError> {
		Ok(Bytes::copy_from_slice(bytes))
	}
}

impl MessageSerializer<Vec<u8>> for BytesSerializer {
	type SerializeError = std::convert::Infallible;
	type DeserializeError = std::convert::Infallible;

	fn serialize(
		&self,
		data: &Vec<u8>,
	) -> Result<Vec<u8>, Self::SerializeError> {
		Ok(data.clone())
	}

	fn deserialize(
		&self,
		bytes: &[u8],
	) -> Result<Vec<u8>, Self::DeserializeError> {
		Ok(bytes.to_vec())
	}
}

/// JSON serializer backed by `serde_json`.
#[cfg(feature = "json")]
#[derive(Clone, Copy, Default, Debug)]
pub struct JsonSerializer;

#[cfg(feature = "json")]
impl<T> MessageSerializer<T> for JsonSerializer
where T: serde::Serialize + serde::de::DeserializeOwned + 'static
{
	type SerializeError = serde_json::Error;
	type DeserializeError = serde_json::Error;

	fn serialize(&self, data: &T) -> Result<Vec<u8>, Self::SerializeError> {
		serde_json::to_vec(data)
	}

	fn deserialize(&self, bytes: &[u8]) -> Result<T, Self::DeserializeError> {
		serde_json::from_slice(bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_text_serializer_numbers() {
		let bytes = MessageSerializer::<i64>::serialize(&TextSerializer, &-12)
			.unwrap();
		assert_eq!(bytes, b"-12");
		let value: f64 = TextSerializer.deserialize(b"21.5").unwrap();
		assert_eq!(value, 21.5);
		let err = MessageSerializer::<u32>::deserialize(&TextSerializer, b"x");
		assert!(matches!(err, Err(TextDecodeError::Parse(_))));
	}

	#[test]
	fn test_text_serializer_rejects_invalid_utf8() {
		let err =
			MessageSerializer::<String>::deserialize(&TextSerializer, &[0xff]);
		assert!(matches!(err, Err(TextDecodeError::Utf8(_))));
	}

	#[test]
	fn test_bincode_serializer() {
		let serializer = BincodeSerializer::new();
		let bytes = serializer.serialize(&(7u32, true)).unwrap();
		let value: (u32, bool) = serializer.deserialize(&bytes).unwrap();
		assert_eq!(value, (7, true));
	}

	#[cfg(feature = "json")]
	#[test]
	fn test_json_serializer() {
		#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
		struct Reading {
			celsius: f32,
		}
		let value: Reading =
			JsonSerializer.deserialize(br#"{"celsius":21.5}"#).unwrap();
		assert_eq!(value, Reading { celsius: 21.5 });
	}
}
