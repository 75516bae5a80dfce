use thiserror::Error;

use crate::topic::TopicPatternError;

/// Errors raised while turning a handler definition into a registration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
	/// A topic template could not be compiled
	#[error("Handler '{owner}' declares invalid topic '{topic}': {source}")]
	InvalidTopic {
		/// Handler owner identity
		owner: String,
		/// Template after placeholder substitution
		topic: String,
		/// Underlying pattern error
		source: TopicPatternError,
	},

	/// The definition has no topics at all
	#[error("Handler '{owner}' declares no topics")]
	NoTopics {
		/// Handler owner identity
		owner: String,
	},

	/// `${key}` placeholder without a value or default
	#[error("Unresolved placeholder '${{{key}}}' in '{text}'")]
	UnresolvedPlaceholder {
		/// Placeholder key
		key: String,
		/// Text containing the placeholder
		text: String,
	},
}

impl RegistrationError {
	/// Creates a new InvalidTopic error
	pub fn invalid_topic(
		owner: impl Into<String>,
		topic: impl Into<String>,
		source: TopicPatternError,
	) -> Self {
		Self::InvalidTopic {
			owner: owner.into(),
			topic: topic.into(),
			source,
		}
	}

	/// Creates a new UnresolvedPlaceholder error
	pub fn unresolved_placeholder(
		key: impl Into<String>,
		text: impl Into<String>,
	) -> Self {
		Self::UnresolvedPlaceholder {
			key: key.into(),
			text: text.into(),
		}
	}

	/// Returns the error type for categorization
	pub fn error_type(&self) -> &'static str {
		match self {
			| RegistrationError::InvalidTopic { .. } => "invalid_topic",
			| RegistrationError::NoTopics { .. } => "no_topics",
			| RegistrationError::UnresolvedPlaceholder { .. } => {
				"unresolved_placeholder"
			}
		}
	}
}

/// Failure to turn a path segment into the argument's type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
	/// No conversion is registered for the target type
	#[error("No string conversion registered for type {type_name}")]
	Unsupported {
		/// Target type name
		type_name: &'static str,
	},

	/// The value does not parse as the target type
	#[error("Cannot convert '{value}' to {type_name}: {reason}")]
	Parse {
		/// Raw path segment
		value: String,
		/// Target type name
		type_name: &'static str,
		/// Parser message
		reason: String,
	},
}

/// Error returned by an application handler
#[derive(Debug, Error)]
pub enum HandlerError {
	/// Handler rejected the message
	#[error("{0}")]
	Message(String),

	/// Any other error raised by application code
	#[error(transparent)]
	Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
	/// Creates a handler error from a message
	pub fn msg(message: impl Into<String>) -> Self {
		Self::Message(message.into())
	}
}
