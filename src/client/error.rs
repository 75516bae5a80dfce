use thiserror::Error;

use super::config::ConfigError;
use crate::routing::RegistrationError;
use crate::topic::{TopicError, TopicPatternError};
use crate::transport::TransportError;

/// Errors surfaced to callers of the router
#[derive(Debug, Error)]
pub enum RouterError {
	/// The target connection does not exist, or no connection exists at
	/// all when the default was requested
	#[error("{}", unresolved_message(.id))]
	UnresolvedConnection {
		/// Requested id, `None` for the default connection
		id: Option<String>,
	},

	/// A call argument was rejected before reaching the transport
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// Invalid topic name or filter
	#[error("Topic error: {0}")]
	Topic(#[from] TopicError),

	/// Handler registration failed
	#[error("Registration error: {0}")]
	Registration(#[from] RegistrationError),

	/// Configuration could not be loaded or is invalid
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	/// Transport could not be created
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),
}

fn unresolved_message(id: &Option<String>) -> String {
	match id {
		| Some(id) => format!("Unresolved connection '{id}'"),
		| None => "No connection available".to_string(),
	}
}

impl RouterError {
	/// Creates an UnresolvedConnection error for an explicit id
	pub fn unresolved_connection(id: impl Into<String>) -> Self {
		Self::UnresolvedConnection {
			id: Some(id.into()),
		}
	}

	/// Creates an UnresolvedConnection error for the default connection
	pub fn no_connection() -> Self {
		Self::UnresolvedConnection { id: None }
	}

	/// Creates an InvalidArgument error
	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::InvalidArgument(message.into())
	}

	/// Returns the error type for categorization
	pub fn error_type(&self) -> &'static str {
		match self {
			| RouterError::UnresolvedConnection { .. } => "unresolved_connection",
			| RouterError::InvalidArgument(_) => "invalid_argument",
			| RouterError::Topic(_) => "topic",
			| RouterError::Registration(_) => "registration",
			| RouterError::Config(_) => "config",
			| RouterError::Transport(_) => "transport",
		}
	}
}

impl From<TopicPatternError> for RouterError {
	fn from(err: TopicPatternError) -> Self {
		RouterError::Topic(TopicError::from(err))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unresolved_connection_display() {
		assert_eq!(
			RouterError::unresolved_connection("alpha").to_string(),
			"Unresolved connection 'alpha'"
		);
		assert_eq!(
			RouterError::no_connection().to_string(),
			"No connection available"
		);
		assert_eq!(
			RouterError::no_connection().error_type(),
			"unresolved_connection"
		);
	}

	#[test]
	fn test_pattern_error_converts() {
		let err: RouterError = TopicPatternError::EmptyTopic.into();
		assert!(matches!(err, RouterError::Topic(TopicError::Pattern(_))));
	}
}
