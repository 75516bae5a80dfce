//! Error types and utilities for the topic module
//!
//! This module contains the composite error type and shared constants
//! for the topic module, while individual error types remain in their
//! respective modules.

use thiserror::Error;

use super::topic_pattern_item::TopicPatternError;

/// Comprehensive error type for topic-related operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
	/// Topic template parsing or validation error
	#[error("Topic pattern error: {0}")]
	Pattern(#[from] TopicPatternError),

	/// Concrete topic name cannot be used for publishing
	#[error("Topic '{topic}' is invalid for publishing: {reason}")]
	InvalidTopicName {
		/// Offending topic
		topic: String,
		/// Why it was rejected
		reason: String,
	},
}

impl TopicError {
	/// Creates a new InvalidTopicName error
	pub fn invalid_topic_name(
		topic: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::InvalidTopicName {
			topic: topic.into(),
			reason: reason.into(),
		}
	}
}

/// Convenient Result type for topic operations
pub type TopicResult<T> = Result<T, TopicError>;

/// Convenient Result type for pattern operations
pub type PatternResult<T> = Result<T, TopicPatternError>;

/// Topic processing limits and constants
pub mod limits {
	/// Maximum encoded length of a topic name or filter
	pub const MAX_TOPIC_LENGTH: usize = 65_535;
}

/// Validation utilities for topic operations
pub mod validation {
	use super::limits::*;
	use super::{TopicError, TopicPatternError};

	/// Validates a concrete topic name used for publishing.
	pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
		if topic.trim().is_empty() {
			return Err(TopicError::invalid_topic_name(
				topic,
				"Topic is blank",
			));
		}
		if topic.len() > MAX_TOPIC_LENGTH {
			return Err(TopicError::invalid_topic_name(
				topic,
				format!("Topic too long: {} > {MAX_TOPIC_LENGTH}", topic.len()),
			));
		}
		if topic.chars().any(|c| matches!(c, '\0' | '#' | '+')) {
			return Err(TopicError::invalid_topic_name(
				topic,
				"Topic contains illegal characters ('#', '+', or null byte)",
			));
		}
		Ok(())
	}

	/// Validates a subscription filter in its wire (wildcard) form.
	pub fn validate_topic_filter(
		filter: &str,
	) -> Result<(), TopicPatternError> {
		if filter.trim().is_empty() {
			return Err(TopicPatternError::EmptyTopic);
		}
		if filter.len() > MAX_TOPIC_LENGTH {
			return Err(TopicPatternError::invalid_filter(
				filter,
				format!("longer than {MAX_TOPIC_LENGTH} bytes"),
			));
		}
		if filter.contains('\0') {
			return Err(TopicPatternError::invalid_filter(
				filter,
				"contains a null character",
			));
		}
		let levels: Vec<&str> = filter.split('/').collect();
		for (index, level) in levels.iter().enumerate() {
			match *level {
				| "#" if index + 1 != levels.len() => {
					return Err(TopicPatternError::hash_position(filter));
				}
				| "#" | "+" => {}
				| other if other.contains(['+', '#']) => {
					return Err(TopicPatternError::wildcard_usage(other));
				}
				| _ => {}
			}
		}
		Ok(())
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn test_topic_name_validation() {
			assert!(validate_topic_name("sensors/west/7").is_ok());
			assert!(validate_topic_name("").is_err());
			assert!(validate_topic_name("   ").is_err());
			assert!(validate_topic_name("sensors/+").is_err());
			assert!(validate_topic_name("sensors/#").is_err());
		}

		#[test]
		fn test_topic_filter_validation() {
			assert!(validate_topic_filter("sensors/+/data").is_ok());
			assert!(validate_topic_filter("#").is_ok());
			assert!(validate_topic_filter("$share/g/a/#").is_ok());
			assert_eq!(
				validate_topic_filter("a/#/b"),
				Err(TopicPatternError::hash_position("a/#/b"))
			);
			assert!(matches!(
				validate_topic_filter("a/b#"),
				Err(TopicPatternError::WildcardUsage { .. })
			));
			assert!(matches!(
				validate_topic_filter("a/\0"),
				Err(TopicPatternError::InvalidFilter { .. })
			));
		}
	}
}
