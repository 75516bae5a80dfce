//! Topic handling module
//!
//! This module provides components for working with MQTT topic templates,
//! including parsing, compiling them into wire filters and matchers, and
//! testing filters against topics and against each other.

// Submodules
pub mod error;
pub mod topic_filter;
/// Topic template compilation and matching
pub mod topic_pattern;
pub mod topic_pattern_item;


// Re-export commonly used types for convenience
pub use error::{PatternResult, TopicError, TopicResult};
// Re-export constants and validation utilities
pub use error::{limits, validation};
pub use topic_pattern::{
	ParamType, ShareGroupStrategy, SharedSubscriptionStrategy, TopicParam,
	TopicPattern,
};
pub use topic_pattern_item::{TopicPatternError, TopicPatternItem};
