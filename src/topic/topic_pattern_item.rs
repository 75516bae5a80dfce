//! Topic template levels and the errors produced while parsing them

use std::convert::TryFrom;
use std::sync::LazyLock;

use arcstr::Substr;
use regex::Regex;
use smallvec::SmallVec;
use thiserror::Error;

/// `{name}` placeholder inside a template level.
pub(crate) static PARAM_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\{(\w*)\}").expect("placeholder regex is valid")
});

/// Error types for topic template parsing (the invalid-topic condition)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicPatternError {
	/// Hash wildcard (#) used not at the end of the pattern
	#[error(
		"Invalid topic pattern '{pattern}': # wildcard can only be the last \
		 segment"
	)]
	HashPosition {
		/// The invalid pattern
		pattern: String,
	},

	/// Wildcard characters (+ or #) used incorrectly
	#[error("Invalid wildcard usage: {usage}")]
	WildcardUsage {
		/// Description of invalid usage
		usage: String,
	},

	/// Empty topic is not valid
	#[error("Topic pattern cannot be empty")]
	EmptyTopic,

	/// The same parameter name appears twice in one template
	#[error("Parameter '{name}' is declared more than once in '{pattern}'")]
	DuplicateParameter {
		/// Repeated parameter name
		name: String,
		/// Template containing the duplicate
		pattern: String,
	},

	/// Filter breaks a protocol limit (length, NUL character)
	#[error("Invalid topic filter '{filter}': {reason}")]
	InvalidFilter {
		/// Offending filter
		filter: String,
		/// What is wrong with it
		reason: String,
	},
}

impl TopicPatternError {
	/// Creates a new HashPosition error
	pub fn hash_position(pattern: impl Into<String>) -> Self {
		Self::HashPosition {
			pattern: pattern.into(),
		}
	}

	/// Creates a new WildcardUsage error
	pub fn wildcard_usage(usage: impl Into<String>) -> Self {
		Self::WildcardUsage {
			usage: usage.into(),
		}
	}

	/// Creates a new DuplicateParameter error
	pub fn duplicate_parameter(
		name: impl Into<String>,
		pattern: impl Into<String>,
	) -> Self {
		Self::DuplicateParameter {
			name: name.into(),
			pattern: pattern.into(),
		}
	}

	/// Creates a new InvalidFilter error
	pub fn invalid_filter(
		filter: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::InvalidFilter {
			filter: filter.into(),
			reason: reason.into(),
		}
	}

	/// Returns the error type for categorization
	pub fn error_type(&self) -> &'static str {
		match self {
			| TopicPatternError::HashPosition { .. } => "hash_position",
			| TopicPatternError::WildcardUsage { .. } => "wildcard_usage",
			| TopicPatternError::EmptyTopic => "empty_topic",
			| TopicPatternError::DuplicateParameter { .. } => {
				"duplicate_parameter"
			}
			| TopicPatternError::InvalidFilter { .. } => "invalid_filter",
		}
	}
}

/// One level of a topic template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPatternItem {
	/// Literal level
	Str(Substr),
	/// Single-level wildcard `+`
	Plus,
	/// Multi-level wildcard `#`
	Hash,
	/// Level holding one or more `{name}` placeholders, e.g. `{id}` or
	/// `dev-{id}`
	Named {
		/// Whole level text
		level: Substr,
		/// Placeholder names in order of appearance
		params: SmallVec<[Substr; 2]>,
	},
}

impl TopicPatternItem {
	/// Returns the wire (wildcard) form of this level.
	pub fn as_literal(&self) -> &str {
		match self {
			| TopicPatternItem::Str(s) => s,
			| TopicPatternItem::Plus | TopicPatternItem::Named { .. } => "+",
			| TopicPatternItem::Hash => "#",
		}
	}

	/// Returns the level as written in the template.
	pub fn as_template(&self) -> &str {
		match self {
			| TopicPatternItem::Named { level, .. } => level,
			| other => other.as_literal(),
		}
	}

	/// Returns parameter names declared by this level.
	pub fn param_names(&self) -> &[Substr] {
		match self {
			| TopicPatternItem::Named { params, .. } => params,
			| _ => &[],
		}
	}

	/// Returns true if this level is `+` or `#`.
	pub fn is_wildcard(&self) -> bool {
		matches!(self, TopicPatternItem::Plus | TopicPatternItem::Hash)
	}
}

impl std::fmt::Display for TopicPatternItem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_template())
	}
}

impl TryFrom<Substr> for TopicPatternItem {
	type Error = TopicPatternError;
	fn try_from(item: Substr) -> Result<Self, Self::Error> {
		let res = match item.as_str() {
			| "+" => TopicPatternItem::Plus,
			| "#" => TopicPatternItem::Hash,
			| s if PARAM_PLACEHOLDER.is_match(s) => {
				let mut params = SmallVec::new();
				for captures in PARAM_PLACEHOLDER.captures_iter(s) {
					let Some(name) = captures.get(1) else {
						continue;
					};
					if name.as_str().is_empty() {
						return Err(TopicPatternError::wildcard_usage(
							format!("empty parameter name in '{s}'"),
						));
					}
					params.push(item.substr(name.range()));
				}
				if s.contains(['+', '#']) {
					return Err(TopicPatternError::wildcard_usage(s));
				}
				TopicPatternItem::Named {
					level: item.clone(),
					params,
				}
			}
			| s if s.contains(['+', '#']) => {
				return Err(TopicPatternError::wildcard_usage(s));
			}
			| _ => TopicPatternItem::Str(item),
		};
		Ok(res)
	}
}
