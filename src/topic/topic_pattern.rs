//! Compiled topic templates with named path parameters

use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};

use arcstr::ArcStr;
use regex::Regex;
use rumqttc::QoS;
use smallvec::SmallVec;

use super::topic_filter;
use super::topic_pattern_item::{
	PARAM_PLACEHOLDER, TopicPatternError, TopicPatternItem,
};
use super::validation;

/// Capture for a parameter of any type: one non-empty level.
const STRING_CAPTURE: &str = "([^/]+)";
/// Capture for a parameter bound to a numeric argument.
const NUMBER_CAPTURE: &str = r"(\d+(?:\.\d+)?)";

/// How the value of a named parameter is going to be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
	/// Any non-empty level
	#[default]
	Text,
	/// Digits with an optional fractional part
	Numeric,
}

/// Named parameter and the capture group holding its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParam {
	/// Parameter name as written between the braces
	pub name: ArcStr,
	/// Capture group index in the compiled matcher
	pub index: usize,
}

/// Rewrites a filter into the broker's shared-subscription syntax.
pub trait SharedSubscriptionStrategy: Send + Sync {
	/// Returns the filter to subscribe with for a shared pattern.
	fn shared_filter(&self, filter: &str, group: Option<&str>) -> String;
}

/// `$share/{group}/filter` when a group is set, `$queue/filter` otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShareGroupStrategy;

impl SharedSubscriptionStrategy for ShareGroupStrategy {
	fn shared_filter(&self, filter: &str, group: Option<&str>) -> String {
		match group.map(str::trim).filter(|g| !g.is_empty()) {
			| Some(group) => format!("$share/{group}/{filter}"),
			| None => format!("$queue/{filter}"),
		}
	}
}

/// Compiled topic template.
///
/// `sensors/{zone}/{id}` compiles to the wire filter `sensors/+/+` and a
/// matcher capturing `zone` and `id`. Templates without parameters are
/// matched with plain filter semantics.
///
/// Equality and hashing only consider the wire filter, so the same topic
/// declared twice with different QoS is one pattern.
#[derive(Debug, Clone)]
pub struct TopicPattern {
	template: ArcStr,
	literal: ArcStr,
	segments: Vec<TopicPatternItem>,
	matcher: Option<Regex>,
	params: SmallVec<[TopicParam; 4]>,
	qos: QoS,
	shared: bool,
	group: Option<ArcStr>,
}

impl TopicPattern {
	/// Compiles a template with QoS 1, not shared and text parameters.
	pub fn new(template: impl Into<ArcStr>) -> Result<Self, TopicPatternError> {
		Self::compile(template, QoS::AtLeastOnce, false, None, &HashMap::new())
	}

	/// Compiles a template.
	///
	/// `param_types` tells which parameters are bound to numeric arguments;
	/// those only match digits.
	pub fn compile(
		template: impl Into<ArcStr>,
		qos: QoS,
		shared: bool,
		group: Option<ArcStr>,
		param_types: &HashMap<String, ParamType>,
	) -> Result<Self, TopicPatternError> {
		let template = template.into();
		if template.trim().is_empty() {
			return Err(TopicPatternError::EmptyTopic);
		}

		let segments = template
			.split('/')
			.map(|s| TopicPatternItem::try_from(template.substr_from(s)))
			.collect::<Result<Vec<_>, _>>()?;

		if let Some(hash_pos) = segments
			.iter()
			.position(|s| matches!(s, TopicPatternItem::Hash))
		{
			if hash_pos != segments.len() - 1 {
				return Err(TopicPatternError::hash_position(
					template.as_str(),
				));
			}
		}

		let mut seen_names = HashSet::new();
		for name in segments.iter().flat_map(|s| s.param_names()) {
			if !seen_names.insert(name.as_str()) {
				return Err(TopicPatternError::duplicate_parameter(
					name.as_str(),
					template.as_str(),
				));
			}
		}

		let literal = ArcStr::from(Self::to_literal(&segments));
		validation::validate_topic_filter(&literal)?;

		let (matcher, params) = if seen_names.is_empty() {
			(None, SmallVec::new())
		} else {
			let (matcher, params) =
				Self::build_matcher(&template, &segments, param_types)?;
			(Some(matcher), params)
		};

		Ok(Self {
			template,
			literal,
			segments,
			matcher,
			params,
			qos,
			shared,
			group: group.filter(|g| !g.trim().is_empty()),
		})
	}

	fn to_literal(segments: &[TopicPatternItem]) -> String {
		let mut literal = String::new();
		for (i, segment) in segments.iter().enumerate() {
			if i > 0 {
				literal.push('/');
			}
			literal.push_str(segment.as_literal());
		}
		literal
	}

	fn build_matcher(
		template: &str,
		segments: &[TopicPatternItem],
		param_types: &HashMap<String, ParamType>,
	) -> Result<(Regex, SmallVec<[TopicParam; 4]>), TopicPatternError> {
		let mut expr = String::with_capacity(template.len() * 2 + 2);
		let mut params = SmallVec::new();
		let mut group = 1;
		expr.push('^');
		for (i, segment) in segments.iter().enumerate() {
			let separator = if i > 0 { "/" } else { "" };
			match segment {
				| TopicPatternItem::Hash => {
					expr.push_str(if i > 0 { "(?:/.*)?" } else { ".*" });
				}
				| TopicPatternItem::Plus => {
					expr.push_str(separator);
					expr.push_str("[^/]*");
				}
				| TopicPatternItem::Str(s) => {
					expr.push_str(separator);
					expr.push_str(&regex::escape(s));
				}
				| TopicPatternItem::Named { level, .. } => {
					expr.push_str(separator);
					let mut last = 0;
					for captures in PARAM_PLACEHOLDER.captures_iter(level) {
						let (Some(whole), Some(name)) =
							(captures.get(0), captures.get(1))
						else {
							continue;
						};
						expr.push_str(&regex::escape(
							&level[last .. whole.start()],
						));
						let capture = match param_types.get(name.as_str()) {
							| Some(ParamType::Numeric) => NUMBER_CAPTURE,
							| _ => STRING_CAPTURE,
						};
						expr.push_str(capture);
						params.push(TopicParam {
							name: ArcStr::from(name.as_str()),
							index: group,
						});
						group += 1;
						last = whole.end();
					}
					expr.push_str(&regex::escape(&level[last ..]));
				}
			}
		}
		expr.push('$');
		let matcher = Regex::new(&expr).map_err(|err| {
			TopicPatternError::invalid_filter(template, err.to_string())
		})?;
		Ok((matcher, params))
	}

	/// Returns the same pattern with another QoS.
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Returns the same pattern marked as a shared subscription.
	pub fn with_shared(mut self, group: Option<ArcStr>) -> Self {
		self.shared = true;
		self.group = group.filter(|g| !g.trim().is_empty());
		self
	}

	/// Template as declared (after placeholder substitution).
	pub fn template(&self) -> &ArcStr {
		&self.template
	}

	/// Wildcard form used on the wire and for plain matching.
	pub fn literal(&self) -> &ArcStr {
		&self.literal
	}

	/// Parsed template levels.
	pub fn segments(&self) -> &[TopicPatternItem] {
		&self.segments
	}

	/// Named parameters in declaration order.
	pub fn params(&self) -> &[TopicParam] {
		&self.params
	}

	/// Returns true if the template declares named parameters.
	pub fn is_parameterized(&self) -> bool {
		self.matcher.is_some()
	}

	/// Requested subscription QoS.
	pub fn qos(&self) -> QoS {
		self.qos
	}

	/// Returns true if the pattern asks for a shared subscription.
	pub fn is_shared(&self) -> bool {
		self.shared
	}

	/// Shared subscription group, if any.
	pub fn group(&self) -> Option<&ArcStr> {
		self.group.as_ref()
	}

	/// Sort key: parameterized patterns first, more parameters first.
	pub fn order(&self) -> i32 {
		match self.matcher {
			| Some(_) => -(self.params.len() as i32),
			| None => 1,
		}
	}

	/// Filter to subscribe with. `sharing` is `None` when shared
	/// subscriptions are disabled for the connection.
	pub fn wire_topic(
		&self,
		sharing: Option<&dyn SharedSubscriptionStrategy>,
	) -> ArcStr {
		match sharing {
			| Some(strategy) if self.shared => ArcStr::from(
				strategy.shared_filter(
					&self.literal,
					self.group.as_ref().map(ArcStr::as_str),
				),
			),
			| _ => self.literal.clone(),
		}
	}

	/// Returns true if `topic` is matched by this pattern.
	pub fn matches(&self, topic: &str) -> bool {
		match &self.matcher {
			| Some(matcher) => matcher.is_match(topic),
			| None => topic_filter::is_matched(&self.literal, topic),
		}
	}

	/// Extracts named parameter values from a matching topic.
	///
	/// Empty when the pattern has no parameters or the topic does not match.
	pub fn extract_params(&self, topic: &str) -> HashMap<ArcStr, String> {
		let mut values = HashMap::new();
		let Some(captures) =
			self.matcher.as_ref().and_then(|m| m.captures(topic))
		else {
			return values;
		};
		for param in &self.params {
			if let Some(value) = captures.get(param.index) {
				values.insert(param.name.clone(), value.as_str().to_string());
			}
		}
		values
	}
}

impl PartialEq for TopicPattern {
	fn eq(&self, other: &Self) -> bool {
		self.literal == other.literal
	}
}

impl Eq for TopicPattern {}

impl Hash for TopicPattern {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.literal.hash(state);
	}
}

impl fmt::Display for TopicPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.template)
	}
}

impl TryFrom<&str> for TopicPattern {
	type Error = TopicPatternError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl TryFrom<String> for TopicPattern {
	type Error = TopicPatternError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl TryFrom<ArcStr> for TopicPattern {
	type Error = TopicPatternError;

	fn try_from(value: ArcStr) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
