//! Standard MQTT topic filter matching
//!
//! `+` matches exactly one level, `#` matches the remainder of the topic
//! (zero or more levels) and is only meaningful as the last filter level.

/// Character standing in for a wildcard when one filter is tested against
/// another filter.
pub const WILDCARD_SENTINEL: char = '\0';

/// Returns true if `topic` is matched by `filter`.
///
/// The filter is expected to be valid; a `#` in the middle of a filter
/// matches everything after it.
pub fn is_matched(filter: &str, topic: &str) -> bool {
	if filter == topic {
		return true;
	}
	let mut filter_levels = filter.split('/');
	let mut topic_levels = topic.split('/');
	loop {
		match (filter_levels.next(), topic_levels.next()) {
			| (Some("#"), _) => return true,
			| (Some("+"), Some(_)) => {}
			| (Some(expected), Some(found)) if expected == found => {}
			| (None, None) => return true,
			| _ => return false,
		}
	}
}

/// Turns a filter into a concrete topic name by replacing `+` with the
/// sentinel level and `#` with two sentinel levels.
///
/// A filter `a` subsumes a filter `b` when `is_matched(a,
/// &sentinel_form(b))` holds.
pub fn sentinel_form(filter: &str) -> String {
	let mut out = String::with_capacity(filter.len() + 2);
	for ch in filter.chars() {
		match ch {
			| '+' => out.push(WILDCARD_SENTINEL),
			| '#' => {
				out.push(WILDCARD_SENTINEL);
				out.push('/');
				out.push(WILDCARD_SENTINEL);
			}
			| other => out.push(other),
		}
	}
	out
}

/// Returns true if every topic matched by `narrow` is also matched by
/// `wide` (as far as the sentinel test can tell).
pub fn subsumes(wide: &str, narrow: &str) -> bool {
	is_matched(wide, &sentinel_form(narrow))
}
