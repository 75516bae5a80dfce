//! Handler registry and the reduction of its topics to wire subscriptions

use std::collections::HashSet;
use std::sync::Arc;

use arcstr::ArcStr;
use tracing::{debug, info, warn};

use super::error::RegistrationError;
use super::registration::{HandlerDefinition, HandlerRegistration, Placeholders};
use crate::topic::{SharedSubscriptionStrategy, TopicPattern, topic_filter};
use crate::transport::WireSubscription;

/// Ordered set of handler registrations.
///
/// Built once at startup, then frozen behind an `Arc` and shared with the
/// dispatcher and the connection manager.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	registrations: Vec<Arc<HandlerRegistration>>,
	placeholders: Placeholders,
}

impl SubscriptionRegistry {
	/// Creates an empty registry resolving placeholders from the
	/// environment.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an empty registry with explicit placeholder values.
	pub fn with_placeholders(placeholders: Placeholders) -> Self {
		Self {
			registrations: Vec::new(),
			placeholders,
		}
	}

	/// Compiles and registers a handler.
	///
	/// Returns `Ok(false)` if a handler with the same owner is already
	/// registered. A definition that fails to compile is logged and left
	/// out; the error is returned so callers may stop if they want to.
	pub fn register(
		&mut self,
		definition: HandlerDefinition,
	) -> Result<bool, RegistrationError> {
		let owner = definition.owner().clone();
		match HandlerRegistration::compile(definition, &self.placeholders) {
			| Ok(registration) => Ok(self.insert(registration)),
			| Err(err) => {
				warn!(owner = %owner, error = %err, error_type = err.error_type(), "Skipping handler registration");
				Err(err)
			}
		}
	}

	/// Adds an already compiled registration, keeping priority order stable.
	pub fn insert(&mut self, registration: HandlerRegistration) -> bool {
		if self
			.registrations
			.iter()
			.any(|existing| existing.owner() == registration.owner())
		{
			debug!(owner = %registration.owner(), "Handler already registered");
			return false;
		}
		let position = self
			.registrations
			.iter()
			.position(|existing| existing.priority() > registration.priority())
			.unwrap_or(self.registrations.len());
		debug!(owner = %registration.owner(), priority = registration.priority(), "Handler registered");
		self.registrations.insert(position, Arc::new(registration));
		true
	}

	/// Registrations in dispatch order.
	pub fn registrations(&self) -> &[Arc<HandlerRegistration>] {
		&self.registrations
	}

	/// Number of registrations.
	pub fn len(&self) -> usize {
		self.registrations.len()
	}

	/// Returns true if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.registrations.is_empty()
	}

	/// Patterns of every handler applying to `connection_id`, one per wire
	/// filter, first declaration wins.
	pub fn patterns_for(&self, connection_id: &str) -> Vec<TopicPattern> {
		let mut seen = HashSet::new();
		self.registrations
			.iter()
			.filter(|registration| registration.applies_to(connection_id))
			.flat_map(|registration| registration.topics())
			.filter(|pattern| seen.insert(pattern.literal().clone()))
			.cloned()
			.collect()
	}

	/// Wire subscriptions for `connection_id`.
	///
	/// `sharing` is `None` when shared subscriptions are disabled for the
	/// connection.
	pub fn resolve(
		&self,
		connection_id: &str,
		sharing: Option<&dyn SharedSubscriptionStrategy>,
	) -> Vec<WireSubscription> {
		let patterns = self.patterns_for(connection_id);
		if patterns.is_empty() {
			return Vec::new();
		}
		let subscriptions = merge_topics(&patterns, sharing);
		info!(
			client_id = connection_id,
			declared = patterns.len(),
			merged = subscriptions.len(),
			"Resolved subscriptions"
		);
		subscriptions
	}
}

/// First-fit reduction of patterns to wire subscriptions.
///
/// Each candidate scans the slots in order. Slots with another QoS are
/// skipped. A candidate whose filter covers the slot's filter takes the slot
/// over and keeps scanning; a slot whose filter covers the candidate ends
/// the scan; an empty slot receives the candidate and ends the scan. Covering
/// is tested by matching one filter against the other with `+` and `#`
/// replaced by sentinel levels. Slots that end up equal collapse, first
/// position kept.
///
/// The result depends on input order when filters overlap partially.
pub fn merge_topics(
	patterns: &[TopicPattern],
	sharing: Option<&dyn SharedSubscriptionStrategy>,
) -> Vec<WireSubscription> {
	let mut slots: Vec<Option<WireSubscription>> = vec![None; patterns.len()];
	for pattern in patterns {
		let candidate: ArcStr = pattern.wire_topic(sharing);
		for slot in slots.iter_mut() {
			let Some(existing) = slot.as_ref() else {
				*slot =
					Some(WireSubscription::new(candidate.clone(), pattern.qos()));
				break;
			};
			if existing.qos != pattern.qos() {
				continue;
			}
			if topic_filter::subsumes(&candidate, &existing.topic_filter) {
				*slot =
					Some(WireSubscription::new(candidate.clone(), pattern.qos()));
				continue;
			}
			if topic_filter::subsumes(&existing.topic_filter, &candidate) {
				break;
			}
		}
	}

	let mut merged: Vec<WireSubscription> = Vec::with_capacity(slots.len());
	for subscription in slots.into_iter().flatten() {
		if !merged.contains(&subscription) {
			merged.push(subscription);
		}
	}
	merged
}
