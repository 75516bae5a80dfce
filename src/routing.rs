//! Message routing and subscription management module
//!
//! Handlers are declared as [`HandlerDefinition`]s, compiled into
//! [`HandlerRegistration`]s held by the [`SubscriptionRegistry`], reduced to
//! wire subscriptions per connection by [`merge_topics`] and invoked by the
//! [`Dispatcher`] when a message arrives.

pub mod argument;
pub mod conversion;
pub mod dispatcher;
/// Routing error types
pub mod error;
pub mod registration;
pub mod subscription_registry;

pub use argument::{
	ArgumentKind, ArgumentSpec, Arguments, PayloadConverter, TargetType, Value,
};
pub use conversion::{PathConversions, PayloadCodecs, StringConversion};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{ConversionError, HandlerError, RegistrationError};
pub use registration::{
	HandlerDefinition, HandlerFn, HandlerRegistration, OwnerIdentity,
	Placeholders,
};
pub use subscription_registry::{SubscriptionRegistry, merge_topics};
