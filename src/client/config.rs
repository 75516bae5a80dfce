//! Configuration for the router and its connections
//!
//! Everything can be loaded from TOML:
//!
//! ```toml
//! default_client_id = "plant"
//!
//! [settings]
//! reconnect_workers = 2
//!
//! [connections.plant]
//! server_uris = ["tcp://localhost:1883"]
//! default_publish_qos = 1
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rumqttc::{MqttOptions, OptionError, QoS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::transport::TransportError;

/// Errors while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Configuration file could not be read
	#[error("Cannot read configuration '{path}': {source}")]
	Io {
		/// File that was read
		path: String,
		/// Underlying IO error
		source: std::io::Error,
	},

	/// Configuration is not valid TOML for the schema
	#[error("Cannot parse configuration: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value is out of range or inconsistent
	#[error("Invalid configuration for '{scope}': {reason}")]
	Invalid {
		/// Connection id or `settings`
		scope: String,
		/// What is wrong
		reason: String,
	},
}

impl ConfigError {
	/// Creates a new Invalid error
	pub fn invalid(scope: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::Invalid {
			scope: scope.into(),
			reason: reason.into(),
		}
	}
}

/// Converts a numeric QoS level into rumqttc's enum.
pub fn qos_from_level(level: u8) -> Option<QoS> {
	match level {
		| 0 => Some(QoS::AtMostOnce),
		| 1 => Some(QoS::AtLeastOnce),
		| 2 => Some(QoS::ExactlyOnce),
		| _ => None,
	}
}

/// Router-level performance and behavior settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
	/// Number of retry timers that may fire concurrently
	pub reconnect_workers: usize,
	/// Capacity of each connection's transport event channel
	pub event_channel_capacity: usize,
	/// Capacity of the rumqttc request channel
	pub event_loop_capacity: usize,
	/// Time allowed for a broker to answer CONNECT
	pub connection_timeout_millis: u64,
}

impl Default for RouterSettings {
	fn default() -> Self {
		Self {
			reconnect_workers: 2,
			event_channel_capacity: 256,
			event_loop_capacity: 10,
			connection_timeout_millis: 30_000,
		}
	}
}

/// One logical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Broker URIs (`tcp://`, `mqtt://`, `mqtts://`, `ws://`, ...), tried
	/// in order
	pub server_uris: Vec<String>,
	/// MQTT client identifier, defaults to the connection id
	pub client_id: Option<String>,
	/// Username for authentication
	pub username: Option<String>,
	/// Password for authentication
	pub password: Option<String>,
	/// Keep alive interval
	pub keep_alive_secs: u64,
	/// Start without a persistent session
	pub clean_session: bool,
	/// QoS used by publishes that do not specify one
	pub default_publish_qos: u8,
	/// Honor `shared` on topic declarations
	pub shared_subscription_enabled: bool,
	/// Skip this connection entirely
	pub disabled: bool,
	/// Fixed delay before retrying a failed connect
	pub max_reconnect_delay_millis: u64,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			server_uris: vec!["tcp://127.0.0.1:1883".to_string()],
			client_id: None,
			username: None,
			password: None,
			keep_alive_secs: 60,
			clean_session: true,
			default_publish_qos: 0,
			shared_subscription_enabled: true,
			disabled: false,
			max_reconnect_delay_millis: 128_000,
		}
	}
}

impl ConnectionConfig {
	/// Creates a configuration for a single broker.
	pub fn new(server_uri: impl Into<String>) -> Self {
		Self {
			server_uris: vec![server_uri.into()],
			..Self::default()
		}
	}

	/// Default publish QoS, `AtMostOnce` for out-of-range values.
	pub fn publish_qos(&self) -> QoS {
		qos_from_level(self.default_publish_qos).unwrap_or(QoS::AtMostOnce)
	}

	/// Delay between failed connect attempts.
	pub fn max_reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.max_reconnect_delay_millis)
	}

	/// MQTT client identifier used on the wire.
	pub fn effective_client_id<'a>(&'a self, connection_id: &'a str) -> &'a str {
		self.client_id
			.as_deref()
			.filter(|id| !id.trim().is_empty())
			.unwrap_or(connection_id)
	}

	/// Builds rumqttc options for one of the server URIs.
	pub fn mqtt_options(
		&self,
		connection_id: &str,
		server_uri: &str,
	) -> Result<MqttOptions, TransportError> {
		let mut url = Url::parse(server_uri).map_err(OptionError::from)?;
		url.query_pairs_mut()
			.append_pair("client_id", self.effective_client_id(connection_id));
		let mut options = MqttOptions::try_from(url)?;
		options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
		options.set_clean_session(self.clean_session);
		if let Some(username) = &self.username {
			options.set_credentials(
				username.clone(),
				self.password.clone().unwrap_or_default(),
			);
		}
		Ok(options)
	}

	/// Checks values that would otherwise fail at connect time.
	pub fn validate(&self, connection_id: &str) -> Result<(), ConfigError> {
		if self.server_uris.iter().all(|uri| uri.trim().is_empty()) {
			return Err(ConfigError::invalid(
				connection_id,
				"at least one server URI is required",
			));
		}
		if qos_from_level(self.default_publish_qos).is_none() {
			return Err(ConfigError::invalid(
				connection_id,
				format!(
					"default_publish_qos must be 0, 1 or 2, got {}",
					self.default_publish_qos
				),
			));
		}
		if self.keep_alive_secs == 0 {
			return Err(ConfigError::invalid(
				connection_id,
				"keep_alive_secs must be greater than 0",
			));
		}
		Ok(())
	}
}

/// Process-wide router configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
	/// Suppress every connection and handler setup
	pub disabled: bool,
	/// Connection used when a publish names none; the first connection
	/// created otherwise
	pub default_client_id: Option<String>,
	/// Router-level settings
	pub settings: RouterSettings,
	/// Connections by id
	pub connections: BTreeMap<String, ConnectionConfig>,
}

impl RouterConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: RouterConfig = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let text =
			std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
				path: path.display().to_string(),
				source,
			})?;
		Self::from_toml_str(&text)
	}

	/// Adds a connection.
	pub fn with_connection(
		mut self,
		id: impl Into<String>,
		connection: ConnectionConfig,
	) -> Self {
		self.connections.insert(id.into(), connection);
		self
	}

	/// Validates settings and every connection.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.settings.reconnect_workers == 0 {
			return Err(ConfigError::invalid(
				"settings",
				"reconnect_workers must be greater than 0",
			));
		}
		if self.settings.event_channel_capacity == 0 {
			return Err(ConfigError::invalid(
				"settings",
				"event_channel_capacity must be greater than 0",
			));
		}
		if self.settings.event_loop_capacity == 0 {
			return Err(ConfigError::invalid(
				"settings",
				"event_loop_capacity must be greater than 0",
			));
		}
		for (id, connection) in &self.connections {
			if id.trim().is_empty() {
				return Err(ConfigError::invalid(id, "connection id is blank"));
			}
			connection.validate(id)?;
		}
		if let Some(default_id) = &self.default_client_id {
			if !self.connections.contains_key(default_id) {
				return Err(ConfigError::invalid(
					default_id,
					"default_client_id does not name a configured connection",
				));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"
		default_client_id = "plant"

		[settings]
		reconnect_workers = 3

		[connections.plant]
		server_uris = ["tcp://localhost:1883", "tcp://backup:1883"]
		default_publish_qos = 1
		max_reconnect_delay_millis = 5000

		[connections.office]
		server_uris = ["mqtt://office:1883"]
		client_id = "office-gw"
		disabled = true
	"#;

	#[test]
	fn test_parse_sample() {
		let config = RouterConfig::from_toml_str(SAMPLE).unwrap();
		assert!(!config.disabled);
		assert_eq!(config.default_client_id.as_deref(), Some("plant"));
		assert_eq!(config.settings.reconnect_workers, 3);
		assert_eq!(config.settings.event_channel_capacity, 256);

		let plant = &config.connections["plant"];
		assert_eq!(plant.server_uris.len(), 2);
		assert_eq!(plant.publish_qos(), QoS::AtLeastOnce);
		assert_eq!(plant.max_reconnect_delay(), Duration::from_secs(5));
		assert_eq!(plant.effective_client_id("plant"), "plant");

		let office = &config.connections["office"];
		assert!(office.disabled);
		assert_eq!(office.effective_client_id("office"), "office-gw");
		assert_eq!(office.max_reconnect_delay_millis, 128_000);
	}

	#[test]
	fn test_empty_document_is_default() {
		let config = RouterConfig::from_toml_str("").unwrap();
		assert_eq!(config, RouterConfig::default());
	}

	#[test]
	fn test_invalid_qos_rejected() {
		let err = RouterConfig::from_toml_str(
			"[connections.a]\ndefault_publish_qos = 3\n",
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { scope, .. } if scope == "a"));
	}

	#[test]
	fn test_unknown_default_rejected() {
		let err = RouterConfig::from_toml_str(
			"default_client_id = \"x\"\n[connections.a]\n",
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { .. }));
	}

	#[test]
	fn test_mqtt_options_from_uri() {
		let config = ConnectionConfig {
			username: Some("user".into()),
			password: Some("secret".into()),
			keep_alive_secs: 15,
			..ConnectionConfig::new("tcp://broker.local:1884")
		};
		let options = config.mqtt_options("gw", "tcp://broker.local:1884").unwrap();
		assert_eq!(options.client_id(), "gw");
		assert_eq!(
			options.broker_address(),
			("broker.local".to_string(), 1884)
		);
		assert_eq!(options.keep_alive(), Duration::from_secs(15));
	}

	#[test]
	fn test_client_id_with_reserved_characters() {
		let config = ConnectionConfig {
			client_id: Some("line 7&zone=#a?".into()),
			..ConnectionConfig::new("tcp://broker.local")
		};
		let options = config
			.mqtt_options("gw", "tcp://broker.local?keep_alive_secs=20")
			.unwrap();
		assert_eq!(options.client_id(), "line 7&zone=#a?");
		assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
	}
}
