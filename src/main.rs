//! Logs every message arriving on the configured topics until Ctrl-C.
//!
//! Environment:
//! - `ROUTER_CONFIG`: configuration file, `router.toml` by default
//! - `MQTT_BROKER`: broker used when the configuration file does not exist
//! - `ROUTER_LOG_TOPICS`: comma separated topic filters, `#` by default
//! - `RUST_LOG`: tracing filter, `info` by default

use std::env;
use std::path::Path;

use mqtt_topic_router::advanced::InboundMessage;
use mqtt_topic_router::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "router.toml";
const DEFAULT_BROKER: &str = "tcp://localhost:1883";

fn setup_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| "info".into());
	tracing_subscriber::registry()
		.with(filter)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.init();
}

fn load_config() -> Result<RouterConfig> {
	let path =
		env::var("ROUTER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
	if Path::new(&path).exists() {
		info!(path = %path, "Loading configuration");
		return Ok(RouterConfig::load(&path)?);
	}
	let broker =
		env::var("MQTT_BROKER").unwrap_or_else(|_| DEFAULT_BROKER.into());
	warn!(path = %path, broker = %broker, "Configuration file not found, using a single connection");
	Ok(RouterConfig::default()
		.with_connection("default", ConnectionConfig::new(broker)))
}

fn log_topics() -> Vec<String> {
	let topics = env::var("ROUTER_LOG_TOPICS").unwrap_or_else(|_| "#".into());
	topics
		.split(',')
		.map(str::trim)
		.filter(|topic| !topic.is_empty())
		.map(String::from)
		.collect()
}

fn logging_handler(topics: Vec<String>) -> HandlerDefinition {
	HandlerDefinition::new("message_log", "log", |args| {
		let message = args.get::<InboundMessage>(0);
		if let Some(message) = message {
			match message.payload_str() {
				| Some(text) => {
					info!(client_id = args.connection_id(), topic = %message.topic, qos = message.qos as u8, retain = message.retain, payload = text, "Message");
				}
				| None => {
					info!(client_id = args.connection_id(), topic = %message.topic, qos = message.qos as u8, retain = message.retain, payload_size = message.payload.len(), "Binary message");
				}
			}
		}
		Ok(())
	})
	.topics(topics)
	.qos(QoS::AtLeastOnce)
	.argument(ArgumentSpec::raw_message("message"))
}

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	setup_tracing();

	let config = load_config()?;
	let topics = log_topics();
	info!(topics = ?topics, connections = config.connections.len(), "Starting router");

	let router = MqttRouter::builder(config)
		.handler(logging_handler(topics))
		.build();
	router.start().await;

	if let Err(err) = tokio::signal::ctrl_c().await {
		warn!(error = %err, "Cannot listen for Ctrl-C, shutting down");
	}
	info!("Shutting down");
	router.shutdown().await;
	Ok(())
}
