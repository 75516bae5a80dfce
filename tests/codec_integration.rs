//! Custom payload serializers used for both directions

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bincode::{Decode, Encode};
use common::{MockFactory, connection, settle};
use mqtt_topic_router::prelude::*;
use mqtt_topic_router::{BincodeSerializer, ConnectionState};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Encode, Decode, Debug, Clone, PartialEq)]
struct Reading {
	sensor: String,
	value: f64,
}

fn reading() -> Reading {
	Reading {
		sensor: "t1".to_string(),
		value: 21.5,
	}
}

async fn round_trip<S>(serializer: S) -> Vec<Reading>
where S: MessageSerializer<Reading> {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	let factory = Arc::new(MockFactory::new());
	let config = RouterConfig::default().with_connection(
		"alpha",
		connection("tcp://a:1883", Duration::from_secs(1)),
	);
	let router = MqttRouter::builder(config)
		.transport_factory(factory.clone())
		.codec::<Reading, _>(serializer)
		.handler(
			HandlerDefinition::new("readings", "on_reading", move |args| {
				if let Some(reading) = args.take::<Reading>(0) {
					sink.lock().unwrap().push(reading);
				}
				Ok(())
			})
			.topic("readings/{sensor}")
			.argument(ArgumentSpec::infer::<Reading>("reading").required()),
		)
		.build();
	router.start().await;
	let handle = router.connections().get("alpha").await.unwrap();
	handle.wait_for(ConnectionState::Connected).await;

	router.publisher().send("readings/t1", reading()).await.unwrap();
	let transport = factory.transport("alpha");
	let payload = match &transport.publishes()[0] {
		| common::Call::Publish { payload, .. } => payload.clone(),
		| other => panic!("unexpected call {other:?}"),
	};
	transport
		.emit(mqtt_topic_router::advanced::TransportEvent::MessageArrived(
			mqtt_topic_router::advanced::InboundMessage::new(
				"readings/t1",
				payload,
			),
		))
		.await;
	settle().await;
	router.shutdown().await;

	let readings = seen.lock().unwrap().clone();
	readings
}

#[tokio::test]
async fn test_bincode_codec() {
	assert_eq!(round_trip(BincodeSerializer::new()).await, [reading()]);
}

#[cfg(feature = "json")]
#[tokio::test]
async fn test_json_codec() {
	use mqtt_topic_router::JsonSerializer;

	assert_eq!(round_trip(JsonSerializer).await, [reading()]);
}
