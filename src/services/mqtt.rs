//! MQTT fan-out of client events.
//!
//! Every [`ClientEvent`] is published as its JSON form
//! (`{"event": ..., "payload": ...}`) on `<prefix>/<event name>`:
//!
//! - `trainlink/throttle/speedUpdate`
//! - `trainlink/routes/turnoutUpdate`
//! - `trainlink/automation/fetchRunningResponse`
//! - ...
//!
//! Publishing never blocks the caller; when the client's request queue is
//! full the event is dropped with a warning. The connection itself is driven
//! by [`MqttConnection::run`], which must be spawned.
//!
//! ```ignore
//! let (mqtt, connection) = MqttBroadcaster::connect(&config.mqtt);
//! tokio::spawn(connection.run());
//! let system = TrainSystem::from_config(&config, Arc::new(mqtt)).await?;
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{MqttConfig, TopicString};
use crate::traits::{ClientBroadcast, ClientEvent};

/// Requests buffered between the broadcaster and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// MQTT-related errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// The event could not be encoded
    #[error("MQTT payload error: {0}")]
    Encode(#[from] serde_json::Error),
    /// The client refused the publish
    #[error("MQTT publish error: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Topic and payload for one event.
pub fn event_message(config: &MqttConfig, event: &ClientEvent) -> Result<(TopicString, Vec<u8>), MqttError> {
    Ok((config.topic(event.name()), serde_json::to_vec(event)?))
}

/// [`ClientBroadcast`] that publishes to an MQTT broker.
#[derive(Clone)]
pub struct MqttBroadcaster {
    client: AsyncClient,
    config: MqttConfig,
}

impl MqttBroadcaster {
    /// Creates the client; nothing is sent until the connection runs.
    pub fn connect(config: &MqttConfig) -> (Self, MqttConnection) {
        let mut options = MqttOptions::new(
            config.client_id.as_str(),
            config.broker_host.as_str(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let broadcaster = Self {
            client,
            config: config.clone(),
        };
        let connection = MqttConnection {
            eventloop,
            broker: format!("{}:{}", config.broker_host, config.broker_port),
        };
        (broadcaster, connection)
    }

    fn publish(&self, event: &ClientEvent) -> Result<(), MqttError> {
        let (topic, payload) = event_message(&self.config, event)?;
        self.client
            .try_publish(topic.as_str(), QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

impl ClientBroadcast for MqttBroadcaster {
    fn broadcast(&self, event: ClientEvent) {
        if let Err(err) = self.publish(&event) {
            warn!(event = event.name(), error = %err, "Dropping MQTT event");
        }
    }
}

/// Drives the MQTT connection.
pub struct MqttConnection {
    eventloop: EventLoop,
    broker: String,
}

impl MqttConnection {
    /// Polls the connection forever, reconnecting after errors.
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %self.broker, "MQTT connected");
                }
                Ok(event) => debug!(?event, "MQTT"),
                Err(err) => {
                    warn!(broker = %self.broker, error = %err, "MQTT connection error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}
