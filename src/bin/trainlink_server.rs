//! Controller process: HTTP API plus optional MQTT fan-out.
//!
//! # Usage
//!
//! ```bash
//! # Virtual hardware, in-memory storage, port 3001
//! cargo run --features web --bin trainlink_server
//!
//! # With a config file
//! cargo run --features web,mqtt --bin trainlink_server -- trainlink.json
//! ```
//!
//! `RUST_LOG` overrides the configured log filter.

use std::sync::Arc;

use anyhow::Context;
use rs_trainlink::services::web::run_server;
use rs_trainlink::traits::{ChannelBroadcaster, ClientBroadcast, FanOut};
use rs_trainlink::{Config, TrainSystem};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Undelivered events kept for slow in-process observers.
const EVENT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rs-trainlink starting");

    // =========================================================================
    // Client fan-out
    // =========================================================================
    let events = ChannelBroadcaster::new(EVENT_CAPACITY);
    let mut observer = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = observer.recv().await {
            debug!(event = event.name(), "Client event");
        }
    });

    #[allow(unused_mut)]
    let mut fan_out = FanOut::new().with(Arc::new(events));

    #[cfg(feature = "mqtt")]
    if config.mqtt.enabled {
        let (mqtt, connection) = rs_trainlink::services::MqttBroadcaster::connect(&config.mqtt);
        tokio::spawn(connection.run());
        fan_out = fan_out.with(Arc::new(mqtt));
        info!(broker = %config.mqtt.broker_host, "MQTT fan-out enabled");
    }

    let broadcaster: Arc<dyn ClientBroadcast> = Arc::new(fan_out);

    // =========================================================================
    // System
    // =========================================================================
    let system = Arc::new(
        TrainSystem::from_config(&config, broadcaster)
            .await
            .context("starting the train system")?,
    );

    if !config.web.enabled {
        info!("Web server disabled, waiting for Ctrl-C");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    run_server(system, &config.web)
        .await
        .context("web server failed")
}
