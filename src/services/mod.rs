//! Network surfaces around a [`TrainSystem`](crate::system::TrainSystem).
//!
//! - `web` feature: Axum HTTP API for user actions (routes, turnouts,
//!   locos, throttle, scripts, hardware)
//! - `mqtt` feature: publishes every client event to an MQTT broker
//!
//! Both hold the same `Arc<TrainSystem>`; there is no other shared state.

// API types are used by the web server and its clients
#[cfg(feature = "web")]
pub mod api;

#[cfg(feature = "web")]
pub mod web;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "web")]
pub use api::*;

#[cfg(feature = "web")]
pub use web::{build_router, run_server};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBroadcaster, MqttConnection, MqttError};
