//! # rs-trainlink
//!
//! A model railway controller: a small automation language for driving
//! locos and turnouts, a route engine that sets and locks paths between
//! destinations, and a hardware adapter that keeps a DCC command station in
//! sync with the controller's view of the layout.
//!
//! ## Features
//!
//! - **Automation scripts**: `SEQUENCE`, `ROUTE`, `AUTOMATION` and turnout
//!   event handlers (`ONCLOSE`/`ONTHROW`), with pause, resume and stop per run
//! - **Route setting**: shortest path between destinations, only legal moves
//!   through turnouts, conflicting routes released automatically
//! - **Loco sync**: one canonical copy per loco, changes pushed to clients
//!   and/or hardware per sync level
//! - **Hardware**: virtual driver or DCC-EX over TCP, switchable at runtime
//!
//! ## Architecture
//!
//! The crate is structured to allow testing without hardware:
//!
//! - `automation` - Lexer, parser, command tree, runner and runtime
//! - `layout` - Turnouts, destinations, links, graph, route finder, turnout map
//! - `locos` - Loco registry and sync proxy
//! - `adapter` - Active driver and its readiness state machine
//! - `hal` - Concrete drivers (virtual, DCC-EX) and test doubles
//! - `traits` - Driver, broadcast and storage seams
//! - `system` - The ownership root tying everything together
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainlink::{Config, TrainSystem};
//! use rs_trainlink::traits::NullBroadcast;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let system = TrainSystem::from_config(&Config::default(), Arc::new(NullBroadcast))
//!     .await
//!     .unwrap();
//!
//! let runtime = system.runtime();
//! let ids = runtime
//!     .add_script_file("AUTOMATION(2) DELAY(10) DONE")
//!     .unwrap();
//! let pid = runtime.run_script(ids[0], None).unwrap();
//! assert_eq!(pid.to_string(), "2#0");
//! # }
//! ```

#![warn(missing_docs)]

mod lock;

/// Hardware adapter: active driver, device selection and readiness.
pub mod adapter;
/// Free-list id allocation and process ids.
pub mod allocator;
/// The automation language and its scheduler.
pub mod automation;
/// Shared configuration, loadable from JSON.
pub mod config;
/// Device drivers and test doubles.
pub mod hal;
/// Layout model, route finding and route locking.
pub mod layout;
/// Loco registry and sync proxy.
pub mod locos;
/// In-memory and JSON file persistence.
pub mod storage;
/// The ownership root.
pub mod system;
/// Core traits for hardware, client fan-out and persistence.
pub mod traits;

/// Network services for HTTP API and MQTT (feature-gated).
#[cfg(any(feature = "web", feature = "mqtt"))]
pub mod services;

// Re-exports for convenience
pub use adapter::{DriverStatus, HardwareAdapter, HardwareDevice};
pub use allocator::Pid;
pub use automation::{AutomationError, AutomationScript, Runtime, RuntimeError, ScriptRunner};
pub use layout::{RouteError, TurnoutMap, TurnoutState};
pub use locos::{Loco, LocoError, LocoIdentifier, LocoStore, ProxyLoco, SyncLevel};
pub use system::{SystemError, TrainSystem};
pub use traits::{ClientBroadcast, ClientEvent, DeviceDriver, Direction, DriverError};

// Config re-exports
pub use config::{AutomationConfig, Config, HardwareConfig, MqttConfig, StorageConfig, WebConfig};
