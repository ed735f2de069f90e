//! Mock implementations for testing without hardware or clients.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockDriver`] | [`DeviceDriver`] | Records every hardware request |
//! | [`RecordingBroadcaster`] | [`ClientBroadcast`] | Records every client event |
//!
//! Both are cheap to clone and clones share the same log, so a test can keep
//! one handle while the system under test owns another.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::hal::{DriverCall, MockDriver};
//! use rs_trainlink::traits::DeviceDriver;
//! use rs_trainlink::Direction;
//!
//! # tokio_test_block_on(async {
//! let driver = MockDriver::new();
//! let handle = driver.clone();
//! driver.set_speed(3, 20, Direction::Forward).await.unwrap();
//! assert_eq!(
//!     handle.calls(),
//!     vec![DriverCall::SetSpeed { address: 3, speed: 20, direction: Direction::Forward }]
//! );
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! [`DeviceDriver`]: crate::traits::DeviceDriver
//! [`ClientBroadcast`]: crate::traits::ClientBroadcast

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::layout::{NodeId, TurnoutState};
use crate::lock::lock;
use crate::traits::{ClientBroadcast, ClientEvent, DeviceDriver, Direction, DriverError};

// ============================================================================
// Driver Mock
// ============================================================================

/// One request received by [`MockDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverCall {
    /// `set_speed`
    SetSpeed {
        /// Loco address.
        address: u16,
        /// Requested speed.
        speed: u8,
        /// Requested direction.
        direction: Direction,
    },
    /// `emergency_stop`
    EmergencyStop {
        /// Loco address.
        address: u16,
    },
    /// `set_track_power`
    TrackPower(bool),
    /// `set_turnout`
    Turnout {
        /// Turnout id.
        id: NodeId,
        /// Requested state.
        state: TurnoutState,
    },
    /// `set_function`
    Function {
        /// Loco address.
        address: u16,
        /// Function number.
        function: u8,
        /// Requested state.
        on: bool,
    },
    /// `close`
    Close,
}

/// Driver that records calls instead of talking to hardware.
#[derive(Clone, Debug)]
pub struct MockDriver {
    name: String,
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl MockDriver {
    /// Creates a mock named `"Mock"`.
    pub fn new() -> Self {
        Self::named("Mock")
    }

    /// Creates a mock with a custom driver name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    /// Turnout calls only.
    pub fn turnout_calls(&self) -> Vec<(NodeId, TurnoutState)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Turnout { id, state } => Some((id, state)),
                _ => None,
            })
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: DriverCall) -> Result<(), DriverError> {
        lock(&self.calls).push(call);
        Ok(())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn message(&self) -> String {
        format!("{} driver ready", self.name)
    }

    async fn set_speed(
        &self,
        address: u16,
        speed: u8,
        direction: Direction,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::SetSpeed {
            address,
            speed,
            direction,
        })
    }

    async fn emergency_stop(&self, address: u16) -> Result<(), DriverError> {
        self.record(DriverCall::EmergencyStop { address })
    }

    async fn set_track_power(&self, on: bool) -> Result<(), DriverError> {
        self.record(DriverCall::TrackPower(on))
    }

    async fn set_turnout(&self, id: NodeId, state: TurnoutState) -> Result<(), DriverError> {
        self.record(DriverCall::Turnout { id, state })
    }

    async fn set_function(&self, address: u16, function: u8, on: bool) -> Result<(), DriverError> {
        self.record(DriverCall::Function {
            address,
            function,
            on,
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.record(DriverCall::Close)
    }
}

// ============================================================================
// Broadcast Mock
// ============================================================================

/// Broadcaster that keeps every event.
#[derive(Clone, Debug, Default)]
pub struct RecordingBroadcaster {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl RecordingBroadcaster {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, oldest first.
    pub fn events(&self) -> Vec<ClientEvent> {
        lock(&self.events).clone()
    }

    /// Event names, oldest first.
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(ClientEvent::name).collect()
    }

    /// How many events named `name` were sent.
    pub fn count(&self, name: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.name() == name).count()
    }

    /// Most recent event named `name`.
    pub fn last(&self, name: &str) -> Option<ClientEvent> {
        lock(&self.events)
            .iter()
            .rev()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl ClientBroadcast for RecordingBroadcaster {
    fn broadcast(&self, event: ClientEvent) {
        lock(&self.events).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_the_call_log() {
        let driver = MockDriver::new();
        let handle = driver.clone();
        driver.set_turnout(4, TurnoutState::Thrown).await.unwrap();
        driver.set_track_power(false).await.unwrap();
        assert_eq!(handle.turnout_calls(), vec![(4, TurnoutState::Thrown)]);
        assert_eq!(handle.calls().len(), 2);
        handle.clear();
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn recorder_filters_by_name() {
        let recorder = RecordingBroadcaster::new();
        recorder.broadcast(ClientEvent::TrackPowerUpdate { state: true });
        recorder.broadcast(ClientEvent::TrackPowerUpdate { state: false });
        recorder.broadcast(ClientEvent::LocoDeleted { address: 1 });
        assert_eq!(recorder.count("throttle/trackPowerUpdate"), 2);
        assert_eq!(
            recorder.last("throttle/trackPowerUpdate"),
            Some(ClientEvent::TrackPowerUpdate { state: false })
        );
        assert_eq!(recorder.names().len(), 3);
    }
}
