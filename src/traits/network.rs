//! Client fan-out: named events pushed to every connected observer.
//!
//! The core never talks to sockets directly. It hands a [`ClientEvent`] to a
//! [`ClientBroadcast`] and moves on; delivery is fire-and-forget. Event names
//! are stable strings (`"throttle/speedUpdate"`, `"routes/turnoutUpdate"`, ...)
//! so a transport can route them without matching on the enum.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::traits::{ChannelBroadcaster, ClientBroadcast, ClientEvent};
//!
//! let broadcaster = ChannelBroadcaster::new(16);
//! let mut rx = broadcaster.subscribe();
//! broadcaster.broadcast(ClientEvent::TrackPowerUpdate { state: true });
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.name(), "throttle/trackPowerUpdate");
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::adapter::AdapterSnapshot;
use crate::automation::{AutomationError, AutomationSummary, RunningAutomation};
use crate::layout::{Coordinate, NodeId, RouteComponents, RouteObject, TurnoutState};
use crate::locos::Loco;
use crate::traits::Direction;

/// An event pushed to connected clients.
///
/// Serializes as `{"event": "<name>", "payload": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    /// A loco's speed changed.
    #[serde(rename = "throttle/speedUpdate")]
    SpeedUpdate {
        /// Loco address.
        address: u16,
        /// New speed.
        speed: u8,
    },
    /// A loco's direction changed.
    #[serde(rename = "throttle/directionUpdate")]
    DirectionUpdate {
        /// Loco address.
        address: u16,
        /// New direction.
        direction: Direction,
    },
    /// A loco function was switched.
    #[serde(rename = "throttle/functionUpdate")]
    FunctionUpdate {
        /// Loco address.
        address: u16,
        /// Function number.
        function: u8,
        /// New state.
        state: bool,
    },
    /// Track power was switched.
    #[serde(rename = "throttle/trackPowerUpdate")]
    TrackPowerUpdate {
        /// True when powered.
        state: bool,
    },
    /// A loco was added to the store.
    #[serde(rename = "config/newLocoAdded")]
    LocoAdded(Loco),
    /// A loco's name or address changed.
    #[serde(rename = "config/locoEdited")]
    LocoEdited {
        /// Address before the edit.
        previous_address: u16,
        /// The loco after the edit.
        loco: Loco,
    },
    /// A loco was removed from the store.
    #[serde(rename = "config/locoDeleted")]
    LocoDeleted {
        /// Address of the removed loco.
        address: u16,
    },
    /// A turnout changed state.
    #[serde(rename = "routes/turnoutUpdate")]
    TurnoutUpdate {
        /// Turnout id.
        id: NodeId,
        /// New state.
        state: TurnoutState,
    },
    /// A route was set.
    #[serde(rename = "routes/routeUpdate")]
    RouteUpdate(RouteObject),
    /// Components became locked by a route.
    #[serde(rename = "routes/setRouteComponents")]
    SetRouteComponents(RouteComponents),
    /// Components were released.
    #[serde(rename = "routes/unsetRouteComponents")]
    UnsetRouteComponents(RouteComponents),
    /// A node moved on the diagram.
    #[serde(rename = "routes/changeObjectCoordinate")]
    CoordinateChanged {
        /// Node id.
        id: NodeId,
        /// New position.
        coordinate: Coordinate,
    },
    /// The script catalog changed.
    #[serde(rename = "automation/fetchAllResponse")]
    AutomationList(Vec<AutomationSummary>),
    /// The set of running automations changed.
    #[serde(rename = "automation/fetchRunningResponse")]
    RunningAutomations(Vec<RunningAutomation>),
    /// An uploaded script failed to compile.
    #[serde(rename = "automation/processingError")]
    ProcessingError(AutomationError),
    /// The hardware driver or device changed.
    #[serde(rename = "hardware/newActiveDevice")]
    ActiveDevice(AdapterSnapshot),
}

impl ClientEvent {
    /// The event name used on the wire.
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::SpeedUpdate { .. } => "throttle/speedUpdate",
            ClientEvent::DirectionUpdate { .. } => "throttle/directionUpdate",
            ClientEvent::FunctionUpdate { .. } => "throttle/functionUpdate",
            ClientEvent::TrackPowerUpdate { .. } => "throttle/trackPowerUpdate",
            ClientEvent::LocoAdded(_) => "config/newLocoAdded",
            ClientEvent::LocoEdited { .. } => "config/locoEdited",
            ClientEvent::LocoDeleted { .. } => "config/locoDeleted",
            ClientEvent::TurnoutUpdate { .. } => "routes/turnoutUpdate",
            ClientEvent::RouteUpdate(_) => "routes/routeUpdate",
            ClientEvent::SetRouteComponents(_) => "routes/setRouteComponents",
            ClientEvent::UnsetRouteComponents(_) => "routes/unsetRouteComponents",
            ClientEvent::CoordinateChanged { .. } => "routes/changeObjectCoordinate",
            ClientEvent::AutomationList(_) => "automation/fetchAllResponse",
            ClientEvent::RunningAutomations(_) => "automation/fetchRunningResponse",
            ClientEvent::ProcessingError(_) => "automation/processingError",
            ClientEvent::ActiveDevice(_) => "hardware/newActiveDevice",
        }
    }
}

/// Fire-and-forget delivery of [`ClientEvent`]s.
pub trait ClientBroadcast: Send + Sync {
    /// Sends `event` to every connected client.
    fn broadcast(&self, event: ClientEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBroadcast;

impl ClientBroadcast for NullBroadcast {
    fn broadcast(&self, _event: ClientEvent) {}
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone, Debug)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<ClientEvent>,
}

impl ChannelBroadcaster {
    /// Creates a channel holding up to `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ClientBroadcast for ChannelBroadcaster {
    fn broadcast(&self, event: ClientEvent) {
        // No receivers is not an error for fire-and-forget delivery.
        let _ = self.sender.send(event);
    }
}

/// Hands every event to each inner broadcaster in order.
#[derive(Clone, Default)]
pub struct FanOut {
    targets: Vec<Arc<dyn ClientBroadcast>>,
}

impl FanOut {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target.
    pub fn with(mut self, target: Arc<dyn ClientBroadcast>) -> Self {
        self.targets.push(target);
        self
    }
}

impl ClientBroadcast for FanOut {
    fn broadcast(&self, event: ClientEvent) {
        if let Some((last, rest)) = self.targets.split_last() {
            for target in rest {
                target.broadcast(event.clone());
            }
            last.broadcast(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_name() {
        let event = ClientEvent::TurnoutUpdate {
            id: 5,
            state: TurnoutState::Thrown,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["id"], 5);
        assert_eq!(json["payload"]["state"], "thrown");
    }

    #[test]
    fn channel_without_observers_does_not_fail() {
        let broadcaster = ChannelBroadcaster::new(4);
        assert_eq!(broadcaster.observer_count(), 0);
        broadcaster.broadcast(ClientEvent::LocoDeleted { address: 3 });
    }

    #[test]
    fn channel_delivers_in_order() {
        let broadcaster = ChannelBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast(ClientEvent::SpeedUpdate { address: 3, speed: 10 });
        broadcaster.broadcast(ClientEvent::DirectionUpdate {
            address: 3,
            direction: Direction::Forward,
        });
        assert_eq!(rx.try_recv().unwrap().name(), "throttle/speedUpdate");
        assert_eq!(rx.try_recv().unwrap().name(), "throttle/directionUpdate");
    }

    #[test]
    fn fan_out_reaches_every_target() {
        let first = ChannelBroadcaster::new(4);
        let second = ChannelBroadcaster::new(4);
        let mut rx1 = first.subscribe();
        let mut rx2 = second.subscribe();
        let fan_out = FanOut::new()
            .with(Arc::new(first))
            .with(Arc::new(second));
        fan_out.broadcast(ClientEvent::LocoDeleted { address: 3 });
        assert_eq!(rx1.try_recv().unwrap().name(), "config/locoDeleted");
        assert_eq!(rx2.try_recv().unwrap().name(), "config/locoDeleted");
        FanOut::new().broadcast(ClientEvent::LocoDeleted { address: 3 });
    }
}
