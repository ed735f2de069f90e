//! Turnout state and the routes that lock it.
//!
//! [`TurnoutMap`] owns the layout tables, the path-finding graph and the
//! active routes. Every component of an active route (its turnouts, links
//! and both destinations) is recorded as used by that route's id; at most
//! one route holds a component at a time.
//!
//! Setting a route first releases every active route it overlaps, then sets
//! the turnouts that are not already in the wanted state. Setting a turnout
//! by hand releases the route holding it.
//!
//! The bookkeeping is done under one lock. Client broadcasts happen in
//! order while it is held; hardware pushes, persistence and turnout events
//! happen after it is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::route_finder::{find_path, path_to_turnouts};
use super::{
    Coordinate, Destination, Layout, LinkId, NodeId, RouteComponents, RouteError, RouteId,
    RouteObject, Turnout, TurnoutGraph, TurnoutLink, TurnoutState, TurnoutStateChange,
};
use crate::adapter::HardwareAdapter;
use crate::allocator::FreeListAllocator;
use crate::lock::lock;
use crate::traits::{ClientBroadcast, ClientEvent, LayoutStore, NullBroadcast, StorageError};

/// Receives `turnout/<close|throw>/<id>` events.
pub trait TurnoutEventSink: Send + Sync {
    /// Handles one event path.
    fn trigger_event(&self, event: &str);
}

/// Everything a newly connected client needs to draw the layout.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialLayoutState {
    /// Every turnout with its current state.
    pub turnouts: Vec<Turnout>,
    /// Every destination.
    pub destinations: Vec<Destination>,
    /// Every link.
    pub links: Vec<TurnoutLink>,
    /// Components held by active routes.
    pub locked: RouteComponents,
}

struct MapState {
    layout: Layout,
    used_turnouts: HashMap<NodeId, RouteId>,
    used_links: HashMap<LinkId, RouteId>,
    used_destinations: HashMap<NodeId, RouteId>,
    active_routes: BTreeMap<RouteId, RouteObject>,
    route_ids: FreeListAllocator,
}

impl MapState {
    /// Routes holding any component of `route`.
    fn overlapping(&self, route: &RouteObject) -> BTreeSet<RouteId> {
        let turnouts = route.turnouts.iter().filter_map(|t| self.used_turnouts.get(&t.id));
        let links = route.links.iter().filter_map(|l| self.used_links.get(&l.id));
        let destinations = [route.start.id, route.end.id]
            .into_iter()
            .filter_map(|id| self.used_destinations.get(&id).copied());
        turnouts.chain(links).copied().chain(destinations).collect()
    }

    /// Drops routes and frees their components and ids.
    fn release(&mut self, ids: impl IntoIterator<Item = RouteId>) -> RouteComponents {
        let mut released = RouteComponents::default();
        for id in ids {
            let Some(route) = self.active_routes.remove(&id) else {
                continue;
            };
            let components = route.components();
            for turnout in &components.turnouts {
                self.used_turnouts.remove(turnout);
            }
            for link in &components.links {
                self.used_links.remove(link);
            }
            for destination in &components.destinations {
                self.used_destinations.remove(destination);
            }
            self.route_ids.release(id);
            debug!(route = id, "Route released");
            released.extend(components);
        }
        released
    }

    fn claim(&mut self, id: RouteId, route: &RouteObject) {
        for turnout in &route.turnouts {
            self.used_turnouts.insert(turnout.id, id);
        }
        for link in &route.links {
            self.used_links.insert(link.id, id);
        }
        self.used_destinations.insert(route.start.id, id);
        self.used_destinations.insert(route.end.id, id);
    }

    fn locked(&self) -> RouteComponents {
        let mut locked = RouteComponents::default();
        for route in self.active_routes.values() {
            locked.extend(route.components());
        }
        locked
    }
}

/// Turnout states, active routes and their bookkeeping.
pub struct TurnoutMap {
    graph: TurnoutGraph,
    state: Mutex<MapState>,
    store: Option<Arc<dyn LayoutStore>>,
    adapter: Arc<HardwareAdapter>,
    broadcaster: Arc<dyn ClientBroadcast>,
    events: Mutex<Option<Weak<dyn TurnoutEventSink>>>,
}

impl TurnoutMap {
    /// Creates a map over `layout` that persists nothing.
    pub fn new(
        layout: Layout,
        adapter: Arc<HardwareAdapter>,
        broadcaster: Arc<dyn ClientBroadcast>,
    ) -> Self {
        Self {
            graph: layout.build_graph(),
            state: Mutex::new(MapState {
                layout,
                used_turnouts: HashMap::new(),
                used_links: HashMap::new(),
                used_destinations: HashMap::new(),
                active_routes: BTreeMap::new(),
                route_ids: FreeListAllocator::new(1),
            }),
            store: None,
            adapter,
            broadcaster,
            events: Mutex::new(None),
        }
    }

    /// A map with no turnouts, destinations or links.
    pub fn empty() -> Self {
        let broadcaster: Arc<dyn ClientBroadcast> = Arc::new(NullBroadcast);
        let adapter = Arc::new(HardwareAdapter::new(Arc::clone(&broadcaster)));
        Self::new(Layout::default(), adapter, broadcaster)
    }

    /// Builds the map from the persisted layout; changes are written back
    /// to `store`.
    pub fn load(
        store: Arc<dyn LayoutStore>,
        adapter: Arc<HardwareAdapter>,
        broadcaster: Arc<dyn ClientBroadcast>,
    ) -> Result<Self, StorageError> {
        let layout = Layout::from_parts(store.nodes()?, store.links()?);
        info!(
            turnouts = layout.turnouts.len(),
            destinations = layout.destinations.len(),
            links = layout.links.len(),
            "Layout loaded"
        );
        let mut map = Self::new(layout, adapter, broadcaster);
        map.store = Some(store);
        Ok(map)
    }

    /// Sets where turnout events are delivered.
    pub fn attach_event_sink(&self, sink: Weak<dyn TurnoutEventSink>) {
        *lock(&self.events) = Some(sink);
    }

    /// Path-finding graph.
    pub fn graph(&self) -> &TurnoutGraph {
        &self.graph
    }

    // ========================================================================
    // Turnouts
    // ========================================================================

    /// Sets a turnout by hand.
    ///
    /// Releases the route holding the turnout, if any, then fires the
    /// matching turnout event and pushes the state to the hardware.
    pub async fn set_turnout(&self, id: NodeId, state: TurnoutState) -> Result<(), RouteError> {
        let released = {
            let mut map = lock(&self.state);
            if !map.layout.turnouts.contains_key(&id) {
                return Err(RouteError::UnknownTurnout(id));
            }
            let holder = map.used_turnouts.get(&id).copied();
            let released = map.release(holder);
            if let Some(turnout) = map.layout.turnouts.get_mut(&id) {
                turnout.state = state;
            }
            released
        };

        if !released.is_empty() {
            self.broadcaster
                .broadcast(ClientEvent::UnsetRouteComponents(released));
        }
        self.broadcaster
            .broadcast(ClientEvent::TurnoutUpdate { id, state });
        self.persist_state(id, state);
        self.fire_event(id, state);
        self.push_to_hardware(id, state).await;
        Ok(())
    }

    /// Current state of a turnout.
    pub fn turnout_state(&self, id: NodeId) -> Option<TurnoutState> {
        lock(&self.state).layout.turnouts.get(&id).map(|t| t.state)
    }

    fn persist_state(&self, id: NodeId, state: TurnoutState) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save_turnout_state(id, state) {
                warn!(turnout = id, error = %err, "Failed to persist turnout state");
            }
        }
    }

    fn fire_event(&self, id: NodeId, state: TurnoutState) {
        let sink = lock(&self.events).as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.trigger_event(&format!("turnout/{}/{}", state.event_name(), id));
        }
    }

    async fn push_to_hardware(&self, id: NodeId, state: TurnoutState) {
        if let Err(err) = self.adapter.turnout_set(id, state).await {
            warn!(turnout = id, error = %err, "Failed to send turnout to hardware");
        }
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Finds and sets the shortest route between two destinations.
    ///
    /// Overlapping routes are released first. Only turnouts whose state
    /// differs are changed.
    pub async fn set_route(
        &self,
        start: NodeId,
        end: NodeId,
    ) -> Result<(RouteId, RouteObject), RouteError> {
        let applied = match self.apply_route(start, end) {
            Ok(applied) => applied,
            Err(err) => {
                warn!("Unable to create route: {}", err);
                return Err(err);
            }
        };
        let (id, route, changes) = applied;
        info!(route = id, start, end, "Route set");

        for change in &changes {
            self.persist_state(change.id, change.state);
            self.fire_event(change.id, change.state);
            self.push_to_hardware(change.id, change.state).await;
        }
        Ok((id, route))
    }

    fn apply_route(
        &self,
        start: NodeId,
        end: NodeId,
    ) -> Result<(RouteId, RouteObject, Vec<TurnoutStateChange>), RouteError> {
        let mut map = lock(&self.state);
        let path = find_path(&self.graph, start, end)?;
        let route = path_to_turnouts(&path.nodes, &map.layout, &self.graph)?;

        let overlapping = map.overlapping(&route);
        let released = map.release(overlapping);
        if !released.is_empty() {
            self.broadcaster
                .broadcast(ClientEvent::UnsetRouteComponents(released));
        }

        let mut changes = Vec::new();
        for wanted in &route.turnouts {
            if let Some(turnout) = map.layout.turnouts.get_mut(&wanted.id) {
                if turnout.state != wanted.state {
                    turnout.state = wanted.state;
                    changes.push(*wanted);
                    self.broadcaster.broadcast(ClientEvent::TurnoutUpdate {
                        id: wanted.id,
                        state: wanted.state,
                    });
                }
            }
        }

        let id = map.route_ids.allocate();
        map.claim(id, &route);
        map.active_routes.insert(id, route.clone());

        self.broadcaster
            .broadcast(ClientEvent::SetRouteComponents(route.components()));
        self.broadcaster
            .broadcast(ClientEvent::RouteUpdate(route.clone()));
        Ok((id, route, changes))
    }

    /// Releases an active route.
    pub fn clear_route(&self, id: RouteId) -> Result<RouteComponents, RouteError> {
        let released = {
            let mut map = lock(&self.state);
            if !map.active_routes.contains_key(&id) {
                return Err(RouteError::UnknownRoute(id));
            }
            map.release([id])
        };
        self.broadcaster
            .broadcast(ClientEvent::UnsetRouteComponents(released.clone()));
        Ok(released)
    }

    /// Active routes by id.
    pub fn active_routes(&self) -> Vec<(RouteId, RouteObject)> {
        lock(&self.state)
            .active_routes
            .iter()
            .map(|(id, route)| (*id, route.clone()))
            .collect()
    }

    /// Route holding a turnout.
    pub fn route_holding_turnout(&self, id: NodeId) -> Option<RouteId> {
        lock(&self.state).used_turnouts.get(&id).copied()
    }

    /// Route holding a link.
    pub fn route_holding_link(&self, id: LinkId) -> Option<RouteId> {
        lock(&self.state).used_links.get(&id).copied()
    }

    /// Route holding a destination.
    pub fn route_holding_destination(&self, id: NodeId) -> Option<RouteId> {
        lock(&self.state).used_destinations.get(&id).copied()
    }

    // ========================================================================
    // Layout Queries
    // ========================================================================

    /// One turnout.
    pub fn turnout(&self, id: NodeId) -> Option<Turnout> {
        lock(&self.state).layout.turnouts.get(&id).cloned()
    }

    /// Every turnout.
    pub fn turnouts(&self) -> Vec<Turnout> {
        lock(&self.state).layout.turnouts.values().cloned().collect()
    }

    /// One destination.
    pub fn destination(&self, id: NodeId) -> Option<Destination> {
        lock(&self.state).layout.destinations.get(&id).cloned()
    }

    /// Every destination.
    pub fn destinations(&self) -> Vec<Destination> {
        lock(&self.state).layout.destinations.values().cloned().collect()
    }

    /// One link.
    pub fn link(&self, id: LinkId) -> Option<TurnoutLink> {
        lock(&self.state).layout.links.get(&id).cloned()
    }

    /// Every link.
    pub fn links(&self) -> Vec<TurnoutLink> {
        lock(&self.state).layout.links.values().cloned().collect()
    }

    /// Moves a node on the diagram.
    pub fn update_coordinate(&self, id: NodeId, coordinate: Coordinate) -> Result<(), RouteError> {
        {
            let mut map = lock(&self.state);
            if let Some(turnout) = map.layout.turnouts.get_mut(&id) {
                turnout.coordinate = coordinate;
            } else if let Some(destination) = map.layout.destinations.get_mut(&id) {
                destination.coordinate = coordinate;
            } else {
                return Err(RouteError::UnknownNode(id));
            }
        }
        if let Some(store) = &self.store {
            store
                .save_coordinate(id, coordinate)
                .map_err(|err| RouteError::Storage(err.to_string()))?;
        }
        self.broadcaster
            .broadcast(ClientEvent::CoordinateChanged { id, coordinate });
        Ok(())
    }

    /// Snapshot for a newly connected client.
    pub fn initial_state(&self) -> InitialLayoutState {
        let map = lock(&self.state);
        InitialLayoutState {
            turnouts: map.layout.turnouts.values().cloned().collect(),
            destinations: map.layout.destinations.values().cloned().collect(),
            links: map.layout.links.values().cloned().collect(),
            locked: map.locked(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{MockDriver, RecordingBroadcaster};
    use crate::layout::MapPoint;
    use crate::storage::MemoryStore;
    use crate::adapter::HardwareDevice;

    struct Recorder(Mutex<Vec<String>>);

    impl TurnoutEventSink for Recorder {
        fn trigger_event(&self, event: &str) {
            lock(&self.0).push(event.to_string());
        }
    }

    /// Two sidings off one turnout:
    ///
    /// ```text
    /// A(1) --20-- T(5) --21-- B(2)
    ///               \---22--- C(3)
    /// ```
    fn store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_node(MapPoint::Destination(Destination::new(1, "A")))
                .with_node(MapPoint::Destination(Destination::new(2, "B")))
                .with_node(MapPoint::Destination(Destination::new(3, "C")))
                .with_node(MapPoint::Turnout(Turnout::new(5, "T", 21, 22)))
                .with_link(TurnoutLink::new(20, 3, 1, 5))
                .with_link(TurnoutLink::new(21, 3, 5, 2))
                .with_link(TurnoutLink::new(22, 3, 5, 3)),
        )
    }

    struct Fixture {
        map: TurnoutMap,
        store: Arc<MemoryStore>,
        driver: MockDriver,
        recorder: RecordingBroadcaster,
        events: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let store = store();
        let driver = MockDriver::new();
        let recorder = RecordingBroadcaster::new();
        let broadcaster: Arc<dyn ClientBroadcast> = Arc::new(recorder.clone());
        let adapter = Arc::new(HardwareAdapter::with_driver(
            Arc::new(driver.clone()),
            HardwareDevice::virtual_device(),
            Arc::clone(&broadcaster),
        ));
        let map = TurnoutMap::load(store.clone(), adapter, broadcaster).unwrap();
        let events = Arc::new(Recorder(Mutex::new(Vec::new())));
        let sink: Arc<dyn TurnoutEventSink> = events.clone();
        map.attach_event_sink(Arc::downgrade(&sink));
        Fixture {
            map,
            store,
            driver,
            recorder,
            events,
        }
    }

    // ===== Turnout Tests =====

    #[tokio::test]
    async fn set_turnout_persists_fires_and_pushes() {
        let f = fixture();
        f.map.set_turnout(5, TurnoutState::Thrown).await.unwrap();

        assert_eq!(f.map.turnout_state(5), Some(TurnoutState::Thrown));
        assert_eq!(f.driver.turnout_calls(), vec![(5, TurnoutState::Thrown)]);
        assert_eq!(*lock(&f.events.0), vec!["turnout/throw/5"]);
        assert_eq!(
            f.recorder.last("routes/turnoutUpdate"),
            Some(ClientEvent::TurnoutUpdate {
                id: 5,
                state: TurnoutState::Thrown
            })
        );
        match f.store.snapshot().nodes.get(&5) {
            Some(MapPoint::Turnout(t)) => assert_eq!(t.state, TurnoutState::Thrown),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_turnout_is_rejected() {
        let f = fixture();
        assert_eq!(
            f.map.set_turnout(99, TurnoutState::Thrown).await,
            Err(RouteError::UnknownTurnout(99))
        );
        assert!(f.driver.calls().is_empty());
    }

    // ===== Route Tests =====

    #[tokio::test]
    async fn route_sets_only_differing_turnouts() {
        let f = fixture();
        let (id, route) = f.map.set_route(1, 2).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(
            route.turnouts,
            vec![TurnoutStateChange {
                id: 5,
                state: TurnoutState::Closed
            }]
        );
        // Already closed: nothing sent.
        assert!(f.driver.turnout_calls().is_empty());
        assert_eq!(f.map.route_holding_turnout(5), Some(1));
        assert_eq!(f.map.route_holding_link(20), Some(1));
        assert_eq!(f.map.route_holding_destination(2), Some(1));
        assert_eq!(f.recorder.count("routes/setRouteComponents"), 1);
        assert_eq!(f.recorder.count("routes/routeUpdate"), 1);
    }

    #[tokio::test]
    async fn overlapping_route_replaces_the_old_one() {
        let f = fixture();
        f.map.set_route(1, 2).await.unwrap();
        let (id, _) = f.map.set_route(1, 3).await.unwrap();

        // The first route's id was freed before the new one was allocated.
        assert_eq!(id, 1);
        assert_eq!(f.map.active_routes().len(), 1);
        assert_eq!(f.map.route_holding_destination(2), None);
        assert_eq!(f.map.route_holding_link(21), None);
        assert_eq!(f.map.turnout_state(5), Some(TurnoutState::Thrown));
        assert_eq!(f.driver.turnout_calls(), vec![(5, TurnoutState::Thrown)]);
        assert_eq!(*lock(&f.events.0), vec!["turnout/throw/5"]);

        match f.recorder.last("routes/unsetRouteComponents") {
            Some(ClientEvent::UnsetRouteComponents(released)) => {
                assert_eq!(released.destinations, vec![1, 2]);
                assert_eq!(released.links, vec![20, 21]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn manual_turnout_change_clears_its_route() {
        let f = fixture();
        f.map.set_route(1, 2).await.unwrap();
        f.map.set_turnout(5, TurnoutState::Thrown).await.unwrap();

        assert!(f.map.active_routes().is_empty());
        assert_eq!(f.map.route_holding_turnout(5), None);
        assert_eq!(f.map.route_holding_link(20), None);
        assert_eq!(f.map.route_holding_destination(1), None);
        assert!(f.map.initial_state().locked.is_empty());
    }

    #[tokio::test]
    async fn failed_route_leaves_active_routes_alone() {
        let f = fixture();
        f.map.set_route(1, 2).await.unwrap();
        assert_eq!(f.map.set_route(1, 1).await, Err(RouteError::NotPossible));
        assert_eq!(f.map.set_route(1, 42).await, Err(RouteError::UnknownNode(42)));
        assert_eq!(f.map.set_route(1, 5).await, Err(RouteError::NotADestination(5)));
        assert_eq!(f.map.active_routes().len(), 1);
    }

    #[tokio::test]
    async fn clear_route_releases_everything() {
        let f = fixture();
        let (id, _) = f.map.set_route(1, 3).await.unwrap();
        let released = f.map.clear_route(id).unwrap();
        assert_eq!(released.turnouts, vec![5]);
        assert_eq!(f.map.clear_route(id), Err(RouteError::UnknownRoute(id)));
        assert!(f.map.active_routes().is_empty());
    }

    // ===== Layout Tests =====

    #[test]
    fn coordinates_are_persisted_and_broadcast() {
        let f = fixture();
        let at = Coordinate::new(1.5, -2.0);
        f.map.update_coordinate(2, at).unwrap();
        assert_eq!(f.map.destination(2).unwrap().coordinate, at);
        assert_eq!(
            f.recorder.last("routes/changeObjectCoordinate"),
            Some(ClientEvent::CoordinateChanged { id: 2, coordinate: at })
        );
        assert_eq!(
            f.map.update_coordinate(77, at),
            Err(RouteError::UnknownNode(77))
        );
    }

    #[tokio::test]
    async fn initial_state_lists_locked_components() {
        let f = fixture();
        f.map.set_route(1, 2).await.unwrap();
        let state = f.map.initial_state();
        assert_eq!(state.turnouts.len(), 1);
        assert_eq!(state.destinations.len(), 3);
        assert_eq!(state.links.len(), 3);
        assert_eq!(state.locked.destinations, vec![1, 2]);
        assert_eq!(state.locked.turnouts, vec![5]);
    }

    #[test]
    fn empty_map_has_nothing() {
        let map = TurnoutMap::empty();
        assert!(map.turnouts().is_empty());
        assert_eq!(map.turnout_state(1), None);
    }
}
