//! Track layout model: turnouts, destinations and the links between them.
//!
//! The layout is a weighted undirected graph. Destinations are the named
//! endpoints a route can be requested between; turnouts are the switches in
//! between, each tying its two directions to a specific connecting link.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`graph`] | Adjacency-list graph used for path finding |
//! | [`route_finder`] | Shortest path search and path-to-route conversion |
//! | [`turnout_map`] | Turnout state, active routes and conflict bookkeeping |
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::layout::{TurnoutState, Turnout, Coordinate};
//!
//! let turnout = Turnout::new(5, "Yard throat", 10, 11);
//! assert_eq!(turnout.state, TurnoutState::Closed);
//! assert_eq!(TurnoutState::Thrown.event_name(), "throw");
//! assert_eq!(turnout.coordinate, Coordinate::default());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod graph;
pub mod route_finder;
pub mod turnout_map;

pub use graph::{Neighbour, TurnoutGraph, Vertex, VertexKind};
pub use route_finder::{find_path, path_to_turnouts, Path};
pub use turnout_map::{InitialLayoutState, TurnoutMap};

/// Identifier of a turnout or destination.
pub type NodeId = i64;

/// Identifier of a link between two nodes.
pub type LinkId = i64;

/// Identifier of an active route.
pub type RouteId = u32;

// ============================================================================
// Primitive Types
// ============================================================================

/// Position of a node on the layout diagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Coordinate {
    /// Creates a coordinate.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Position of a turnout's blades.
///
/// Closed selects the primary direction, thrown the secondary one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnoutState {
    /// Set for the primary direction.
    #[default]
    Closed,
    /// Set for the secondary direction.
    Thrown,
}

impl TurnoutState {
    /// Returns the state as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TurnoutState::Closed => "closed",
            TurnoutState::Thrown => "thrown",
        }
    }

    /// Parses `"closed"`/`"close"`/`"0"` or `"thrown"`/`"throw"`/`"1"`.
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" | "close" | "0" => Some(TurnoutState::Closed),
            "thrown" | "throw" | "1" => Some(TurnoutState::Thrown),
            _ => None,
        }
    }

    /// Verb used in turnout event paths (`turnout/<verb>/<id>`).
    pub const fn event_name(&self) -> &'static str {
        match self {
            TurnoutState::Closed => "close",
            TurnoutState::Thrown => "throw",
        }
    }

    /// Numeric state sent to the command station.
    pub const fn hardware_code(&self) -> u8 {
        match self {
            TurnoutState::Closed => 0,
            TurnoutState::Thrown => 1,
        }
    }
}

// ============================================================================
// Map Points
// ============================================================================

/// A track switch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turnout {
    /// Node identifier, also the accessory address on the command station.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Diagram position.
    #[serde(default)]
    pub coordinate: Coordinate,
    /// Current blade position.
    #[serde(default)]
    pub state: TurnoutState,
    /// Link selected when closed.
    pub primary_direction: LinkId,
    /// Link selected when thrown.
    pub secondary_direction: LinkId,
}

impl Turnout {
    /// Creates a closed turnout at the origin.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        primary_direction: LinkId,
        secondary_direction: LinkId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            coordinate: Coordinate::default(),
            state: TurnoutState::Closed,
            primary_direction,
            secondary_direction,
        }
    }

    /// Sets the diagram position.
    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = coordinate;
        self
    }

    /// Sets the initial state.
    pub fn with_state(mut self, state: TurnoutState) -> Self {
        self.state = state;
        self
    }
}

/// A named endpoint that routes can be set between.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Node identifier.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Free text shown to operators.
    #[serde(default)]
    pub description: String,
    /// Diagram position.
    #[serde(default)]
    pub coordinate: Coordinate,
}

impl Destination {
    /// Creates a destination at the origin.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            coordinate: Coordinate::default(),
        }
    }

    /// Sets the diagram position.
    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = coordinate;
        self
    }
}

/// Any vertex of the layout graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MapPoint {
    /// A track switch.
    Turnout(Turnout),
    /// A route endpoint.
    Destination(Destination),
}

impl MapPoint {
    /// Node identifier.
    pub fn id(&self) -> NodeId {
        match self {
            MapPoint::Turnout(t) => t.id,
            MapPoint::Destination(d) => d.id,
        }
    }

    /// Diagram position.
    pub fn coordinate(&self) -> Coordinate {
        match self {
            MapPoint::Turnout(t) => t.coordinate,
            MapPoint::Destination(d) => d.coordinate,
        }
    }
}

/// A physical track segment between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnoutLink {
    /// Link identifier.
    pub id: LinkId,
    /// Length used as the path-finding weight.
    pub length: u32,
    /// One end.
    pub start: NodeId,
    /// The other end.
    pub end: NodeId,
    /// Intermediate drawing points.
    #[serde(default)]
    pub points: Vec<Coordinate>,
}

impl TurnoutLink {
    /// Creates a straight link.
    pub fn new(id: LinkId, length: u32, start: NodeId, end: NodeId) -> Self {
        Self {
            id,
            length,
            start,
            end,
            points: Vec::new(),
        }
    }

    /// True when `node` is one of the link's ends.
    pub fn touches(&self, node: NodeId) -> bool {
        self.start == node || self.end == node
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Required state of one turnout along a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnoutStateChange {
    /// Turnout to set.
    pub id: NodeId,
    /// State it must be in.
    pub state: TurnoutState,
}

/// A computed route between two destinations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteObject {
    /// Where the route begins.
    pub start: Destination,
    /// Where the route ends.
    pub end: Destination,
    /// Turnout states the route needs.
    pub turnouts: Vec<TurnoutStateChange>,
    /// Links the route occupies, in travel order.
    pub links: Vec<TurnoutLink>,
}

impl RouteObject {
    /// Component ids this route locks.
    pub fn components(&self) -> RouteComponents {
        RouteComponents {
            destinations: vec![self.start.id, self.end.id],
            turnouts: self.turnouts.iter().map(|t| t.id).collect(),
            links: self.links.iter().map(|l| l.id).collect(),
        }
    }
}

/// Ids of layout components locked or released by routes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteComponents {
    /// Destination ids.
    pub destinations: Vec<NodeId>,
    /// Turnout ids.
    pub turnouts: Vec<NodeId>,
    /// Link ids.
    pub links: Vec<LinkId>,
}

impl RouteComponents {
    /// Appends another set of components.
    pub fn extend(&mut self, other: RouteComponents) {
        self.destinations.extend(other.destinations);
        self.turnouts.extend(other.turnouts);
        self.links.extend(other.links);
    }

    /// True when nothing is listed.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty() && self.turnouts.is_empty() && self.links.is_empty()
    }
}

/// The static layout tables, indexed by id.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    /// Turnouts by id.
    pub turnouts: BTreeMap<NodeId, Turnout>,
    /// Destinations by id.
    pub destinations: BTreeMap<NodeId, Destination>,
    /// Links by id.
    pub links: BTreeMap<LinkId, TurnoutLink>,
}

impl Layout {
    /// Builds the tables from persisted nodes and links.
    pub fn from_parts(nodes: Vec<MapPoint>, links: Vec<TurnoutLink>) -> Self {
        let mut layout = Layout::default();
        for node in nodes {
            match node {
                MapPoint::Turnout(t) => {
                    layout.turnouts.insert(t.id, t);
                }
                MapPoint::Destination(d) => {
                    layout.destinations.insert(d.id, d);
                }
            }
        }
        layout.links = links.into_iter().map(|l| (l.id, l)).collect();
        layout
    }

    /// Builds the path-finding graph: turnouts, then destinations, then links.
    pub fn build_graph(&self) -> TurnoutGraph {
        let mut graph = TurnoutGraph::new();
        for turnout in self.turnouts.values() {
            graph.add_vertex(Vertex::turnout(
                turnout.id,
                turnout.primary_direction,
                turnout.secondary_direction,
            ));
        }
        for destination in self.destinations.values() {
            graph.add_vertex(Vertex::destination(destination.id));
        }
        for link in self.links.values() {
            if !graph.add_edge(link) {
                tracing::warn!(link = link.id, "Ignoring link with an unknown end");
            }
        }
        graph
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a route or turnout request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No path connects the endpoints.
    #[error("Bad route")]
    BadRoute,
    /// The request can never produce a route (for example start equals end).
    #[error("Not possible")]
    NotPossible,
    /// A node id is not part of the layout.
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),
    /// A route endpoint is not a destination.
    #[error("Node {0} is not a destination")]
    NotADestination(NodeId),
    /// A turnout id is not part of the layout.
    #[error("Unknown turnout {0}")]
    UnknownTurnout(NodeId),
    /// A route id is not active.
    #[error("Unknown route {0}")]
    UnknownRoute(RouteId),
    /// Persisting the change failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turnout_state_text() {
        assert_eq!(TurnoutState::from_text("THROWN"), Some(TurnoutState::Thrown));
        assert_eq!(TurnoutState::from_text(" close "), Some(TurnoutState::Closed));
        assert_eq!(TurnoutState::from_text("sideways"), None);
        assert_eq!(TurnoutState::Thrown.hardware_code(), 1);
        assert_eq!(TurnoutState::Closed.hardware_code(), 0);
    }

    #[test]
    fn map_point_serializes_with_type_tag() {
        let point = MapPoint::Destination(Destination::new(-1, "Platform 1"));
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["type"], "destination");
        assert_eq!(json["name"], "Platform 1");
    }

    #[test]
    fn layout_builds_graph_and_skips_dangling_links() {
        let layout = Layout::from_parts(
            vec![
                MapPoint::Destination(Destination::new(1, "A")),
                MapPoint::Turnout(Turnout::new(2, "B", 10, 11)),
            ],
            vec![TurnoutLink::new(10, 5, 1, 2), TurnoutLink::new(11, 5, 2, 99)],
        );
        let graph = layout.build_graph();
        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn route_components_lists_everything() {
        let route = RouteObject {
            start: Destination::new(1, "A"),
            end: Destination::new(3, "C"),
            turnouts: vec![TurnoutStateChange {
                id: 2,
                state: TurnoutState::Thrown,
            }],
            links: vec![TurnoutLink::new(10, 1, 1, 2)],
        };
        let components = route.components();
        assert_eq!(components.destinations, vec![1, 3]);
        assert_eq!(components.turnouts, vec![2]);
        assert_eq!(components.links, vec![10]);
    }
}
