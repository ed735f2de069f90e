//! Shortest-path search over the layout graph.
//!
//! [`find_path`] is Dijkstra's algorithm with one extra rule for turnouts: a
//! path that enters a turnout on one of its direction links (primary or
//! secondary) must leave on the toe, never on the other direction link. A
//! turnout with no toe link, only its two legs, joins them like plain track.
//!
//! [`path_to_turnouts`] turns the node path into a [`RouteObject`] listing
//! the turnout states and links the route needs.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::layout::{find_path, Destination, Layout, MapPoint, Turnout, TurnoutLink};
//!
//! let layout = Layout::from_parts(
//!     vec![
//!         MapPoint::Destination(Destination::new(1, "A")),
//!         MapPoint::Turnout(Turnout::new(2, "B", 10, 11)),
//!         MapPoint::Destination(Destination::new(3, "C")),
//!     ],
//!     vec![TurnoutLink::new(10, 4, 1, 2), TurnoutLink::new(11, 6, 2, 3)],
//! );
//! let path = find_path(&layout.build_graph(), 1, 3).unwrap();
//! assert_eq!(path.nodes, vec![1, 2, 3]);
//! assert_eq!(path.length, 10);
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, trace};

use super::graph::TurnoutGraph;
use super::{Layout, LinkId, NodeId, RouteError, RouteObject, TurnoutState, TurnoutStateChange};

/// A node path and its total length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    /// Node ids from start to end.
    pub nodes: Vec<NodeId>,
    /// Sum of the link lengths along the path.
    pub length: u64,
}

/// Finds the shortest legal path from `start` to `end`.
///
/// # Errors
///
/// - [`RouteError::UnknownNode`] when either end is not in the graph
/// - [`RouteError::NotPossible`] when `start == end`
/// - [`RouteError::BadRoute`] when no legal path exists
pub fn find_path(graph: &TurnoutGraph, start: NodeId, end: NodeId) -> Result<Path, RouteError> {
    for id in [start, end] {
        if !graph.has_vertex(id) {
            return Err(RouteError::UnknownNode(id));
        }
    }
    if start == end {
        return Err(RouteError::NotPossible);
    }

    let mut distances: HashMap<NodeId, u64> = HashMap::new();
    let mut previous: HashMap<NodeId, (NodeId, LinkId)> = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue = BinaryHeap::new();

    distances.insert(start, 0);
    queue.push(Reverse((0u64, start)));

    while let Some(Reverse((distance, id))) = queue.pop() {
        if !visited.insert(id) {
            continue;
        }
        if id == end {
            break;
        }
        let Some(vertex) = graph.vertex(id) else {
            continue;
        };
        let neighbours = graph.neighbours(id);
        let entry_slot = previous
            .get(&id)
            .and_then(|&(_, link)| vertex.slot_of(link));
        // Leg to leg is only legal on a turnout with nothing but its two legs.
        let has_toe = entry_slot.is_some()
            && neighbours.iter().any(|n| vertex.slot_of(n.link).is_none());

        for neighbour in neighbours {
            if visited.contains(&neighbour.vertex) {
                continue;
            }
            if has_toe && vertex.slot_of(neighbour.link).is_some() {
                trace!(turnout = id, link = neighbour.link, "Pruned leg to leg exit");
                continue;
            }
            let candidate = distance + u64::from(neighbour.length);
            let improves = distances
                .get(&neighbour.vertex)
                .map_or(true, |&known| candidate < known);
            if improves {
                distances.insert(neighbour.vertex, candidate);
                previous.insert(neighbour.vertex, (id, neighbour.link));
                queue.push(Reverse((candidate, neighbour.vertex)));
            }
        }
    }

    let Some(&length) = distances.get(&end) else {
        return Err(RouteError::BadRoute);
    };

    let mut nodes = vec![end];
    let mut cursor = end;
    while cursor != start {
        let Some(&(prev, _)) = previous.get(&cursor) else {
            return Err(RouteError::BadRoute);
        };
        nodes.push(prev);
        cursor = prev;
    }
    nodes.reverse();

    debug!(?nodes, length, "Path found");
    Ok(Path { nodes, length })
}

/// Converts a node path into a route.
///
/// Interior turnouts are closed when their primary link touches a path
/// neighbour and thrown when their secondary link does. A turnout matching
/// neither is left out of the route rather than failing it.
///
/// # Errors
///
/// [`RouteError::NotADestination`] when the path does not start and end on
/// destinations, [`RouteError::NotPossible`] for an empty path.
pub fn path_to_turnouts(
    path: &[NodeId],
    layout: &Layout,
    graph: &TurnoutGraph,
) -> Result<RouteObject, RouteError> {
    let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
        return Err(RouteError::NotPossible);
    };
    let start = layout
        .destinations
        .get(&first)
        .cloned()
        .ok_or(RouteError::NotADestination(first))?;
    let end = layout
        .destinations
        .get(&last)
        .cloned()
        .ok_or(RouteError::NotADestination(last))?;

    let mut turnouts = Vec::new();
    for window in path.windows(3) {
        let (prev, node, next) = (window[0], window[1], window[2]);
        let Some(turnout) = layout.turnouts.get(&node) else {
            continue;
        };
        let primary = layout.links.get(&turnout.primary_direction);
        let secondary = layout.links.get(&turnout.secondary_direction);
        let (Some(primary), Some(secondary)) = (primary, secondary) else {
            continue;
        };

        let state = if primary.touches(prev) || primary.touches(next) {
            TurnoutState::Closed
        } else if secondary.touches(prev) || secondary.touches(next) {
            TurnoutState::Thrown
        } else {
            trace!(turnout = node, "No direction link on the path, skipping");
            continue;
        };
        turnouts.push(TurnoutStateChange { id: node, state });
    }

    let links = path
        .windows(2)
        .filter_map(|pair| graph.edge(pair[0], pair[1]))
        .filter_map(|edge| layout.links.get(&edge.link).cloned())
        .collect();

    Ok(RouteObject {
        start,
        end,
        turnouts,
        links,
    })
}
