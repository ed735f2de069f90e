//! Undirected weighted adjacency-list graph over layout nodes.
//!
//! The graph is structural only: it knows which node is a turnout and which
//! links make up its two directions, but not the turnout's current state.
//! It is rebuilt wholesale from the stored layout and never edited in place,
//! so there are no removal operations.

use std::collections::BTreeMap;

use super::{LinkId, NodeId, TurnoutLink};

/// What kind of node a vertex is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexKind {
    /// A route endpoint.
    Destination,
    /// A switch with its two direction links.
    Turnout {
        /// Link selected when closed.
        primary: LinkId,
        /// Link selected when thrown.
        secondary: LinkId,
    },
}

/// Which of a turnout's direction links an edge is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionSlot {
    /// The closed-direction link.
    Primary,
    /// The thrown-direction link.
    Secondary,
}

/// A graph vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vertex {
    /// Node identifier.
    pub id: NodeId,
    /// Node kind.
    pub kind: VertexKind,
}

impl Vertex {
    /// A destination vertex.
    pub const fn destination(id: NodeId) -> Self {
        Self {
            id,
            kind: VertexKind::Destination,
        }
    }

    /// A turnout vertex.
    pub const fn turnout(id: NodeId, primary: LinkId, secondary: LinkId) -> Self {
        Self {
            id,
            kind: VertexKind::Turnout { primary, secondary },
        }
    }

    /// True for turnouts.
    pub fn is_turnout(&self) -> bool {
        matches!(self.kind, VertexKind::Turnout { .. })
    }

    /// Direction slot `link` occupies on this vertex, if it is a turnout
    /// direction link at all.
    pub fn slot_of(&self, link: LinkId) -> Option<DirectionSlot> {
        match self.kind {
            VertexKind::Turnout { primary, .. } if primary == link => Some(DirectionSlot::Primary),
            VertexKind::Turnout { secondary, .. } if secondary == link => {
                Some(DirectionSlot::Secondary)
            }
            _ => None,
        }
    }
}

/// One entry of a vertex's adjacency list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbour {
    /// The node on the other end.
    pub vertex: NodeId,
    /// The link connecting them.
    pub link: LinkId,
    /// Link length.
    pub length: u32,
}

/// Adjacency-list graph of the layout.
#[derive(Clone, Debug, Default)]
pub struct TurnoutGraph {
    vertices: BTreeMap<NodeId, Vertex>,
    adjacency: BTreeMap<NodeId, Vec<Neighbour>>,
    edge_count: usize,
}

impl TurnoutGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex, replacing any vertex with the same id but keeping its edges.
    pub fn add_vertex(&mut self, vertex: Vertex) {
        self.adjacency.entry(vertex.id).or_default();
        self.vertices.insert(vertex.id, vertex);
    }

    /// Adds `link` in both directions.
    ///
    /// Returns `false` (and adds nothing) when either end is missing or the
    /// same link is already present.
    pub fn add_edge(&mut self, link: &TurnoutLink) -> bool {
        if !self.has_vertex(link.start) || !self.has_vertex(link.end) {
            return false;
        }
        let duplicate = self
            .neighbours(link.start)
            .iter()
            .any(|n| n.link == link.id);
        if duplicate {
            return false;
        }
        for (from, to) in [(link.start, link.end), (link.end, link.start)] {
            self.adjacency.entry(from).or_default().push(Neighbour {
                vertex: to,
                link: link.id,
                length: link.length,
            });
        }
        self.edge_count += 1;
        true
    }

    /// Adjacent nodes of `id` (empty for unknown ids).
    pub fn neighbours(&self, id: NodeId) -> &[Neighbour] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The link between `a` and `b`, if directly connected.
    ///
    /// When several links join the same pair the shortest wins.
    pub fn edge(&self, a: NodeId, b: NodeId) -> Option<Neighbour> {
        self.neighbours(a)
            .iter()
            .filter(|n| n.vertex == b)
            .min_by_key(|n| n.length)
            .copied()
    }

    /// Length of the link between `a` and `b`.
    pub fn edge_weight(&self, a: NodeId, b: NodeId) -> Option<u32> {
        self.edge(a, b).map(|n| n.length)
    }

    /// True when `id` is a vertex.
    pub fn has_vertex(&self, id: NodeId) -> bool {
        self.vertices.contains_key(&id)
    }

    /// Looks up a vertex.
    pub fn vertex(&self, id: NodeId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    /// All vertices in id order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
