//! Road network graph as an index-addressed arena
//!
//! Nodes and edges live in flat vectors and are addressed by `NodeId`/`EdgeId`.
//! Splitting an edge never moves or reuses an index: the original edge is
//! tombstoned and the two halves are appended, so ids held by callers stay
//! valid across snapping passes.

use crate::domain::types::CameraId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Points closer than this (meters) are considered the same location
pub const SNAP_EPSILON_M: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
    /// Inserted by edge splitting at a camera location
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    /// Polyline from `from` to `to`, at least two points
    pub geometry: Vec<[f64; 2]>,
    /// Length in meters (used as shortest-path weight)
    pub length: f64,
    pub oneway: bool,
    pub road_category: Option<String>,
    /// False once the edge has been split
    pub active: bool,
}

impl Edge {
    /// Whether the edge can be driven from `node` to its other endpoint
    #[inline]
    pub fn leaves(&self, node: NodeId) -> bool {
        self.from == node || (!self.oneway && self.to == node)
    }

    /// Whether the edge can be driven into `node`
    #[inline]
    pub fn enters(&self, node: NodeId) -> bool {
        self.to == node || (!self.oneway && self.from == node)
    }

    #[inline]
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.from == node {
            self.to
        } else {
            self.from
        }
    }
}

/// Result of splitting an edge at a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitOutcome {
    /// The point lies on an existing endpoint; nothing changed
    Endpoint(NodeId),
    /// The edge was replaced by `head` (from -> node) and `tail` (node -> to)
    Split { node: NodeId, head: EdgeId, tail: EdgeId },
}

impl SplitOutcome {
    pub fn node(&self) -> NodeId {
        match self {
            SplitOutcome::Endpoint(node) => *node,
            SplitOutcome::Split { node, .. } => *node,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, x: f64, y: f64) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { id, x, y, synthetic: false });
        id
    }

    /// Add an edge; a straight segment between the endpoints is used when
    /// `geometry` is empty, and the polyline length when `length` is `None`.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        geometry: Vec<[f64; 2]>,
        length: Option<f64>,
        oneway: bool,
        road_category: Option<String>,
    ) -> EdgeId {
        let geometry = if geometry.len() >= 2 {
            geometry
        } else {
            vec![self.position(from), self.position(to)]
        };
        let length = length.unwrap_or_else(|| polyline_length(&geometry));
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { id, from, to, geometry, length, oneway, road_category, active: true });
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0 as usize]
    }

    #[inline]
    pub fn position(&self, id: NodeId) -> [f64; 2] {
        let node = self.node(id);
        [node.x, node.y]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges, including tombstoned ones
    pub fn all_edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn active_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.active)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn active_edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.active).count()
    }

    /// Outgoing adjacency over active edges: `adj[node] = [(edge, neighbour, length)]`
    pub fn adjacency(&self) -> Vec<Vec<(EdgeId, NodeId, f64)>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for edge in self.active_edges() {
            adj[edge.from.0 as usize].push((edge.id, edge.to, edge.length));
            if !edge.oneway {
                adj[edge.to.0 as usize].push((edge.id, edge.from, edge.length));
            }
        }
        adj
    }

    /// Active edges touching `node`
    pub fn incident_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.active_edges().filter(move |e| e.from == node || e.to == node)
    }

    /// Split an active edge at `point`, which must lie on segment `segment` of
    /// its geometry. Returns the existing endpoint when the point coincides with
    /// one, otherwise inserts a synthetic node and two half edges.
    pub fn split_edge(&mut self, edge_id: EdgeId, segment: usize, point: [f64; 2]) -> SplitOutcome {
        let edge = self.edge(edge_id).clone();
        debug_assert!(edge.active, "split of tombstoned edge {edge_id}");

        if distance(point, self.position(edge.from)) <= SNAP_EPSILON_M {
            return SplitOutcome::Endpoint(edge.from);
        }
        if distance(point, self.position(edge.to)) <= SNAP_EPSILON_M {
            return SplitOutcome::Endpoint(edge.to);
        }

        let segment = segment.min(edge.geometry.len() - 2);
        let mut head_geom: Vec<[f64; 2]> = edge.geometry[..=segment].to_vec();
        head_geom.push(point);
        let mut tail_geom = vec![point];
        tail_geom.extend_from_slice(&edge.geometry[segment + 1..]);

        // Keep the supplied edge length authoritative; split it in proportion
        let geo_head = polyline_length(&head_geom);
        let geo_total = geo_head + polyline_length(&tail_geom);
        let ratio = if geo_total > 0.0 { geo_head / geo_total } else { 0.5 };
        let head_len = edge.length * ratio;
        let tail_len = edge.length - head_len;

        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { id: node, x: point[0], y: point[1], synthetic: true });
        self.edges[edge_id.0 as usize].active = false;

        let head = self.add_edge(
            edge.from,
            node,
            head_geom,
            Some(head_len),
            edge.oneway,
            edge.road_category.clone(),
        );
        let tail =
            self.add_edge(node, edge.to, tail_geom, Some(tail_len), edge.oneway, edge.road_category);

        SplitOutcome::Split { node, head, tail }
    }
}

/// Assignment of a camera onto the network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraMapping {
    pub camera: CameraId,
    /// Edge that leads into the camera's node in its travel direction
    pub edge: EdgeId,
    pub node: NodeId,
    /// Snapped location on the network
    pub x: f64,
    pub y: f64,
    /// Distance from the camera to the snapped point (meters)
    pub distance: f64,
}

/// A reachable ordered pair of cameras
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPair {
    pub origin: CameraId,
    pub destination: CameraId,
    /// Driving distance (meters)
    pub distance: f64,
    /// Edges of the shortest route, in travel order
    pub route: Vec<EdgeId>,
}

// ---------------------------------------------------------------------------
// Planar geometry helpers (projected coordinates, meters)
// ---------------------------------------------------------------------------

#[inline]
pub fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dx * dx + dy * dy).sqrt()
}

pub fn polyline_length(points: &[[f64; 2]]) -> f64 {
    points.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Project point P onto segment AB. Returns the closest point on AB.
pub fn project_point_onto_segment(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len_sq = dx * dx + dy * dy;

    if len_sq < 1e-12 {
        // Degenerate segment
        return a;
    }

    // t = dot(P-A, B-A) / |B-A|² clamped to [0, 1]
    let t = (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_sq).clamp(0.0, 1.0);
    [a[0] + t * dx, a[1] + t * dy]
}

/// Bearing of segment AB in degrees clockwise from north (y axis), in [0, 360)
pub fn bearing(a: [f64; 2], b: [f64; 2]) -> f64 {
    let deg = (b[0] - a[0]).atan2(b[1] - a[1]).to_degrees();
    (deg + 360.0) % 360.0
}

/// Smallest absolute difference between two bearings, in [0, 180]
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}
