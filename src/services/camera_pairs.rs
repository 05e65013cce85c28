//! Shortest-path distances between mapped cameras
//!
//! One Dijkstra search per origin camera over the active edges of the mapped
//! graph. A destination is reached when the search arrives at its node along
//! its approach edge, so a camera observing one carriageway is only reached by
//! traffic travelling in its direction.

use crate::domain::network::{CameraMapping, CameraPair, EdgeId, NetworkGraph, NodeId};
use crate::infra::diagnostics::{DiagnosticKind, Diagnostics};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::info;

#[derive(Debug, Clone, Copy)]
struct DijkstraState {
    cost: f64,
    node: NodeId,
}

impl PartialEq for DijkstraState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DijkstraState {}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse ordering
        other.cost.total_cmp(&self.cost).then_with(|| other.node.cmp(&self.node))
    }
}

/// Single-source shortest path tree
struct ShortestPaths {
    dist: Vec<f64>,
    /// Edge and predecessor node used to reach each node
    prev: Vec<Option<(EdgeId, NodeId)>>,
}

impl ShortestPaths {
    fn search(adjacency: &[Vec<(EdgeId, NodeId, f64)>], source: NodeId) -> Self {
        let n = adjacency.len();
        let mut dist = vec![f64::INFINITY; n];
        let mut prev = vec![None; n];
        let mut heap = BinaryHeap::new();

        dist[source.0 as usize] = 0.0;
        heap.push(DijkstraState { cost: 0.0, node: source });

        while let Some(DijkstraState { cost, node }) = heap.pop() {
            if cost > dist[node.0 as usize] {
                continue;
            }
            for &(edge, next, length) in &adjacency[node.0 as usize] {
                let candidate = cost + length;
                if candidate < dist[next.0 as usize] {
                    dist[next.0 as usize] = candidate;
                    prev[next.0 as usize] = Some((edge, node));
                    heap.push(DijkstraState { cost: candidate, node: next });
                }
            }
        }

        Self { dist, prev }
    }

    /// Edges from the source to `target`, in travel order
    fn route_to(&self, target: NodeId) -> Vec<EdgeId> {
        let mut route = Vec::new();
        let mut current = target;
        while let Some((edge, from)) = self.prev[current.0 as usize] {
            route.push(edge);
            current = from;
        }
        route.reverse();
        route
    }
}

/// Compute every reachable ordered pair of distinct mapped cameras.
///
/// Pairs are returned grouped by origin in mapping order; unreachable pairs
/// are omitted and counted.
pub fn camera_pairs(graph: &NetworkGraph, mappings: &[CameraMapping], diagnostics: &Diagnostics) -> Vec<CameraPair> {
    let adjacency = graph.adjacency();

    let pairs: Vec<CameraPair> = mappings
        .par_iter()
        .flat_map_iter(|origin| {
            let tree = ShortestPaths::search(&adjacency, origin.node);
            let mut found = Vec::new();

            for destination in mappings {
                if destination.camera == origin.camera {
                    continue;
                }
                match arrival(graph, &tree, destination) {
                    Some((distance, route)) => found.push(CameraPair {
                        origin: origin.camera.clone(),
                        destination: destination.camera.clone(),
                        distance,
                        route,
                    }),
                    None => diagnostics.record(DiagnosticKind::PairUnreachable),
                }
            }
            found
        })
        .collect();

    info!(
        cameras = mappings.len(),
        pairs = pairs.len(),
        unreachable = diagnostics.count(DiagnosticKind::PairUnreachable),
        "camera_pairs_computed"
    );
    pairs
}

/// Distance and route into the destination node along its approach edge
fn arrival(graph: &NetworkGraph, tree: &ShortestPaths, destination: &CameraMapping) -> Option<(f64, Vec<EdgeId>)> {
    let approach = graph.edge(destination.edge);
    if !approach.active || !approach.enters(destination.node) {
        // No usable approach edge: fall back to plain node distance
        let d = tree.dist[destination.node.0 as usize];
        return d.is_finite().then(|| (d, tree.route_to(destination.node)));
    }

    let before = approach.other_end(destination.node);
    let d = tree.dist[before.0 as usize];
    if !d.is_finite() {
        return None;
    }
    let mut route = tree.route_to(before);
    route.push(approach.id);
    Some((d + approach.length, route))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CameraId;

    fn mapping(camera: &str, edge: EdgeId, node: NodeId) -> CameraMapping {
        CameraMapping { camera: CameraId::new(camera), edge, node, x: 0.0, y: 0.0, distance: 0.0 }
    }

    /// a -(100)-> b -(200)-> c, oneway
    fn chain() -> (NetworkGraph, [NodeId; 3], [EdgeId; 2]) {
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(100.0, 0.0);
        let c = graph.add_node(300.0, 0.0);
        let ab = graph.add_edge(a, b, vec![], None, true, None);
        let bc = graph.add_edge(b, c, vec![], None, true, None);
        (graph, [a, b, c], [ab, bc])
    }

    #[test]
    fn test_pairs_follow_oneway_edges() {
        let (graph, [a, b, c], [ab, bc]) = chain();
        let mappings = vec![mapping("A", ab, a), mapping("B", ab, b), mapping("C", bc, c)];
        let diag = Diagnostics::new();

        let pairs = camera_pairs(&graph, &mappings, &diag);

        let find = |o: &str, d: &str| {
            pairs.iter().find(|p| p.origin.as_str() == o && p.destination.as_str() == d)
        };
        let ac = find("A", "C").unwrap();
        assert!((ac.distance - 300.0).abs() < 1e-9);
        assert_eq!(ac.route, vec![ab, bc]);
        assert!((find("B", "C").unwrap().distance - 200.0).abs() < 1e-9);
        assert!(find("C", "A").is_none());
        assert!(find("A", "A").is_none());
        assert!(pairs.iter().all(|p| p.distance >= 0.0 && p.origin != p.destination));
    }

    #[test]
    fn test_unreachable_pairs_are_counted() {
        let (graph, [a, b, c], [ab, bc]) = chain();
        let mappings = vec![mapping("A", ab, a), mapping("B", ab, b), mapping("C", bc, c)];
        let diag = Diagnostics::new();

        let pairs = camera_pairs(&graph, &mappings, &diag);

        // Against the oneway chain: B->A, C->A and C->B
        assert_eq!(pairs.len(), 3);
        assert_eq!(diag.count(DiagnosticKind::PairUnreachable), 3);
    }

    #[test]
    fn test_pair_uses_shortest_alternative() {
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(100.0, 0.0);
        let c = graph.add_node(50.0, 500.0);
        let direct = graph.add_edge(a, b, vec![], None, false, None);
        graph.add_edge(a, c, vec![], None, false, None);
        graph.add_edge(c, b, vec![], None, false, None);

        let mappings = vec![mapping("A", direct, a), mapping("B", direct, b)];
        let diag = Diagnostics::new();
        let pairs = camera_pairs(&graph, &mappings, &diag);

        let ab = pairs.iter().find(|p| p.origin.as_str() == "A").unwrap();
        assert!((ab.distance - 100.0).abs() < 1e-9);
        assert_eq!(ab.route, vec![direct]);
    }

    #[test]
    fn test_heap_state_equality_matches_ordering() {
        let x = DijkstraState { cost: 10.0, node: NodeId(1) };
        let y = DijkstraState { cost: 10.0, node: NodeId(2) };

        assert_ne!(x, y);
        assert_ne!(x.cmp(&y), Ordering::Equal);
        assert_eq!(x, DijkstraState { cost: 10.0, node: NodeId(1) });
    }
}
