//! Camera-to-network snapping
//!
//! Each pass queries the spatial index for every camera in parallel, then
//! applies the chosen snaps one at a time: the chosen edge is split at the
//! projected camera location so the camera gets its own node. Cameras whose
//! edge is split again later are re-mapped to the edge approaching their node.
//! Passes stop once no camera changes its assignment.

use crate::domain::network::{
    bearing, bearing_difference, distance, project_point_onto_segment, CameraMapping, Edge, EdgeId,
    NetworkGraph, NodeId, SplitOutcome,
};
use crate::domain::types::{Camera, CameraId, Direction};
use crate::infra::config::MapperConfig;
use crate::infra::diagnostics::{DiagnosticKind, Diagnostics};
use crate::services::spatial_index::{Candidates, EdgeCandidate, SpatialIndex};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Result of mapping cameras onto a network
#[derive(Debug, Clone)]
pub struct MappingOutcome {
    /// Graph with camera nodes inserted
    pub graph: NetworkGraph,
    /// One mapping per snapped camera, in input order
    pub mappings: Vec<CameraMapping>,
    /// Commissioned cameras with no edge within range
    pub unmapped: Vec<CameraId>,
    /// Cameras skipped because they are not commissioned
    pub decommissioned: Vec<CameraId>,
    pub passes_run: u32,
    pub converged: bool,
}

impl MappingOutcome {
    pub fn mapping(&self, camera: &CameraId) -> Option<&CameraMapping> {
        self.mappings.iter().find(|m| &m.camera == camera)
    }
}

/// Where a camera sits after a pass
#[derive(Debug, Clone, Copy, PartialEq)]
struct Assignment {
    edge: EdgeId,
    node: NodeId,
}

/// Snaps cameras onto a road network over multiple passes
pub struct NetworkMapper<'a> {
    config: &'a MapperConfig,
    diagnostics: &'a Diagnostics,
}

impl<'a> NetworkMapper<'a> {
    pub fn new(config: &'a MapperConfig, diagnostics: &'a Diagnostics) -> Self {
        Self { config, diagnostics }
    }

    pub fn map(&self, cameras: &[Camera], mut graph: NetworkGraph) -> MappingOutcome {
        let (active, decommissioned): (Vec<&Camera>, Vec<&Camera>) =
            cameras.iter().partition(|c| c.is_commissioned);
        for camera in &decommissioned {
            self.diagnostics.record(DiagnosticKind::CameraDecommissioned);
            debug!(camera = %camera.id, "camera_decommissioned_skipped");
        }

        let mut assignments: Vec<Option<Assignment>> = vec![None; active.len()];
        // Tombstoned edge -> (head, tail) halves, to resolve stale candidates
        let mut lineage: FxHashMap<EdgeId, (EdgeId, EdgeId)> = FxHashMap::default();
        let mut passes_run = 0;
        let mut converged = false;

        for pass in 1..=self.config.passes {
            passes_run = pass;
            let index = SpatialIndex::build(&graph);

            // Queries are independent per camera; the graph is read-only here
            let choices: Vec<Option<EdgeCandidate>> = active
                .par_iter()
                .map(|camera| {
                    let candidates = index.edges_within(camera.position(), self.config.camera_range);
                    self.choose(camera, &candidates, &graph)
                })
                .collect();

            // Single writer: apply splits in camera order
            let mut next: Vec<Option<Assignment>> = vec![None; active.len()];
            let mut splits = 0u64;
            for (i, (camera, choice)) in active.iter().zip(choices).enumerate() {
                let Some(choice) = choice else {
                    continue;
                };
                let (edge, segment) = resolve_active(&graph, &lineage, choice.edge, choice.point);
                let outcome = graph.split_edge(edge, segment, choice.point);
                if let SplitOutcome::Split { head, tail, .. } = outcome {
                    lineage.insert(edge, (head, tail));
                    splits += 1;
                }
                let node = outcome.node();
                let approach = approach_edge(&graph, node, camera.direction).unwrap_or(edge);
                next[i] = Some(Assignment { edge: approach, node });
            }

            // Re-evaluate cameras whose edge was split by a later camera
            for (camera, slot) in active.iter().zip(next.iter_mut()) {
                if let Some(assignment) = slot {
                    if !graph.edge(assignment.edge).active {
                        if let Some(edge) = approach_edge(&graph, assignment.node, camera.direction) {
                            assignment.edge = edge;
                        }
                    }
                }
            }

            let changed = next.iter().zip(&assignments).filter(|(n, p)| n != p).count();
            self.diagnostics.record_n(DiagnosticKind::EdgeSplit, splits);
            info!(
                pass = pass,
                mapped = next.iter().filter(|a| a.is_some()).count(),
                changed = changed,
                edges_split = splits,
                "mapping_pass_complete"
            );

            assignments = next;
            if changed == 0 {
                converged = true;
                break;
            }
        }

        let mut mappings = Vec::with_capacity(active.len());
        let mut unmapped = Vec::new();
        for (camera, assignment) in active.iter().zip(&assignments) {
            match assignment {
                Some(a) => {
                    let node = graph.node(a.node);
                    mappings.push(CameraMapping {
                        camera: camera.id.clone(),
                        edge: a.edge,
                        node: a.node,
                        x: node.x,
                        y: node.y,
                        distance: distance(camera.position(), [node.x, node.y]),
                    });
                }
                None => {
                    let id = camera.id.clone();
                    self.diagnostics.record_with(DiagnosticKind::CameraUnmapped, || {
                        format!("camera {id} has no edge within {} m", self.config.camera_range)
                    });
                    unmapped.push(camera.id.clone());
                }
            }
        }

        info!(
            mapped = mappings.len(),
            unmapped = unmapped.len(),
            decommissioned = decommissioned.len(),
            passes = passes_run,
            converged = converged,
            "camera_mapping_complete"
        );

        MappingOutcome {
            graph,
            mappings,
            unmapped,
            decommissioned: decommissioned.into_iter().map(|c| c.id.clone()).collect(),
            passes_run,
            converged,
        }
    }

    /// Pick one candidate: same road category first, then direction-compatible,
    /// then nearest. Candidates arrive sorted by distance.
    fn choose(&self, camera: &Camera, candidates: &Candidates, graph: &NetworkGraph) -> Option<EdgeCandidate> {
        let mut pool: Vec<&EdgeCandidate> = candidates.iter().collect();

        if let Some(category) = camera.road_category.as_deref() {
            let same: Vec<&EdgeCandidate> = pool
                .iter()
                .copied()
                .filter(|c| graph.edge(c.edge).road_category.as_deref() == Some(category))
                .collect();
            if !same.is_empty() {
                pool = same;
            }
        }

        if let Some(direction) = camera.direction {
            let compatible = pool.iter().find(|c| {
                direction_compatible(graph.edge(c.edge), c, direction, self.config.direction_tolerance_deg)
            });
            if let Some(c) = compatible {
                return Some(**c);
            }
        }

        pool.first().map(|c| **c)
    }
}

/// Whether a traversable direction of the candidate segment matches `direction`
fn direction_compatible(edge: &Edge, candidate: &EdgeCandidate, direction: Direction, tolerance: f64) -> bool {
    let forward = bearing(candidate.a, candidate.b);
    if bearing_difference(forward, direction.bearing()) <= tolerance {
        return true;
    }
    !edge.oneway && bearing_difference((forward + 180.0) % 360.0, direction.bearing()) <= tolerance
}

/// Follow split lineage from a possibly tombstoned edge to the active edge
/// containing `point`, returning it with the index of its closest segment
fn resolve_active(
    graph: &NetworkGraph,
    lineage: &FxHashMap<EdgeId, (EdgeId, EdgeId)>,
    mut edge: EdgeId,
    point: [f64; 2],
) -> (EdgeId, usize) {
    while let Some(&(head, tail)) = lineage.get(&edge) {
        let (dh, _) = closest_segment(graph.edge(head), point);
        let (dt, _) = closest_segment(graph.edge(tail), point);
        edge = if dh <= dt { head } else { tail };
    }
    let (_, segment) = closest_segment(graph.edge(edge), point);
    (edge, segment)
}

fn closest_segment(edge: &Edge, point: [f64; 2]) -> (f64, usize) {
    edge.geometry
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let p = project_point_onto_segment(point, w[0], w[1]);
            (distance(point, p), i)
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .unwrap_or((f64::INFINITY, 0))
}

/// Bearing of travel arriving at `node` along `edge`
fn arrival_bearing(edge: &Edge, node: NodeId) -> f64 {
    let g = &edge.geometry;
    let n = g.len();
    if edge.to == node {
        bearing(g[n - 2], g[n - 1])
    } else {
        bearing(g[1], g[0])
    }
}

/// Active edge leading into `node` in the camera's direction of travel.
///
/// With a direction, the arrival bearing closest to it wins. Without one,
/// edges whose `to` is the node win over reverse traversals of two-way edges.
/// Ties go to the lowest edge id.
pub fn approach_edge(graph: &NetworkGraph, node: NodeId, direction: Option<Direction>) -> Option<EdgeId> {
    let entering = graph.incident_edges(node).filter(|e| e.enters(node));

    match direction {
        Some(d) => entering
            .map(|e| (bearing_difference(arrival_bearing(e, node), d.bearing()), e.id))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id),
        None => entering.map(|e| (e.to != node, e.id)).min().map(|(_, id)| id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MapperConfig {
        MapperConfig { passes: 3, camera_range: 40.0, direction_tolerance_deg: 60.0 }
    }

    /// Straight two-way road along y=0 from x=0 to x=1000
    fn straight_road() -> NetworkGraph {
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(1000.0, 0.0);
        graph.add_edge(a, b, vec![], None, false, Some("A".to_string()));
        graph
    }

    #[test]
    fn test_single_camera_splits_edge() {
        let diag = Diagnostics::new();
        let cfg = config();
        let mapper = NetworkMapper::new(&cfg, &diag);
        let cameras = vec![Camera::new("C1", 300.0, 5.0).with_direction(Direction::East)];

        let outcome = mapper.map(&cameras, straight_road());

        assert_eq!(outcome.mappings.len(), 1);
        let m = &outcome.mappings[0];
        assert_eq!((m.x, m.y), (300.0, 0.0));
        assert!((m.distance - 5.0).abs() < 1e-9);
        let edge = outcome.graph.edge(m.edge);
        assert!(edge.active);
        assert_eq!(edge.to, m.node);
        assert!((edge.length - 300.0).abs() < 1e-9);
        assert!(outcome.converged);
        assert_eq!(outcome.passes_run, 2);
        assert_eq!(diag.count(DiagnosticKind::EdgeSplit), 1);
    }

    #[test]
    fn test_westbound_camera_maps_to_reverse_half() {
        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![Camera::new("C1", 300.0, 5.0).with_direction(Direction::West)];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, straight_road());

        let m = &outcome.mappings[0];
        let edge = outcome.graph.edge(m.edge);
        // The tail half (node -> east end) is traversed westward into the node
        assert_eq!(edge.from, m.node);
        assert!((edge.length - 700.0).abs() < 1e-9);
    }

    #[test]
    fn test_camera_out_of_range_is_unmapped() {
        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![Camera::new("FAR", 500.0, 500.0), Camera::new("NEAR", 10.0, 1.0)];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, straight_road());

        assert_eq!(outcome.unmapped, vec![CameraId::new("FAR")]);
        assert_eq!(outcome.mappings.len(), 1);
        assert_eq!(diag.count(DiagnosticKind::CameraUnmapped), 1);
    }

    #[test]
    fn test_decommissioned_camera_skipped() {
        let diag = Diagnostics::new();
        let cfg = config();
        let mut off = Camera::new("OFF", 100.0, 0.0);
        off.is_commissioned = false;
        let outcome = NetworkMapper::new(&cfg, &diag).map(&[off], straight_road());

        assert!(outcome.mappings.is_empty());
        assert_eq!(outcome.decommissioned, vec![CameraId::new("OFF")]);
        assert!(outcome.unmapped.is_empty());
    }

    #[test]
    fn test_two_cameras_on_same_edge_are_both_addressable() {
        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![
            Camera::new("C1", 600.0, 3.0).with_direction(Direction::East),
            Camera::new("C2", 200.0, 3.0).with_direction(Direction::East),
        ];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, straight_road());

        let c1 = outcome.mapping(&CameraId::new("C1")).unwrap();
        let c2 = outcome.mapping(&CameraId::new("C2")).unwrap();
        assert_ne!(c1.node, c2.node);
        // C1's approach edge was split by C2 and re-evaluated to C2 -> C1
        let e1 = outcome.graph.edge(c1.edge);
        assert!(e1.active);
        assert_eq!(e1.from, c2.node);
        assert_eq!(e1.to, c1.node);
        assert!((e1.length - 400.0).abs() < 1e-9);
        assert_eq!(outcome.graph.active_edge_count(), 3);
    }

    #[test]
    fn test_mapping_is_stable_after_convergence() {
        let diag = Diagnostics::new();
        let cameras = vec![
            Camera::new("C1", 600.0, 3.0).with_direction(Direction::East),
            Camera::new("C2", 200.0, -3.0).with_direction(Direction::West),
        ];
        let cfg = config();
        let first = NetworkMapper::new(&cfg, &diag).map(&cameras, straight_road());
        assert!(first.converged);

        let again = NetworkMapper::new(&cfg, &diag).map(&cameras, first.graph.clone());
        assert_eq!(again.mappings, first.mappings);
        assert_eq!(again.graph.node_count(), first.graph.node_count());
        assert_eq!(again.graph.active_edge_count(), first.graph.active_edge_count());
        assert!(again.converged);
    }

    #[test]
    fn test_direction_preferred_over_distance() {
        // Oneway northbound road at x=10 and oneway eastbound road at y=0
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(10.0, -100.0);
        let b = graph.add_node(10.0, 100.0);
        let c = graph.add_node(-100.0, -20.0);
        let d = graph.add_node(100.0, -20.0);
        graph.add_edge(a, b, vec![], None, true, None);
        graph.add_edge(c, d, vec![], None, true, None);

        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![Camera::new("C1", 0.0, 0.0).with_direction(Direction::East)];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, graph);

        let m = &outcome.mappings[0];
        assert_eq!((m.x, m.y), (0.0, -20.0));
    }

    #[test]
    fn test_incompatible_direction_falls_back_to_nearest_edge() {
        // Only a oneway northbound road; the camera claims eastbound traffic
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(0.0, 1000.0);
        graph.add_edge(a, b, vec![], None, true, None);

        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![Camera::new("C1", 5.0, 300.0).with_direction(Direction::East)];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, graph);

        assert!(outcome.unmapped.is_empty());
        let m = &outcome.mappings[0];
        assert_eq!((m.x, m.y), (0.0, 300.0));
        assert!((m.distance - 5.0).abs() < 1e-9);
        let edge = outcome.graph.edge(m.edge);
        assert!(edge.active);
        assert!(edge.oneway);
        assert_eq!(edge.to, m.node);
    }

    #[test]
    fn test_road_category_restricts_candidates() {
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(100.0, 0.0);
        let c = graph.add_node(0.0, 10.0);
        let d = graph.add_node(100.0, 10.0);
        graph.add_edge(a, b, vec![], None, false, Some("B".to_string()));
        graph.add_edge(c, d, vec![], None, false, Some("A".to_string()));

        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![Camera::new("C1", 50.0, 2.0).with_road_category("A")];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, graph);

        assert_eq!(outcome.mappings[0].y, 10.0);
    }

    #[test]
    fn test_camera_on_existing_node_does_not_split() {
        let diag = Diagnostics::new();
        let cfg = config();
        let cameras = vec![Camera::new("END", 1000.0, 0.0)];
        let outcome = NetworkMapper::new(&cfg, &diag).map(&cameras, straight_road());

        assert_eq!(outcome.mappings[0].node, NodeId(1));
        assert_eq!(outcome.mappings[0].edge, EdgeId(0));
        assert_eq!(outcome.graph.node_count(), 2);
    }
}
