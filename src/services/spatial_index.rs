//! Spatial index over network edge segments for camera snapping

use crate::domain::network::{distance, project_point_onto_segment, EdgeId, NetworkGraph};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// One straight segment of an edge polyline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexedSegment {
    pub edge: EdgeId,
    /// Index of the segment within the edge geometry
    pub segment: usize,
    pub a: [f64; 2],
    pub b: [f64; 2],
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.a, self.b)
    }
}

impl PointDistance for IndexedSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let p = project_point_onto_segment(*point, self.a, self.b);
        let dx = p[0] - point[0];
        let dy = p[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Closest point of one edge to a query location
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeCandidate {
    pub edge: EdgeId,
    pub segment: usize,
    /// Projection of the query onto the segment
    pub point: [f64; 2],
    pub distance: f64,
    /// Segment endpoints in edge direction
    pub a: [f64; 2],
    pub b: [f64; 2],
}

pub type Candidates = SmallVec<[EdgeCandidate; 8]>;

/// R-tree over the segments of all active edges.
///
/// Built from a graph snapshot; rebuild after edges are split.
pub struct SpatialIndex {
    tree: RTree<IndexedSegment>,
}

impl SpatialIndex {
    pub fn build(graph: &NetworkGraph) -> Self {
        let segments: Vec<IndexedSegment> = graph
            .active_edges()
            .flat_map(|edge| {
                edge.geometry.windows(2).enumerate().map(move |(i, w)| IndexedSegment {
                    edge: edge.id,
                    segment: i,
                    a: w[0],
                    b: w[1],
                })
            })
            .collect();

        Self { tree: RTree::bulk_load(segments) }
    }

    /// Edges with a segment within `range` of `point`, closest segment per
    /// edge, sorted by distance (ties broken by edge id).
    pub fn edges_within(&self, point: [f64; 2], range: f64) -> Candidates {
        let mut best: FxHashMap<EdgeId, EdgeCandidate> = FxHashMap::default();

        for seg in self.tree.locate_within_distance(point, range * range) {
            let projected = project_point_onto_segment(point, seg.a, seg.b);
            let d = distance(point, projected);
            let candidate = EdgeCandidate {
                edge: seg.edge,
                segment: seg.segment,
                point: projected,
                distance: d,
                a: seg.a,
                b: seg.b,
            };
            best.entry(seg.edge)
                .and_modify(|c| {
                    if d < c.distance {
                        *c = candidate;
                    }
                })
                .or_insert(candidate);
        }

        let mut candidates: Candidates = best.into_values().collect();
        candidates.sort_by(|x, y| x.distance.total_cmp(&y.distance).then(x.edge.cmp(&y.edge)));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross_graph() -> NetworkGraph {
        // Horizontal road y=0 from x=0..100, vertical road x=50 from y=10..110
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(100.0, 0.0);
        let c = graph.add_node(50.0, 10.0);
        let d = graph.add_node(50.0, 110.0);
        graph.add_edge(a, b, vec![], None, false, None);
        graph.add_edge(c, d, vec![], None, false, None);
        graph
    }

    #[test]
    fn test_edges_within_sorted_by_distance() {
        let index = SpatialIndex::build(&cross_graph());
        let found = index.edges_within([45.0, 4.0], 20.0);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].edge, EdgeId(0));
        assert!((found[0].distance - 4.0).abs() < 1e-9);
        assert_eq!(found[0].point, [45.0, 0.0]);
        assert_eq!(found[1].edge, EdgeId(1));
    }

    #[test]
    fn test_edges_within_respects_range() {
        let index = SpatialIndex::build(&cross_graph());
        assert!(index.edges_within([200.0, 200.0], 40.0).is_empty());
        assert_eq!(index.edges_within([10.0, 3.0], 5.0).len(), 1);
    }

    #[test]
    fn test_index_skips_tombstoned_edges() {
        let mut graph = cross_graph();
        graph.split_edge(EdgeId(0), 0, [30.0, 0.0]);
        let index = SpatialIndex::build(&graph);

        // Two halves of the split edge plus the vertical road
        assert_eq!(index.edges_within([50.0, 50.0], 1000.0).len(), 3);
        let found = index.edges_within([30.0, 1.0], 2.0);
        assert!(found.iter().all(|c| c.edge != EdgeId(0)));
        assert_eq!(found.len(), 2);
    }
}
