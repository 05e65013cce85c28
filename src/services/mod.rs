//! Services - the computational core
//!
//! This module contains the pipeline stages:
//! - `spatial_index` - R-tree over edge segments for snapping queries
//! - `network_mapper` - Multi-pass camera snapping with edge splitting
//! - `camera_pairs` - Shortest network distance between mapped cameras
//! - `wrangler` - Plate normalisation, filtering and ordering of raw sightings
//! - `anonymizer` - Salted vehicle id hashing
//! - `trip_identifier` - Sightings to trip steps
//! - `displacement` - Overtaking counts per OD pair
//! - `flow_aggregator` - Trip steps to per-period OD flows

pub mod anonymizer;
pub mod camera_pairs;
pub mod displacement;
pub mod flow_aggregator;
pub mod network_mapper;
pub mod spatial_index;
pub mod trip_identifier;
pub mod wrangler;

// Re-export commonly used types
pub use anonymizer::Anonymizer;
pub use camera_pairs::camera_pairs;
pub use displacement::compute_displacement;
pub use flow_aggregator::{expand, get_periods, FlowAggregator};
pub use network_mapper::{MappingOutcome, NetworkMapper};
pub use spatial_index::SpatialIndex;
pub use trip_identifier::{PairIndex, TripIdentifier};
pub use wrangler::Wrangler;
