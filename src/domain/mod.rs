//! Domain models - core value types of the ANPR pipeline
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - cameras, sightings and their identifiers
//! - `network` - road graph arena, camera mappings and camera pairs
//! - `trip` - trip steps and trips
//! - `flow` - aggregated OD flows per period
//! - `error` - typed pipeline and configuration errors

pub mod error;
pub mod flow;
pub mod network;
pub mod trip;
pub mod types;

// Re-export commonly used types at module level
pub use error::{ConfigError, PipelineError};
pub use flow::FlowRecord;
pub use network::{CameraMapping, CameraPair, EdgeId, NetworkGraph, NodeId};
pub use trip::{Trip, TripStep};
pub use types::{Camera, CameraId, Direction, Sighting, VehicleId};
