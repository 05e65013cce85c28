//! IO modules - file interfaces
//!
//! - `input` - CSV readers for cameras, network, sightings, pairs and trips
//! - `egress` - CSV/JSONL table writers and the diagnostics report

pub mod egress;
pub mod input;

pub use egress::{write_diagnostics, write_pairs, Egress, Format, MappingEgress};
pub use input::{read_cameras, read_network, read_pairs, read_sightings, read_trips};
