//! ANPR flows library
//!
//! Turns camera locations, a road network and number plate sightings into
//! origin-destination flows per time period. Exposes modules for integration
//! testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
