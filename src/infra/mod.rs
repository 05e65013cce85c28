//! Infrastructure - configuration and diagnostics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults, validation)
//! - `diagnostics` - Lock-free data-quality counters

pub mod config;
pub mod diagnostics;

// Re-export commonly used types
pub use config::{Config, FlowConfig, MapperConfig, TripConfig, WrangleConfig};
pub use diagnostics::{DiagnosticKind, Diagnostics};
