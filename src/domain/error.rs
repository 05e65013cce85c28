//! Typed errors for the pipeline core

use crate::domain::types::{CameraId, VehicleId};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sightings of vehicle {vehicle} are not sorted by timestamp at record {index}")]
    Ordering { vehicle: VehicleId, index: usize },

    #[error("sightings of vehicle {vehicle} are not contiguous (record {index})")]
    Grouping { vehicle: VehicleId, index: usize },

    #[error("trip step of vehicle {vehicle} ends before it starts (record {index})")]
    ReversedStep { vehicle: VehicleId, index: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("flow period {period} is not on the period grid")]
    PeriodOffGrid { period: DateTime<Utc> },

    #[error("camera {0} is not mapped onto the network")]
    UnknownCamera(CameraId),
}

/// Invalid configuration, detected before any data is read
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("frequency must be positive, got '{0}'")]
    NonPositiveFrequency(String),

    #[error("cannot parse frequency '{0}'")]
    InvalidFrequency(String),

    #[error("pthreshold must be within [0, 1], got {0}")]
    PThresholdOutOfRange(f64),

    #[error("{name} must not be negative, got {value}")]
    NegativeThreshold { name: &'static str, value: f64 },

    #[error("mapper passes must be at least 1")]
    ZeroPasses,

    #[error("camera range must be positive, got {0}")]
    NonPositiveRange(f64),

    #[error("digest size must be within 1..=32 bytes, got {0}")]
    DigestSize(usize),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
