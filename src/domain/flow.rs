//! Aggregated origin-destination flow per time period

use crate::domain::types::CameraId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flow between two cameras within `[period, period + freq)`.
///
/// `origin`/`destination` are `None` only for entry/exit flows, which are kept
/// unless NA removal is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub origin: Option<CameraId>,
    pub destination: Option<CameraId>,
    pub period: DateTime<Utc>,
    /// Sum of credited weights
    pub count: f64,
    /// Weighted mean speed (m/s)
    pub speed: Option<f64>,
    /// Weighted mean travel time (s)
    pub travel_time: Option<f64>,
    /// Weighted mean displacement, only with displacement aggregation
    pub displacement: Option<f64>,
}

impl FlowRecord {
    /// Zero-count record used to fill gaps in an OD time series
    pub fn zero(origin: Option<CameraId>, destination: Option<CameraId>, period: DateTime<Utc>) -> Self {
        Self { origin, destination, period, count: 0.0, speed: None, travel_time: None, displacement: None }
    }
}
