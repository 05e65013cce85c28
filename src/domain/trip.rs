//! Trip model: steps between consecutive sightings of one vehicle

use crate::domain::types::{CameraId, VehicleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Movement of a vehicle between two consecutive sightings of the same trip.
///
/// Every trip is bracketed by an entry step (`origin = None`) and an exit
/// step (`destination = None`). Both are zero-duration and carry no distance,
/// travel time or speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripStep {
    pub vehicle: VehicleId,
    /// Trip index within the vehicle, starting at 0
    pub trip: u32,
    /// Step index within the trip, starting at 0
    pub step: u32,
    pub origin: Option<CameraId>,
    pub destination: Option<CameraId>,
    pub t_start: DateTime<Utc>,
    pub t_end: DateTime<Utc>,
    /// Network distance (meters)
    pub distance: Option<f64>,
    /// Seconds between the two sightings
    pub travel_time: Option<f64>,
    /// Average speed (m/s)
    pub speed: Option<f64>,
    #[serde(default)]
    pub below_speed_threshold: bool,
    /// Net number of overtakes on the same OD pair
    #[serde(default)]
    pub displacement: Option<f64>,
}

impl TripStep {
    /// Zero-duration step that opens a trip at `camera`
    pub fn entry(vehicle: VehicleId, trip: u32, camera: CameraId, at: DateTime<Utc>) -> Self {
        Self {
            vehicle,
            trip,
            step: 0,
            origin: None,
            destination: Some(camera),
            t_start: at,
            t_end: at,
            distance: None,
            travel_time: None,
            speed: None,
            below_speed_threshold: false,
            displacement: None,
        }
    }

    /// Zero-duration step that closes a trip at `camera`
    pub fn exit(vehicle: VehicleId, trip: u32, step: u32, camera: CameraId, at: DateTime<Utc>) -> Self {
        Self {
            vehicle,
            trip,
            step,
            origin: Some(camera),
            destination: None,
            t_start: at,
            t_end: at,
            distance: None,
            travel_time: None,
            speed: None,
            below_speed_threshold: false,
            displacement: None,
        }
    }

    /// Entry or exit step (origin or destination missing)
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.origin.is_none() || self.destination.is_none()
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        (self.t_end - self.t_start).num_milliseconds() as f64 / 1000.0
    }

    /// OD key, only for steps with both ends present
    pub fn od(&self) -> Option<(&CameraId, &CameraId)> {
        match (&self.origin, &self.destination) {
            (Some(o), Some(d)) => Some((o, d)),
            _ => None,
        }
    }
}

/// Ordered steps sharing a vehicle and trip index, borrowed from a flat step list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trip<'s> {
    pub vehicle: &'s VehicleId,
    pub id: u32,
    pub steps: &'s [TripStep],
}

impl Trip<'_> {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.steps.first().map(|s| s.t_start)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.steps.last().map(|s| s.t_end)
    }

    /// Seconds from the first sighting to the last
    pub fn duration_secs(&self) -> Option<f64> {
        let elapsed = self.ended_at()? - self.started_at()?;
        Some(elapsed.num_milliseconds() as f64 / 1000.0)
    }

    /// Cameras visited in order
    pub fn cameras(&self) -> Vec<&CameraId> {
        self.steps.iter().filter_map(|s| s.destination.as_ref()).collect()
    }
}

/// Group a flat step sequence (as produced by trip identification) into trips.
/// Consecutive steps with the same vehicle and trip index form one trip.
pub fn group_trips(steps: &[TripStep]) -> Vec<Trip<'_>> {
    steps
        .chunk_by(|a, b| a.vehicle == b.vehicle && a.trip == b.trip)
        .map(|chunk| Trip { vehicle: &chunk[0].vehicle, id: chunk[0].trip, steps: chunk })
        .collect()
}
