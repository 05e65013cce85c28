//! Trip identification from per-vehicle sighting sequences
//!
//! Each vehicle is handled independently as a fold over its sorted sightings:
//! 1. Sightings at cameras without OD pairs are dropped
//! 2. Same-camera duplicates within the duplicate window collapse to the first
//! 3. Consecutive sightings become steps; a missing route, a zero duration or
//!    an average speed above the maximum breaks the trip at that boundary
//!
//! Trips are bracketed by zero-duration entry and exit steps.

use crate::domain::error::PipelineError;
use crate::domain::network::CameraPair;
use crate::domain::trip::{group_trips, TripStep};
use crate::domain::types::{CameraId, Sighting, VehicleId};
use crate::infra::config::TripConfig;
use crate::infra::diagnostics::{DiagnosticKind, Diagnostics};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

/// Lookup of network distances between mapped cameras
#[derive(Debug, Clone, Default)]
pub struct PairIndex {
    cameras: FxHashSet<CameraId>,
    distances: FxHashMap<(CameraId, CameraId), f64>,
}

impl PairIndex {
    pub fn new(pairs: &[CameraPair]) -> Self {
        let mut index = Self::default();
        for pair in pairs {
            index.cameras.insert(pair.origin.clone());
            index.cameras.insert(pair.destination.clone());
            index.distances.insert((pair.origin.clone(), pair.destination.clone()), pair.distance);
        }
        index
    }

    pub fn ensure_known(&self, camera: &CameraId) -> Result<(), PipelineError> {
        if self.cameras.contains(camera) {
            Ok(())
        } else {
            Err(PipelineError::UnknownCamera(camera.clone()))
        }
    }

    /// Network distance, `None` when no route exists between known cameras
    pub fn distance(&self, origin: &CameraId, destination: &CameraId) -> Result<Option<f64>, PipelineError> {
        self.ensure_known(origin)?;
        self.ensure_known(destination)?;
        Ok(self.distances.get(&(origin.clone(), destination.clone())).copied())
    }
}

/// Verify sightings are grouped by vehicle and time-ordered within a group
pub fn check_order(sightings: &[Sighting]) -> Result<(), PipelineError> {
    let mut seen: FxHashSet<&VehicleId> = FxHashSet::default();
    for (index, pair) in sightings.windows(2).enumerate() {
        let (prev, cur) = (&pair[0], &pair[1]);
        if prev.vehicle == cur.vehicle {
            if cur.timestamp < prev.timestamp {
                return Err(PipelineError::Ordering { vehicle: cur.vehicle.clone(), index: index + 1 });
            }
        } else {
            seen.insert(&prev.vehicle);
            if seen.contains(&cur.vehicle) {
                return Err(PipelineError::Grouping { vehicle: cur.vehicle.clone(), index: index + 1 });
            }
        }
    }
    Ok(())
}

/// Collapse same-camera sightings within `threshold` seconds of the preceding
/// sighting, keeping the earliest. Idempotent.
pub fn collapse_duplicates<'s>(sightings: &[&'s Sighting], threshold: f64) -> Vec<&'s Sighting> {
    let mut kept = Vec::with_capacity(sightings.len());
    let mut previous: Option<&Sighting> = None;
    for &s in sightings {
        let duplicate = previous.is_some_and(|p| {
            p.camera == s.camera && gap_secs(p, s) <= threshold
        });
        if !duplicate {
            kept.push(s);
        }
        previous = Some(s);
    }
    kept
}

#[inline]
fn gap_secs(earlier: &Sighting, later: &Sighting) -> f64 {
    (later.timestamp - earlier.timestamp).num_milliseconds() as f64 / 1000.0
}

/// Why a trip was broken between two sightings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Break {
    NoRoute,
    ZeroDuration,
    OverMaxSpeed,
}

impl Break {
    fn kind(self) -> DiagnosticKind {
        match self {
            Break::NoRoute => DiagnosticKind::StepNoRoute,
            Break::ZeroDuration => DiagnosticKind::StepZeroDuration,
            Break::OverMaxSpeed => DiagnosticKind::StepOverMaxSpeed,
        }
    }
}

pub struct TripIdentifier<'a> {
    config: &'a TripConfig,
    pairs: &'a PairIndex,
    diagnostics: &'a Diagnostics,
}

impl<'a> TripIdentifier<'a> {
    pub fn new(config: &'a TripConfig, pairs: &'a PairIndex, diagnostics: &'a Diagnostics) -> Self {
        Self { config, pairs, diagnostics }
    }

    /// Identify trips for a batch of sightings.
    ///
    /// Unsorted or interleaved input is sorted when `auto_sort` is set and
    /// rejected otherwise. Output is ordered by vehicle, trip and step.
    pub fn identify(&self, sightings: &[Sighting]) -> Result<Vec<TripStep>, PipelineError> {
        let mut ordered: Vec<&Sighting> = sightings.iter().collect();
        if let Err(e) = check_order(sightings) {
            if !self.config.auto_sort {
                return Err(e);
            }
            debug!(error = %e, "sightings_auto_sorted");
            ordered.sort_by(|a, b| a.vehicle.cmp(&b.vehicle).then(a.timestamp.cmp(&b.timestamp)));
        }

        let groups: Vec<&[&Sighting]> = ordered.chunk_by(|a, b| a.vehicle == b.vehicle).collect();

        let steps: Vec<TripStep> =
            groups.par_iter().flat_map_iter(|group| self.identify_vehicle(group)).collect();

        let trips = group_trips(&steps);
        let longest_trip_secs = trips.iter().filter_map(|t| t.duration_secs()).fold(0.0, f64::max);
        info!(
            sightings = sightings.len(),
            vehicles = groups.len(),
            trips = trips.len(),
            steps = steps.len(),
            longest_trip_secs,
            duplicates = self.diagnostics.count(DiagnosticKind::SightingDuplicate),
            over_max_speed = self.diagnostics.count(DiagnosticKind::StepOverMaxSpeed),
            no_route = self.diagnostics.count(DiagnosticKind::StepNoRoute),
            "trips_identified"
        );
        Ok(steps)
    }

    /// Steps for one vehicle; `group` is sorted by timestamp
    pub fn identify_vehicle(&self, group: &[&Sighting]) -> Vec<TripStep> {
        let known: Vec<&Sighting> = group
            .iter()
            .copied()
            .filter(|s| match self.pairs.ensure_known(&s.camera) {
                Ok(()) => true,
                Err(e) => {
                    self.diagnostics.record_with(DiagnosticKind::SightingUnknownCamera, || {
                        format!("vehicle {}: {e}", s.vehicle)
                    });
                    false
                }
            })
            .collect();

        let kept = collapse_duplicates(&known, self.config.duplicate_threshold);
        self.diagnostics.record_n(DiagnosticKind::SightingDuplicate, (known.len() - kept.len()) as u64);

        let Some(first) = kept.first() else {
            return Vec::new();
        };

        let vehicle = first.vehicle.clone();
        let mut steps = Vec::with_capacity(kept.len() + 1);
        let mut trip = 0u32;
        let mut step = 1u32;
        steps.push(TripStep::entry(vehicle.clone(), trip, first.camera.clone(), first.timestamp));

        for pair in kept.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            match self.step_between(prev, cur) {
                Ok(mut s) => {
                    s.trip = trip;
                    s.step = step;
                    step += 1;
                    steps.push(s);
                }
                Err(reason) => {
                    self.diagnostics.record_with(reason.kind(), || {
                        format!("vehicle {vehicle}: {} -> {} at {}", prev.camera, cur.camera, cur.timestamp)
                    });
                    steps.push(TripStep::exit(vehicle.clone(), trip, step, prev.camera.clone(), prev.timestamp));
                    trip += 1;
                    step = 1;
                    steps.push(TripStep::entry(vehicle.clone(), trip, cur.camera.clone(), cur.timestamp));
                }
            }
        }

        if let Some(last) = kept.last() {
            steps.push(TripStep::exit(vehicle, trip, step, last.camera.clone(), last.timestamp));
        }
        steps
    }

    fn step_between(&self, prev: &Sighting, cur: &Sighting) -> Result<TripStep, Break> {
        let distance = match self.pairs.distance(&prev.camera, &cur.camera) {
            Ok(Some(d)) => d,
            // Unknown cameras were filtered already
            Ok(None) | Err(_) => return Err(Break::NoRoute),
        };

        let travel_time = gap_secs(prev, cur);
        if travel_time <= 0.0 {
            return Err(Break::ZeroDuration);
        }

        let speed = distance / travel_time;
        if speed > self.config.max_speed {
            return Err(Break::OverMaxSpeed);
        }

        let below = speed < self.config.speed_threshold;
        if below {
            self.diagnostics.record(DiagnosticKind::StepBelowSpeedThreshold);
        }

        Ok(TripStep {
            vehicle: prev.vehicle.clone(),
            trip: 0,
            step: 0,
            origin: Some(prev.camera.clone()),
            destination: Some(cur.camera.clone()),
            t_start: prev.timestamp,
            t_end: cur.timestamp,
            distance: Some(distance),
            travel_time: Some(travel_time),
            speed: Some(speed),
            below_speed_threshold: below,
            displacement: None,
        })
    }
}
