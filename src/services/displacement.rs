//! Vehicle displacement per OD pair
//!
//! For each step, counts how many vehicles on the same OD pair overtook it
//! (departed later, arrived earlier) minus how many it overtook (departed
//! earlier, arrived later), looking at most `buffer` departures either side.

use crate::domain::trip::TripStep;
use crate::domain::types::CameraId;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::info;

/// Fill `displacement` for every step with both an origin and a destination
pub fn compute_displacement(steps: &mut [TripStep], buffer: usize) {
    let view: &[TripStep] = steps;
    let mut groups: FxHashMap<(&CameraId, &CameraId), Vec<usize>> = FxHashMap::default();
    for (i, step) in view.iter().enumerate() {
        if let Some(od) = step.od() {
            groups.entry(od).or_default().push(i);
        }
    }
    let od_pairs = groups.len();

    let values: Vec<(usize, f64)> = groups
        .into_par_iter()
        .flat_map_iter(|(_, mut indices)| {
            indices.sort_by_key(|&i| (view[i].t_start, view[i].t_end));
            let n = indices.len();
            (0..n)
                .map(|pos| {
                    let me = &view[indices[pos]];
                    let lo = pos.saturating_sub(buffer);
                    let hi = pos.saturating_add(buffer).saturating_add(1).min(n);

                    let mut net = 0i64;
                    for (other_pos, &other) in indices.iter().enumerate().take(hi).skip(lo) {
                        let other = &view[other];
                        if other_pos > pos && other.t_end < me.t_end {
                            net += 1;
                        } else if other_pos < pos && other.t_end > me.t_end {
                            net -= 1;
                        }
                    }
                    (indices[pos], net as f64)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let assigned = values.len();
    for (i, value) in values {
        steps[i].displacement = Some(value);
    }
    info!(od_pairs = od_pairs, steps = assigned, buffer = buffer, "displacement_computed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::VehicleId;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    fn step(vehicle: &str, start: i64, end: i64) -> TripStep {
        TripStep {
            vehicle: VehicleId::new(vehicle),
            trip: 0,
            step: 1,
            origin: Some(CameraId::new("A")),
            destination: Some(CameraId::new("B")),
            t_start: at(start),
            t_end: at(end),
            distance: Some(1000.0),
            travel_time: Some((end - start) as f64),
            speed: Some(1000.0 / (end - start) as f64),
            below_speed_threshold: false,
            displacement: None,
        }
    }

    #[test]
    fn test_overtake_counts() {
        // V2 departs after V1 but arrives first
        let mut steps = vec![step("V1", 0, 100), step("V2", 10, 50), step("V3", 20, 120)];
        compute_displacement(&mut steps, 100);

        assert_eq!(steps[0].displacement, Some(1.0));
        assert_eq!(steps[1].displacement, Some(-1.0));
        assert_eq!(steps[2].displacement, Some(0.0));
    }

    #[test]
    fn test_buffer_limits_window() {
        let mut steps = vec![step("V1", 0, 1000), step("V2", 10, 20), step("V3", 30, 40)];
        compute_displacement(&mut steps, 1);

        // V3 is two departures after V1 and out of its window
        assert_eq!(steps[0].displacement, Some(1.0));
    }

    #[test]
    fn test_boundary_steps_untouched() {
        let entry = TripStep::entry(VehicleId::new("V1"), 0, CameraId::new("A"), at(0));
        let mut steps = vec![entry, step("V1", 0, 100)];
        compute_displacement(&mut steps, 10);

        assert_eq!(steps[0].displacement, None);
        assert_eq!(steps[1].displacement, Some(0.0));
    }
}
