//! Time-binned origin-destination flows
//!
//! Steps are attributed to fixed-width periods aligned to multiples of the
//! period width since the Unix epoch. A step spanning several periods credits
//! each one with the fraction of its duration that falls inside it, provided
//! that fraction reaches `pthreshold`. Zero-duration steps credit their single
//! period with weight 1.
//!
//! `expand` then fills every gap in each OD series with zero-count records,
//! bounded by that pair's first and last observed period.

use crate::domain::error::PipelineError;
use crate::domain::flow::FlowRecord;
use crate::domain::trip::TripStep;
use crate::domain::types::CameraId;
use crate::infra::config::FlowConfig;
use crate::infra::diagnostics::{DiagnosticKind, Diagnostics};
use crate::services::displacement::compute_displacement;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, info};

/// Period start as epoch milliseconds
type PeriodMs = i64;

type OdKey<'s> = (Option<&'s CameraId>, Option<&'s CameraId>);

type Cells<'s> = FxHashMap<(OdKey<'s>, PeriodMs), Accumulator>;

#[inline]
fn to_datetime(ms: PeriodMs) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Start of the period containing `t`, as epoch milliseconds
#[inline]
pub fn floor_period_ms(t: DateTime<Utc>, freq_secs: i64) -> PeriodMs {
    let freq_ms = freq_secs * 1000;
    t.timestamp_millis().div_euclid(freq_ms) * freq_ms
}

/// Start of the period containing `t`
pub fn floor_period(t: DateTime<Utc>, freq_secs: i64) -> DateTime<Utc> {
    to_datetime(floor_period_ms(t, freq_secs))
}

/// Ordered period starts from `floor(min t_start)` to `floor(max t_end)` inclusive
pub fn get_periods(steps: &[TripStep], freq_secs: i64) -> Vec<DateTime<Utc>> {
    let (Some(first), Some(last)) =
        (steps.iter().map(|s| s.t_start).min(), steps.iter().map(|s| s.t_end).max())
    else {
        return Vec::new();
    };

    let freq_ms = freq_secs * 1000;
    let start = floor_period_ms(first, freq_secs);
    let end = floor_period_ms(last, freq_secs);
    (0..=(end - start) / freq_ms).map(|i| to_datetime(start + i * freq_ms)).collect()
}

/// Periods a step overlaps and the fraction of its duration in each
pub fn step_weights(step: &TripStep, freq_secs: i64, same_period: bool) -> SmallVec<[(PeriodMs, f64); 4]> {
    let start = step.t_start.timestamp_millis();
    let end = step.t_end.timestamp_millis();
    let first = floor_period_ms(step.t_start, freq_secs);

    let mut weights = SmallVec::new();
    if same_period || end <= start {
        weights.push((first, 1.0));
        return weights;
    }

    let freq_ms = freq_secs * 1000;
    let duration = (end - start) as f64;
    let mut period = first;
    while period < end {
        let overlap = end.min(period + freq_ms) - start.max(period);
        weights.push((period, overlap as f64 / duration));
        period += freq_ms;
    }
    weights
}

/// Weighted sums for one (origin, destination, period) cell
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: f64,
    speed_sum: f64,
    speed_weight: f64,
    travel_time_sum: f64,
    travel_time_weight: f64,
    displacement_sum: f64,
    displacement_weight: f64,
}

impl Accumulator {
    fn add(&mut self, step: &TripStep, weight: f64, with_displacement: bool) {
        self.count += weight;
        if let Some(speed) = step.speed {
            self.speed_sum += speed * weight;
            self.speed_weight += weight;
        }
        if let Some(tt) = step.travel_time {
            self.travel_time_sum += tt * weight;
            self.travel_time_weight += weight;
        }
        if with_displacement {
            if let Some(d) = step.displacement {
                self.displacement_sum += d * weight;
                self.displacement_weight += weight;
            }
        }
    }

    fn merge(&mut self, other: &Accumulator) {
        self.count += other.count;
        self.speed_sum += other.speed_sum;
        self.speed_weight += other.speed_weight;
        self.travel_time_sum += other.travel_time_sum;
        self.travel_time_weight += other.travel_time_weight;
        self.displacement_sum += other.displacement_sum;
        self.displacement_weight += other.displacement_weight;
    }

    fn mean(sum: f64, weight: f64) -> Option<f64> {
        (weight > 0.0).then(|| sum / weight)
    }
}

pub struct FlowAggregator<'a> {
    config: &'a FlowConfig,
    diagnostics: &'a Diagnostics,
}

impl<'a> FlowAggregator<'a> {
    pub fn new(config: &'a FlowConfig, diagnostics: &'a Diagnostics) -> Self {
        Self { config, diagnostics }
    }

    /// Full flow computation: NA removal, optional displacement, aggregation
    /// and (unless disabled) zero-filling over the period grid
    pub fn compute(&self, mut steps: Vec<TripStep>) -> Result<Vec<FlowRecord>, PipelineError> {
        if let Some((index, step)) = steps.iter().enumerate().find(|(_, s)| s.t_end < s.t_start) {
            return Err(PipelineError::ReversedStep { vehicle: step.vehicle.clone(), index });
        }

        if self.config.remove_na {
            let before = steps.len();
            steps.retain(|s| !s.is_boundary());
            self.diagnostics.record_n(DiagnosticKind::StepBoundaryRemoved, (before - steps.len()) as u64);
        }

        if self.config.agg_displacement && steps.iter().any(|s| s.od().is_some() && s.displacement.is_none()) {
            compute_displacement(&mut steps, self.config.displacement_buffer);
        }

        let periods = get_periods(&steps, self.config.freq_secs);
        let flows = self.aggregate(&steps);

        if !self.config.explicit_zeros {
            return Ok(flows);
        }
        expand(flows, &periods)
    }

    /// Sum credited weights per (origin, destination, period)
    pub fn aggregate(&self, steps: &[TripStep]) -> Vec<FlowRecord> {
        let freq = self.config.freq_secs;
        let pthreshold = self.config.pthreshold;
        let same_period = self.config.same_period;
        let with_displacement = self.config.agg_displacement;

        // Partition-then-reduce: each rayon split accumulates its own map
        let cells: Cells<'_> = steps
            .par_iter()
            .fold(Cells::default, |mut acc, step| {
                let key = (step.origin.as_ref(), step.destination.as_ref());
                for (period, weight) in step_weights(step, freq, same_period) {
                    if weight > 0.0 && weight >= pthreshold {
                        acc.entry((key, period)).or_default().add(step, weight, with_displacement);
                    } else {
                        self.diagnostics.record(DiagnosticKind::WeightBelowPThreshold);
                    }
                }
                acc
            })
            .reduce(Cells::default, |mut left, right| {
                for (key, cell) in right {
                    left.entry(key).or_default().merge(&cell);
                }
                left
            });

        let mut flows: Vec<FlowRecord> = cells
            .into_iter()
            .map(|(((origin, destination), period), acc)| FlowRecord {
                origin: origin.cloned(),
                destination: destination.cloned(),
                period: to_datetime(period),
                count: acc.count,
                speed: Accumulator::mean(acc.speed_sum, acc.speed_weight),
                travel_time: Accumulator::mean(acc.travel_time_sum, acc.travel_time_weight),
                displacement: if with_displacement {
                    Accumulator::mean(acc.displacement_sum, acc.displacement_weight)
                } else {
                    None
                },
            })
            .collect();
        sort_flows(&mut flows);

        info!(
            steps = steps.len(),
            records = flows.len(),
            freq_secs = freq,
            pthreshold = pthreshold,
            same_period = same_period,
            "flows_aggregated"
        );
        flows
    }
}

fn sort_flows(flows: &mut [FlowRecord]) {
    flows.sort_by(|a, b| {
        a.origin
            .cmp(&b.origin)
            .then_with(|| a.destination.cmp(&b.destination))
            .then_with(|| a.period.cmp(&b.period))
    });
}

/// Fill each OD series with zero-count records for every grid period between
/// its first and last observed period. Pairs never observed are not added.
pub fn expand(mut flows: Vec<FlowRecord>, periods: &[DateTime<Utc>]) -> Result<Vec<FlowRecord>, PipelineError> {
    let position: FxHashMap<DateTime<Utc>, usize> = periods.iter().enumerate().map(|(i, p)| (*p, i)).collect();
    sort_flows(&mut flows);

    let mut out = Vec::with_capacity(flows.len());
    let mut filled = 0usize;
    let mut rest = flows.as_slice();

    while let Some(head) = rest.first() {
        let len = rest
            .iter()
            .take_while(|f| f.origin == head.origin && f.destination == head.destination)
            .count();
        let (series, tail) = rest.split_at(len);
        rest = tail;

        let mut expected = None;
        for record in series {
            let pos = *position
                .get(&record.period)
                .ok_or(PipelineError::PeriodOffGrid { period: record.period })?;
            if let Some(next) = expected {
                for gap in next..pos {
                    out.push(FlowRecord::zero(record.origin.clone(), record.destination.clone(), periods[gap]));
                    filled += 1;
                }
            }
            out.push(record.clone());
            expected = Some(pos + 1);
        }
    }

    debug!(records = out.len(), zero_filled = filled, periods = periods.len(), "flows_expanded");
    Ok(out)
}
