//! Lock-free data-quality diagnostics
//!
//! Every record the pipeline excludes is counted here instead of failing the
//! batch. Counters are atomics so parallel stages can record without locking;
//! a bounded list of example records is kept behind a mutex for the summary.
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only and never drive pipeline decisions.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Maximum number of example records retained per run
pub const MAX_SAMPLES: usize = 50;

/// Kinds of excluded or flagged records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    CameraUnmapped,
    CameraDecommissioned,
    EdgeSplit,
    PairUnreachable,
    SightingBadPlate,
    SightingLowConfidence,
    SightingUnknownCamera,
    SightingDuplicate,
    StepNoRoute,
    StepZeroDuration,
    StepOverMaxSpeed,
    StepBelowSpeedThreshold,
    StepBoundaryRemoved,
    WeightBelowPThreshold,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 14] = [
        DiagnosticKind::CameraUnmapped,
        DiagnosticKind::CameraDecommissioned,
        DiagnosticKind::EdgeSplit,
        DiagnosticKind::PairUnreachable,
        DiagnosticKind::SightingBadPlate,
        DiagnosticKind::SightingLowConfidence,
        DiagnosticKind::SightingUnknownCamera,
        DiagnosticKind::SightingDuplicate,
        DiagnosticKind::StepNoRoute,
        DiagnosticKind::StepZeroDuration,
        DiagnosticKind::StepOverMaxSpeed,
        DiagnosticKind::StepBelowSpeedThreshold,
        DiagnosticKind::StepBoundaryRemoved,
        DiagnosticKind::WeightBelowPThreshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::CameraUnmapped => "camera_unmapped",
            DiagnosticKind::CameraDecommissioned => "camera_decommissioned",
            DiagnosticKind::EdgeSplit => "edge_split",
            DiagnosticKind::PairUnreachable => "pair_unreachable",
            DiagnosticKind::SightingBadPlate => "sighting_bad_plate",
            DiagnosticKind::SightingLowConfidence => "sighting_low_confidence",
            DiagnosticKind::SightingUnknownCamera => "sighting_unknown_camera",
            DiagnosticKind::SightingDuplicate => "sighting_duplicate",
            DiagnosticKind::StepNoRoute => "step_no_route",
            DiagnosticKind::StepZeroDuration => "step_zero_duration",
            DiagnosticKind::StepOverMaxSpeed => "step_over_max_speed",
            DiagnosticKind::StepBelowSpeedThreshold => "step_below_speed_threshold",
            DiagnosticKind::StepBoundaryRemoved => "step_boundary_removed",
            DiagnosticKind::WeightBelowPThreshold => "weight_below_pthreshold",
        }
    }

    /// Informational kinds are expected in normal operation and are not warned about
    fn is_informational(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::EdgeSplit
                | DiagnosticKind::PairUnreachable
                | DiagnosticKind::SightingDuplicate
                | DiagnosticKind::StepBelowSpeedThreshold
                | DiagnosticKind::StepBoundaryRemoved
                | DiagnosticKind::WeightBelowPThreshold
        )
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// One retained example of an excluded record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticSample {
    pub kind: DiagnosticKind,
    pub detail: String,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub counts: BTreeMap<&'static str, u64>,
    pub samples: Vec<DiagnosticSample>,
}

impl DiagnosticsSnapshot {
    pub fn get(&self, kind: DiagnosticKind) -> u64 {
        self.counts.get(kind.as_str()).copied().unwrap_or(0)
    }
}

pub struct Diagnostics {
    counters: [AtomicU64; DiagnosticKind::ALL.len()],
    samples: Mutex<Vec<DiagnosticSample>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            samples: Mutex::new(Vec::new()),
        }
    }

    /// Count one occurrence (lock-free)
    #[inline]
    pub fn record(&self, kind: DiagnosticKind) {
        self.counters[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Count `n` occurrences at once
    #[inline]
    pub fn record_n(&self, kind: DiagnosticKind, n: u64) {
        if n > 0 {
            self.counters[kind.index()].fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Count one occurrence and keep an example while below the sample cap.
    /// The detail closure only runs when the sample is kept.
    pub fn record_with<F>(&self, kind: DiagnosticKind, detail: F)
    where
        F: FnOnce() -> String,
    {
        self.record(kind);
        let mut samples = self.samples.lock();
        if samples.len() < MAX_SAMPLES {
            samples.push(DiagnosticSample { kind, detail: detail() });
        }
    }

    #[inline]
    pub fn count(&self, kind: DiagnosticKind) -> u64 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let counts = DiagnosticKind::ALL.iter().map(|k| (k.as_str(), self.count(*k))).collect();
        DiagnosticsSnapshot { counts, samples: self.samples.lock().clone() }
    }

    /// Log one summary line, plus a warning per non-zero data-quality kind
    pub fn log_summary(&self, stage: &str) {
        let snap = self.snapshot();
        let excluded: u64 = DiagnosticKind::ALL
            .iter()
            .filter(|k| !k.is_informational())
            .map(|k| snap.get(*k))
            .sum();

        info!(
            stage = %stage,
            excluded = excluded,
            edges_split = snap.get(DiagnosticKind::EdgeSplit),
            duplicates = snap.get(DiagnosticKind::SightingDuplicate),
            slow_steps = snap.get(DiagnosticKind::StepBelowSpeedThreshold),
            "diagnostics_summary"
        );

        for kind in DiagnosticKind::ALL.iter().filter(|k| !k.is_informational()) {
            let n = snap.get(*kind);
            if n > 0 {
                warn!(stage = %stage, kind = kind.as_str(), count = n, "records_excluded");
            }
        }
    }
}
