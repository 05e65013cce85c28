//! Raw sighting cleanup before trip identification
//!
//! Normalises plates, drops unusable reads, anonymises vehicle ids and sorts
//! the batch by `(vehicle, timestamp)` so each vehicle's sightings are
//! contiguous and ordered.

use crate::domain::types::{CameraId, Sighting, VehicleId};
use crate::infra::config::WrangleConfig;
use crate::infra::diagnostics::{DiagnosticKind, Diagnostics};
use crate::services::anonymizer::Anonymizer;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::info;

/// Longest plate accepted
pub const MAX_PLATE_LEN: usize = 10;

/// Uppercase and strip whitespace; `None` when the result is not a plausible plate
pub fn normalize_plate(raw: &str) -> Option<String> {
    let plate: String = raw.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase();
    if plate.is_empty() || plate.len() > MAX_PLATE_LEN || !plate.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(plate)
}

pub struct Wrangler<'a> {
    config: &'a WrangleConfig,
    known_cameras: Option<&'a FxHashSet<CameraId>>,
    anonymizer: Option<&'a Anonymizer>,
    diagnostics: &'a Diagnostics,
}

impl<'a> Wrangler<'a> {
    pub fn new(config: &'a WrangleConfig, diagnostics: &'a Diagnostics) -> Self {
        Self { config, known_cameras: None, anonymizer: None, diagnostics }
    }

    /// Drop sightings at cameras outside this set
    pub fn with_known_cameras(mut self, cameras: &'a FxHashSet<CameraId>) -> Self {
        self.known_cameras = Some(cameras);
        self
    }

    pub fn with_anonymizer(mut self, anonymizer: &'a Anonymizer) -> Self {
        self.anonymizer = Some(anonymizer);
        self
    }

    pub fn wrangle(&self, raw: Vec<Sighting>) -> Vec<Sighting> {
        let total = raw.len();

        let mut kept: Vec<Sighting> = raw
            .into_par_iter()
            .filter_map(|sighting| self.clean(sighting))
            .collect();

        kept.par_sort_by(|a, b| a.vehicle.cmp(&b.vehicle).then(a.timestamp.cmp(&b.timestamp)));

        info!(
            input = total,
            kept = kept.len(),
            bad_plates = self.diagnostics.count(DiagnosticKind::SightingBadPlate),
            low_confidence = self.diagnostics.count(DiagnosticKind::SightingLowConfidence),
            unknown_camera = self.diagnostics.count(DiagnosticKind::SightingUnknownCamera),
            anonymised = self.anonymizer.is_some(),
            "sightings_wrangled"
        );
        kept
    }

    fn clean(&self, mut sighting: Sighting) -> Option<Sighting> {
        let Some(plate) = normalize_plate(sighting.vehicle.as_str()) else {
            self.diagnostics.record_with(DiagnosticKind::SightingBadPlate, || {
                format!("plate '{}' at {}", sighting.vehicle, sighting.camera)
            });
            return None;
        };

        if self.config.filter_low_confidence && sighting.confidence < self.config.confidence_threshold {
            self.diagnostics.record(DiagnosticKind::SightingLowConfidence);
            return None;
        }

        if let Some(known) = self.known_cameras {
            if !known.contains(&sighting.camera) {
                self.diagnostics.record_with(DiagnosticKind::SightingUnknownCamera, || {
                    format!("camera {} is not in the camera set", sighting.camera)
                });
                return None;
            }
        }

        sighting.vehicle = match self.anonymizer {
            Some(anonymizer) => VehicleId(anonymizer.hash(&plate)),
            None => VehicleId(plate),
        };
        Some(sighting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_normalize_plate() {
        assert_eq!(normalize_plate(" ab12 cde "), Some("AB12CDE".to_string()));
        assert_eq!(normalize_plate(""), None);
        assert_eq!(normalize_plate("AB-12"), None);
        assert_eq!(normalize_plate("ABCDEFGHIJK"), None);
        assert_eq!(normalize_plate("NOPLATE"), Some("NOPLATE".to_string()));
    }

    #[test]
    fn test_wrangle_filters_and_sorts() {
        let config = WrangleConfig::default();
        let diag = Diagnostics::new();
        let raw = vec![
            Sighting::new("bb22 bbb", "C2", at(20)),
            Sighting::new("AA11AAA", "C1", at(30)),
            Sighting::new("AA11AAA", "C2", at(10)),
            Sighting::new("???", "C1", at(5)),
            Sighting::new("CC33CCC", "C1", at(1)).with_confidence(0.2),
        ];

        let out = Wrangler::new(&config, &diag).wrangle(raw);

        let summary: Vec<(&str, &str, DateTime<Utc>)> =
            out.iter().map(|s| (s.vehicle.as_str(), s.camera.as_str(), s.timestamp)).collect();
        assert_eq!(
            summary,
            vec![("AA11AAA", "C2", at(10)), ("AA11AAA", "C1", at(30)), ("BB22BBB", "C2", at(20))]
        );
        assert_eq!(diag.count(DiagnosticKind::SightingBadPlate), 1);
        assert_eq!(diag.count(DiagnosticKind::SightingLowConfidence), 1);
    }

    #[test]
    fn test_wrangle_confidence_filter_can_be_disabled() {
        let config = WrangleConfig { filter_low_confidence: false, ..WrangleConfig::default() };
        let diag = Diagnostics::new();
        let raw = vec![Sighting::new("AA11AAA", "C1", at(0)).with_confidence(0.1)];
        assert_eq!(Wrangler::new(&config, &diag).wrangle(raw).len(), 1);
    }

    #[test]
    fn test_wrangle_drops_unknown_cameras_and_anonymises() {
        let config = WrangleConfig::default();
        let diag = Diagnostics::new();
        let known: FxHashSet<CameraId> = [CameraId::new("C1")].into_iter().collect();
        let anonymizer = Anonymizer::new(b"salt".to_vec(), 10).unwrap();
        let raw = vec![Sighting::new("AA11AAA", "C1", at(0)), Sighting::new("AA11AAA", "C9", at(5))];

        let out = Wrangler::new(&config, &diag)
            .with_known_cameras(&known)
            .with_anonymizer(&anonymizer)
            .wrangle(raw);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].vehicle.as_str(), anonymizer.hash("AA11AAA"));
        assert_eq!(diag.count(DiagnosticKind::SightingUnknownCamera), 1);
    }
}
