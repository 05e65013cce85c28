//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/anpr.toml
//!
//! The file is resolved once into typed per-stage configs and validated
//! before any data is read. Speeds are given in km/h in the file and
//! converted to m/s here; the pipeline works in meters and seconds.

use crate::domain::error::ConfigError;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/anpr.toml";

#[inline]
pub fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapperSection {
    #[serde(default = "default_passes")]
    pub passes: u32,
    /// Maximum snapping distance (meters)
    #[serde(default = "default_camera_range")]
    pub camera_range: f64,
    #[serde(default = "default_direction_tolerance")]
    pub direction_tolerance_deg: f64,
}

fn default_passes() -> u32 {
    3
}

fn default_camera_range() -> f64 {
    40.0
}

fn default_direction_tolerance() -> f64 {
    60.0
}

impl Default for MapperSection {
    fn default() -> Self {
        Self {
            passes: default_passes(),
            camera_range: default_camera_range(),
            direction_tolerance_deg: default_direction_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripsSection {
    #[serde(default = "default_speed_threshold")]
    pub speed_threshold_kmh: f64,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold_secs: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed_kmh: f64,
    /// Sort sightings per vehicle instead of failing on unsorted input
    #[serde(default = "default_true")]
    pub auto_sort: bool,
}

fn default_speed_threshold() -> f64 {
    3.0
}

fn default_duplicate_threshold() -> f64 {
    300.0
}

fn default_max_speed() -> f64 {
    120.0
}

fn default_true() -> bool {
    true
}

impl Default for TripsSection {
    fn default() -> Self {
        Self {
            speed_threshold_kmh: default_speed_threshold(),
            duplicate_threshold_secs: default_duplicate_threshold(),
            max_speed_kmh: default_max_speed(),
            auto_sort: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowsSection {
    /// Period width, e.g. "5T", "5min", "1H", "30s", "1D"
    #[serde(default = "default_freq")]
    pub freq: String,
    #[serde(default)]
    pub pthreshold: f64,
    #[serde(default)]
    pub same_period: bool,
    #[serde(default)]
    pub remove_na: bool,
    /// Fill missing (od, period) combinations with zero counts
    #[serde(default = "default_true")]
    pub explicit_zeros: bool,
    #[serde(default)]
    pub agg_displacement: bool,
    #[serde(default = "default_displacement_buffer")]
    pub displacement_buffer: usize,
}

fn default_freq() -> String {
    "5min".to_string()
}

fn default_displacement_buffer() -> usize {
    100
}

impl Default for FlowsSection {
    fn default() -> Self {
        Self {
            freq: default_freq(),
            pthreshold: 0.0,
            same_period: false,
            remove_na: false,
            explicit_zeros: true,
            agg_displacement: false,
            displacement_buffer: default_displacement_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrangleSection {
    #[serde(default = "default_true")]
    pub filter_low_confidence: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_true")]
    pub anonymise: bool,
    #[serde(default = "default_digest_size")]
    pub digest_size: usize,
    /// Random per run when omitted
    #[serde(default)]
    pub digest_salt: Option<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_confidence_threshold() -> f64 {
    0.70
}

fn default_digest_size() -> usize {
    10
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S%.f".to_string()
}

impl Default for WrangleSection {
    fn default() -> Self {
        Self {
            filter_low_confidence: true,
            confidence_threshold: default_confidence_threshold(),
            anonymise: true,
            digest_size: default_digest_size(),
            digest_salt: None,
            date_format: default_date_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub mapper: MapperSection,
    #[serde(default)]
    pub trips: TripsSection,
    #[serde(default)]
    pub flows: FlowsSection,
    #[serde(default)]
    pub wrangle: WrangleSection,
}

// ---------------------------------------------------------------------------
// Resolved per-stage configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MapperConfig {
    pub passes: u32,
    pub camera_range: f64,
    pub direction_tolerance_deg: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::from(MapperSection::default())
    }
}

impl From<MapperSection> for MapperConfig {
    fn from(s: MapperSection) -> Self {
        Self {
            passes: s.passes,
            camera_range: s.camera_range,
            direction_tolerance_deg: s.direction_tolerance_deg,
        }
    }
}

/// Trip identification thresholds in SI units
#[derive(Debug, Clone, PartialEq)]
pub struct TripConfig {
    /// Lower bound below which steps are flagged (m/s)
    pub speed_threshold: f64,
    /// Same-camera sightings within this window are duplicates (s)
    pub duplicate_threshold: f64,
    /// Steps faster than this break the trip (m/s)
    pub max_speed: f64,
    pub auto_sort: bool,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self::from(TripsSection::default())
    }
}

impl From<TripsSection> for TripConfig {
    fn from(s: TripsSection) -> Self {
        Self {
            speed_threshold: kmh_to_ms(s.speed_threshold_kmh),
            duplicate_threshold: s.duplicate_threshold_secs,
            max_speed: kmh_to_ms(s.max_speed_kmh),
            auto_sort: s.auto_sort,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Period width in seconds
    pub freq_secs: i64,
    pub pthreshold: f64,
    pub same_period: bool,
    pub remove_na: bool,
    pub explicit_zeros: bool,
    pub agg_displacement: bool,
    pub displacement_buffer: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            freq_secs: 300,
            pthreshold: 0.0,
            same_period: false,
            remove_na: false,
            explicit_zeros: true,
            agg_displacement: false,
            displacement_buffer: default_displacement_buffer(),
        }
    }
}

impl TryFrom<FlowsSection> for FlowConfig {
    type Error = ConfigError;

    fn try_from(s: FlowsSection) -> Result<Self, Self::Error> {
        Ok(Self {
            freq_secs: parse_freq(&s.freq)?,
            pthreshold: s.pthreshold,
            same_period: s.same_period,
            remove_na: s.remove_na,
            explicit_zeros: s.explicit_zeros,
            agg_displacement: s.agg_displacement,
            displacement_buffer: s.displacement_buffer,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrangleConfig {
    pub filter_low_confidence: bool,
    pub confidence_threshold: f64,
    pub anonymise: bool,
    pub digest_size: usize,
    pub digest_salt: Option<Vec<u8>>,
    pub date_format: String,
}

impl Default for WrangleConfig {
    fn default() -> Self {
        Self::from(WrangleSection::default())
    }
}

impl From<WrangleSection> for WrangleConfig {
    fn from(s: WrangleSection) -> Self {
        Self {
            filter_low_confidence: s.filter_low_confidence,
            confidence_threshold: s.confidence_threshold,
            anonymise: s.anonymise,
            digest_size: s.digest_size,
            digest_salt: s.digest_salt.map(String::into_bytes),
            date_format: s.date_format,
        }
    }
}

/// Widest period accepted, so its width in milliseconds fits an `i64`
pub const MAX_FREQ_SECS: i64 = i64::MAX / 1000;

/// Parse a period width such as "5T", "5min", "1H", "30s" or "1D" into seconds.
/// A missing multiplier means 1 ("H" is one hour).
pub fn parse_freq(freq: &str) -> Result<i64, ConfigError> {
    let trimmed = freq.trim();
    let split = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let multiplier: i64 = if digits.is_empty() {
        1
    } else {
        digits.parse().map_err(|_| ConfigError::InvalidFrequency(freq.to_string()))?
    };

    let unit_secs = match unit.trim() {
        "s" | "S" | "sec" | "secs" => 1,
        "T" | "min" | "mins" | "m" => 60,
        "H" | "h" | "hour" | "hours" => 3_600,
        "D" | "d" | "day" | "days" => 86_400,
        _ => return Err(ConfigError::InvalidFrequency(freq.to_string())),
    };

    if multiplier == 0 {
        return Err(ConfigError::NonPositiveFrequency(freq.to_string()));
    }
    multiplier
        .checked_mul(unit_secs)
        .filter(|secs| *secs <= MAX_FREQ_SECS)
        .ok_or_else(|| ConfigError::InvalidFrequency(freq.to_string()))
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mapper: MapperConfig,
    trips: TripConfig,
    flows: FlowConfig,
    wrangle: WrangleConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mapper: MapperConfig::default(),
            trips: TripConfig::default(),
            flows: FlowConfig::default(),
            wrangle: WrangleConfig::default(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        DEFAULT_CONFIG_PATH.to_string()
    }

    /// Parse and validate TOML content
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("Failed to parse config")?;
        let config = Self::from_sections(toml_config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let mut config = Self::from_sections(toml_config)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Load configuration from a path; a missing file falls back to defaults,
    /// a malformed or invalid one is an error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config_not_found_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    fn from_sections(toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Self {
            mapper: toml_config.mapper.into(),
            trips: toml_config.trips.into(),
            flows: toml_config.flows.try_into()?,
            wrangle: toml_config.wrangle.into(),
            config_file: "inline".to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mapper.passes == 0 {
            return Err(ConfigError::ZeroPasses);
        }
        if self.mapper.camera_range.is_nan() || self.mapper.camera_range <= 0.0 {
            return Err(ConfigError::NonPositiveRange(self.mapper.camera_range));
        }
        non_negative("direction_tolerance_deg", self.mapper.direction_tolerance_deg)?;

        non_negative("speed_threshold", self.trips.speed_threshold)?;
        non_negative("duplicate_threshold", self.trips.duplicate_threshold)?;
        non_negative("max_speed", self.trips.max_speed)?;

        if self.flows.freq_secs <= 0 {
            return Err(ConfigError::NonPositiveFrequency(self.flows.freq_secs.to_string()));
        }
        if self.flows.freq_secs > MAX_FREQ_SECS {
            return Err(ConfigError::InvalidFrequency(self.flows.freq_secs.to_string()));
        }
        if !(0.0..=1.0).contains(&self.flows.pthreshold) {
            return Err(ConfigError::PThresholdOutOfRange(self.flows.pthreshold));
        }

        non_negative("confidence_threshold", self.wrangle.confidence_threshold)?;
        if !(1..=32).contains(&self.wrangle.digest_size) {
            return Err(ConfigError::DigestSize(self.wrangle.digest_size));
        }
        Ok(())
    }

    pub fn mapper(&self) -> &MapperConfig {
        &self.mapper
    }

    pub fn trips(&self) -> &TripConfig {
        &self.trips
    }

    pub fn flows(&self) -> &FlowConfig {
        &self.flows
    }

    pub fn wrangle(&self) -> &WrangleConfig {
        &self.wrangle
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the period width from the CLI
    pub fn with_freq(mut self, freq: &str) -> Result<Self, ConfigError> {
        self.flows.freq_secs = parse_freq(freq)?;
        Ok(self)
    }

    #[cfg(test)]
    pub fn with_trips(mut self, trips: TripConfig) -> Self {
        self.trips = trips;
        self
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value < 0.0 || value.is_nan() {
        return Err(ConfigError::NegativeThreshold { name, value });
    }
    Ok(())
}
