//! Shared types for the ANPR pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Newtype wrapper for camera IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for vehicle identifiers (plate numbers or their digests)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compass direction of the traffic a camera observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "N")]
    North,
    #[serde(rename = "NE")]
    NorthEast,
    #[serde(rename = "E")]
    East,
    #[serde(rename = "SE")]
    SouthEast,
    #[serde(rename = "S")]
    South,
    #[serde(rename = "SW")]
    SouthWest,
    #[serde(rename = "W")]
    West,
    #[serde(rename = "NW")]
    NorthWest,
}

impl Direction {
    /// Bearing in degrees, clockwise from north
    #[inline]
    pub fn bearing(&self) -> f64 {
        match self {
            Direction::North => 0.0,
            Direction::NorthEast => 45.0,
            Direction::East => 90.0,
            Direction::SouthEast => 135.0,
            Direction::South => 180.0,
            Direction::SouthWest => 225.0,
            Direction::West => 270.0,
            Direction::NorthWest => 315.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "N",
            Direction::NorthEast => "NE",
            Direction::East => "E",
            Direction::SouthEast => "SE",
            Direction::South => "S",
            Direction::SouthWest => "SW",
            Direction::West => "W",
            Direction::NorthWest => "NW",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    /// Accepts abbreviations ("N", "SE") and full names ("north", "southbound")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' ', '_'], "");
        let normalized = normalized.strip_suffix("bound").unwrap_or(&normalized);
        match normalized {
            "n" | "north" => Ok(Direction::North),
            "ne" | "northeast" => Ok(Direction::NorthEast),
            "e" | "east" => Ok(Direction::East),
            "se" | "southeast" => Ok(Direction::SouthEast),
            "s" | "south" => Ok(Direction::South),
            "sw" | "southwest" => Ok(Direction::SouthWest),
            "w" | "west" => Ok(Direction::West),
            "nw" | "northwest" => Ok(Direction::NorthWest),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ANPR camera, already projected into a metric coordinate system
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub id: CameraId,
    /// Projected easting (meters)
    pub x: f64,
    /// Projected northing (meters)
    pub y: f64,
    pub lat: f64,
    pub lon: f64,
    pub direction: Option<Direction>,
    pub road_category: Option<String>,
    pub is_commissioned: bool,
}

impl Camera {
    pub fn new(id: &str, x: f64, y: f64) -> Self {
        Self {
            id: CameraId::new(id),
            x,
            y,
            lat: 0.0,
            lon: 0.0,
            direction: None,
            road_category: None,
            is_commissioned: true,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_road_category(mut self, category: &str) -> Self {
        self.road_category = Some(category.to_string());
        self
    }

    #[inline]
    pub fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// A single plate read by a camera
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub vehicle: VehicleId,
    pub camera: CameraId,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

impl Sighting {
    pub fn new(vehicle: &str, camera: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            vehicle: VehicleId::new(vehicle),
            camera: CameraId::new(camera),
            timestamp,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse_variants() {
        assert_eq!("N".parse::<Direction>(), Ok(Direction::North));
        assert_eq!("southbound".parse::<Direction>(), Ok(Direction::South));
        assert_eq!("North-East".parse::<Direction>(), Ok(Direction::NorthEast));
        assert_eq!(" w ".parse::<Direction>(), Ok(Direction::West));
        assert!("up".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_bearing_roundtrip_str() {
        for d in [Direction::North, Direction::SouthEast, Direction::NorthWest] {
            assert_eq!(d.as_str().parse::<Direction>(), Ok(d));
        }
        assert_eq!(Direction::West.bearing(), 270.0);
    }

    #[test]
    fn test_camera_id_display() {
        assert_eq!(CameraId::new("C1").to_string(), "C1");
    }
}
