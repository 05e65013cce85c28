//! CSV readers that turn input tables into typed records
//!
//! Expected columns (extra columns are ignored):
//! - cameras: `id,x,y[,lat,lon,direction,road_category,is_commissioned]`
//! - nodes: `id,x,y`
//! - edges: `from,to[,length,oneway,road_category,geometry]`, geometry as `x y;x y;...`
//! - sightings: `vehicle,camera,timestamp[,confidence]`
//! - pairs: `origin,destination,distance[,route]`, route as `edge;edge;...`
//! - trips: the columns written by the trips command

use crate::domain::network::{CameraPair, EdgeId, NetworkGraph, NodeId};
use crate::domain::trip::TripStep;
use crate::domain::types::{Camera, CameraId, Sighting, VehicleId};
use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, NaiveDateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

fn reader(path: &Path) -> anyhow::Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

#[derive(Debug, Deserialize)]
struct CameraRow {
    id: String,
    x: f64,
    y: f64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    road_category: Option<String>,
    #[serde(default)]
    is_commissioned: Option<bool>,
}

pub fn read_cameras(path: &Path) -> anyhow::Result<Vec<Camera>> {
    let mut cameras = Vec::new();
    for (line, row) in reader(path)?.deserialize::<CameraRow>().enumerate() {
        let row = row.with_context(|| format!("Bad camera row {} in {}", line + 1, path.display()))?;
        let direction = match row.direction.as_deref().filter(|d| !d.is_empty()) {
            Some(d) => match d.parse() {
                Ok(direction) => Some(direction),
                Err(e) => {
                    warn!(camera = %row.id, error = %e, "camera_direction_ignored");
                    None
                }
            },
            None => None,
        };
        cameras.push(Camera {
            id: CameraId(row.id),
            x: row.x,
            y: row.y,
            lat: row.lat.unwrap_or_default(),
            lon: row.lon.unwrap_or_default(),
            direction,
            road_category: row.road_category.filter(|c| !c.is_empty()),
            is_commissioned: row.is_commissioned.unwrap_or(true),
        });
    }
    info!(path = %path.display(), cameras = cameras.len(), "cameras_loaded");
    Ok(cameras)
}

#[derive(Debug, Deserialize)]
struct NodeRow {
    id: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct EdgeRow {
    from: String,
    to: String,
    #[serde(default)]
    length: Option<f64>,
    #[serde(default)]
    oneway: Option<bool>,
    #[serde(default)]
    road_category: Option<String>,
    #[serde(default)]
    geometry: Option<String>,
}

/// Parse `x y;x y;...`
pub fn parse_geometry(raw: &str) -> anyhow::Result<Vec<[f64; 2]>> {
    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut it = p.split_whitespace().map(str::parse::<f64>);
            match (it.next(), it.next(), it.next()) {
                (Some(Ok(x)), Some(Ok(y)), None) => Ok([x, y]),
                _ => Err(anyhow!("bad coordinate '{p}'")),
            }
        })
        .collect()
}

pub fn format_geometry(points: &[[f64; 2]]) -> String {
    points.iter().map(|[x, y]| format!("{x} {y}")).collect::<Vec<_>>().join(";")
}

/// Build a graph from node and edge tables. Node ids are external keys; the
/// arena assigns its own indices in file order.
pub fn read_network(nodes_path: &Path, edges_path: &Path) -> anyhow::Result<NetworkGraph> {
    let mut graph = NetworkGraph::new();
    let mut ids: FxHashMap<String, NodeId> = FxHashMap::default();

    for (line, row) in reader(nodes_path)?.deserialize::<NodeRow>().enumerate() {
        let row = row.with_context(|| format!("Bad node row {} in {}", line + 1, nodes_path.display()))?;
        if ids.contains_key(&row.id) {
            bail!("Duplicate node id {} in {}", row.id, nodes_path.display());
        }
        let node = graph.add_node(row.x, row.y);
        ids.insert(row.id, node);
    }

    for (line, row) in reader(edges_path)?.deserialize::<EdgeRow>().enumerate() {
        let row = row.with_context(|| format!("Bad edge row {} in {}", line + 1, edges_path.display()))?;
        let from = *ids.get(&row.from).ok_or_else(|| anyhow!("Edge row {}: unknown node {}", line + 1, row.from))?;
        let to = *ids.get(&row.to).ok_or_else(|| anyhow!("Edge row {}: unknown node {}", line + 1, row.to))?;
        let geometry = match row.geometry.as_deref() {
            Some(raw) => parse_geometry(raw).with_context(|| format!("Edge row {}", line + 1))?,
            None => Vec::new(),
        };
        graph.add_edge(
            from,
            to,
            geometry,
            row.length,
            row.oneway.unwrap_or(false),
            row.road_category.filter(|c| !c.is_empty()),
        );
    }

    info!(
        nodes = graph.node_count(),
        edges = graph.active_edge_count(),
        "network_loaded"
    );
    Ok(graph)
}

#[derive(Debug, Deserialize)]
struct SightingRow {
    vehicle: String,
    camera: String,
    timestamp: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse a timestamp with `format` (naive, taken as UTC), falling back to RFC 3339
pub fn parse_timestamp(raw: &str, format: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Cannot parse timestamp '{raw}' with format '{format}'"))
}

/// Read raw sightings; plates are left as read for the wrangler to normalise
pub fn read_sightings(path: &Path, date_format: &str) -> anyhow::Result<Vec<Sighting>> {
    let mut sightings = Vec::new();
    for (line, row) in reader(path)?.deserialize::<SightingRow>().enumerate() {
        let row = row.with_context(|| format!("Bad sighting row {} in {}", line + 1, path.display()))?;
        let timestamp = parse_timestamp(&row.timestamp, date_format)
            .with_context(|| format!("Sighting row {} in {}", line + 1, path.display()))?;
        sightings.push(Sighting {
            vehicle: VehicleId(row.vehicle),
            camera: CameraId(row.camera),
            timestamp,
            confidence: row.confidence.unwrap_or(1.0),
        });
    }
    info!(path = %path.display(), sightings = sightings.len(), "sightings_loaded");
    Ok(sightings)
}

#[derive(Debug, Deserialize)]
struct PairRow {
    origin: String,
    destination: String,
    distance: f64,
    #[serde(default)]
    route: Option<String>,
}

pub fn read_pairs(path: &Path) -> anyhow::Result<Vec<CameraPair>> {
    let mut pairs = Vec::new();
    for (line, row) in reader(path)?.deserialize::<PairRow>().enumerate() {
        let row = row.with_context(|| format!("Bad pair row {} in {}", line + 1, path.display()))?;
        let route = row
            .route
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .filter(|e| !e.is_empty())
            .map(|e| e.parse::<u32>().map(EdgeId))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Bad route in pair row {}", line + 1))?;
        pairs.push(CameraPair {
            origin: CameraId(row.origin),
            destination: CameraId(row.destination),
            distance: row.distance,
            route,
        });
    }
    info!(path = %path.display(), pairs = pairs.len(), "camera_pairs_loaded");
    Ok(pairs)
}

pub fn read_trips(path: &Path) -> anyhow::Result<Vec<TripStep>> {
    let mut steps = Vec::new();
    for (line, row) in reader(path)?.deserialize::<TripStep>().enumerate() {
        let step = row.with_context(|| format!("Bad trip row {} in {}", line + 1, path.display()))?;
        if step.t_end < step.t_start {
            bail!(
                "Trip row {} in {}: t_end {} is before t_start {}",
                line + 1,
                path.display(),
                step.t_end,
                step.t_start
            );
        }
        steps.push(step);
    }
    info!(path = %path.display(), steps = steps.len(), "trips_loaded");
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Direction;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_geometry() {
        assert_eq!(parse_geometry("0 0; 10.5 2").unwrap(), vec![[0.0, 0.0], [10.5, 2.0]]);
        assert!(parse_geometry("0 0 0").is_err());
        assert_eq!(format_geometry(&[[1.0, 2.0], [3.5, 4.0]]), "1 2;3.5 4");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let t = parse_timestamp("2017-06-01 08:00:05.500", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(t.timestamp_millis() % 1000, 500);
        let t = parse_timestamp("2017-06-01T08:00:05Z", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(t.timestamp() % 60, 5);
        assert!(parse_timestamp("yesterday", "%Y-%m-%d").is_err());
    }

    #[test]
    fn test_read_cameras_with_optional_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cameras.csv");
        fs::write(
            &path,
            "id,x,y,direction,road_category,is_commissioned\nC1,1.0,2.0,northbound,A,true\nC2,3,4,,,false\n",
        )
        .unwrap();

        let cameras = read_cameras(&path).unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].direction, Some(Direction::North));
        assert_eq!(cameras[0].road_category.as_deref(), Some("A"));
        assert_eq!(cameras[1].direction, None);
        assert!(!cameras[1].is_commissioned);
    }

    #[test]
    fn test_read_network() {
        let dir = tempdir().unwrap();
        let nodes = dir.path().join("nodes.csv");
        let edges = dir.path().join("edges.csv");
        fs::write(&nodes, "id,x,y\n10,0,0\n20,100,0\n").unwrap();
        fs::write(&edges, "from,to,length,oneway,road_category,geometry\n10,20,,true,A,\n").unwrap();

        let graph = read_network(&nodes, &edges).unwrap();
        assert_eq!(graph.node_count(), 2);
        let edge = graph.edge(EdgeId(0));
        assert!(edge.oneway);
        assert!((edge.length - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_read_network_unknown_node() {
        let dir = tempdir().unwrap();
        let nodes = dir.path().join("nodes.csv");
        let edges = dir.path().join("edges.csv");
        fs::write(&nodes, "id,x,y\n1,0,0\n").unwrap();
        fs::write(&edges, "from,to\n1,2\n").unwrap();
        assert!(read_network(&nodes, &edges).is_err());
    }

    #[test]
    fn test_read_sightings_default_confidence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sightings.csv");
        fs::write(&path, "vehicle,camera,timestamp\nAB12CDE,C1,2017-06-01 08:00:00.000\n").unwrap();

        let sightings = read_sightings(&path, "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].confidence, 1.0);
        assert_eq!(sightings[0].camera.as_str(), "C1");
    }

    #[test]
    fn test_read_pairs_with_route() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, "origin,destination,distance,route\nC1,C2,250.5,3;7\nC2,C1,300,\n").unwrap();

        let pairs = read_pairs(&path).unwrap();
        assert_eq!(pairs[0].route, vec![EdgeId(3), EdgeId(7)]);
        assert!(pairs[1].route.is_empty());
    }

    #[test]
    fn test_read_trips_rejects_reversed_step() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trips.csv");
        fs::write(
            &path,
            "vehicle,trip,step,origin,destination,t_start,t_end,distance,travel_time,speed,below_speed_threshold,displacement\n\
             V1,0,1,C1,C2,2020-09-13T12:30:00Z,2020-09-13T12:31:00Z,600,60,10,false,\n\
             V1,0,2,C2,C3,2020-09-13T12:36:00Z,2020-09-13T12:31:00Z,600,60,10,false,\n",
        )
        .unwrap();

        let err = read_trips(&path).unwrap_err().to_string();

        assert!(err.contains("Trip row 2"), "{err}");
        assert!(err.contains("before t_start"), "{err}");
    }
}
