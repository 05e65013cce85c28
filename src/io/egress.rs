//! Result egress - writes pipeline outputs to file
//!
//! Tables are written as CSV (header row) or JSONL (one JSON object per
//! line). Each write goes to a sibling `.partial` file that is renamed over
//! the target once complete, so a failed run never leaves a truncated table.

use crate::domain::network::{CameraMapping, CameraPair, NetworkGraph};
use crate::domain::types::CameraId;
use crate::infra::diagnostics::DiagnosticsSnapshot;
use crate::io::input::format_geometry;
use anyhow::Context;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Output table layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Csv,
    Jsonl,
}

/// Egress writer for one output file
pub struct Egress {
    file_path: PathBuf,
}

impl Egress {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        debug!(file_path = %file_path.display(), "egress_initialized");
        Self { file_path }
    }

    /// Write rows in `format`, returning the number written
    pub fn write_rows<T, I>(&self, rows: I, format: Format) -> anyhow::Result<usize>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let count = self.replace_with(|file| match format {
            Format::Csv => {
                let mut writer = csv::Writer::from_writer(file);
                let mut count = 0;
                for row in rows {
                    writer.serialize(row)?;
                    count += 1;
                }
                writer.flush()?;
                Ok(count)
            }
            Format::Jsonl => {
                let mut writer = BufWriter::new(file);
                let mut count = 0;
                for row in rows {
                    serde_json::to_writer(&mut writer, &row)?;
                    writer.write_all(b"\n")?;
                    count += 1;
                }
                writer.flush()?;
                Ok(count)
            }
        })?;
        info!(file = %self.file_path.display(), rows = count, "table_egressed");
        Ok(count)
    }

    pub fn write_csv<T, I>(&self, rows: I) -> anyhow::Result<usize>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        self.write_rows(rows, Format::Csv)
    }

    /// Write a single pretty-printed JSON document
    pub fn write_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        self.replace_with(|file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            Ok(())
        })?;
        info!(file = %self.file_path.display(), "json_egressed");
        Ok(())
    }

    fn replace_with<R>(&self, write: impl FnOnce(File) -> anyhow::Result<R>) -> anyhow::Result<R> {
        let path = &self.file_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let file = File::create(&partial).with_context(|| format!("Failed to create {}", partial.display()))?;
        let result = match write(file) {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e.context(format!("Failed to write {}", path.display())));
            }
        };
        fs::rename(&partial, path).with_context(|| format!("Failed to move output into {}", path.display()))?;
        Ok(result)
    }
}

#[derive(Debug, Serialize)]
struct UnmappedRow<'a> {
    camera: &'a CameraId,
    reason: &'static str,
}

#[derive(Debug, Serialize)]
struct NodeRow {
    id: u32,
    x: f64,
    y: f64,
    synthetic: bool,
}

#[derive(Debug, Serialize)]
struct EdgeRow<'a> {
    id: u32,
    from: u32,
    to: u32,
    length: f64,
    oneway: bool,
    road_category: Option<&'a str>,
    geometry: String,
}

#[derive(Debug, Serialize)]
struct PairRow<'a> {
    origin: &'a CameraId,
    destination: &'a CameraId,
    distance: f64,
    route: String,
}

/// Writes the map-cameras outputs into `dir`
pub struct MappingEgress {
    dir: PathBuf,
}

impl MappingEgress {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn write_mappings(&self, mappings: &[CameraMapping]) -> anyhow::Result<usize> {
        Egress::new(self.dir.join("camera_mapping.csv")).write_csv(mappings)
    }

    pub fn write_unmapped(&self, unmapped: &[CameraId], decommissioned: &[CameraId]) -> anyhow::Result<usize> {
        let rows = unmapped
            .iter()
            .map(|camera| UnmappedRow { camera, reason: "out_of_range" })
            .chain(decommissioned.iter().map(|camera| UnmappedRow { camera, reason: "decommissioned" }));
        Egress::new(self.dir.join("unmapped_cameras.csv")).write_csv(rows)
    }

    /// Nodes and active edges; tombstoned edges are left out
    pub fn write_network(&self, graph: &NetworkGraph) -> anyhow::Result<()> {
        let nodes = graph
            .nodes()
            .iter()
            .map(|n| NodeRow { id: n.id.0, x: n.x, y: n.y, synthetic: n.synthetic });
        Egress::new(self.dir.join("network_nodes.csv")).write_csv(nodes)?;

        let edges = graph.active_edges().map(|e| EdgeRow {
            id: e.id.0,
            from: e.from.0,
            to: e.to.0,
            length: e.length,
            oneway: e.oneway,
            road_category: e.road_category.as_deref(),
            geometry: format_geometry(&e.geometry),
        });
        Egress::new(self.dir.join("network_edges.csv")).write_csv(edges)?;
        Ok(())
    }

    pub fn write_pairs(&self, pairs: &[CameraPair]) -> anyhow::Result<usize> {
        write_pairs(self.dir.join("camera_pairs.csv"), pairs)
    }
}

/// Pairs with the route as `;`-joined edge ids
pub fn write_pairs<P: AsRef<Path>>(path: P, pairs: &[CameraPair]) -> anyhow::Result<usize> {
    let rows = pairs.iter().map(|p| PairRow {
        origin: &p.origin,
        destination: &p.destination,
        distance: p.distance,
        route: p.route.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(";"),
    });
    Egress::new(path).write_csv(rows)
}

#[derive(Debug, Serialize)]
struct DiagnosticsReport<'a> {
    stage: &'a str,
    generated_at: String,
    #[serde(flatten)]
    diagnostics: &'a DiagnosticsSnapshot,
}

/// `diagnostics.json` next to `output`
pub fn write_diagnostics(output: &Path, stage: &str, snapshot: &DiagnosticsSnapshot) -> anyhow::Result<PathBuf> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let path = dir.join("diagnostics.json");
    let generated_at = OffsetDateTime::now_utc().format(&Rfc3339).context("Failed to format report time")?;
    Egress::new(&path).write_json(&DiagnosticsReport { stage, generated_at, diagnostics: snapshot })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::network::EdgeId;
    use crate::io::input::{read_network, read_pairs};
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Row {
        a: u32,
        b: Option<f64>,
    }

    #[test]
    fn test_write_csv_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("rows.csv");

        let count = Egress::new(&path).write_csv(vec![Row { a: 1, b: None }, Row { a: 2, b: Some(0.5) }]).unwrap();

        assert_eq!(count, 2);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "a,b\n1,\n2,0.5\n");
        assert!(!dir.path().join("nested").join("dir").join("rows.csv.partial").exists());
    }

    #[test]
    fn test_write_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");

        Egress::new(&path).write_rows(vec![Row { a: 1, b: None }, Row { a: 2, b: Some(1.5) }], Format::Jsonl).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["a"], 2);
        assert_eq!(parsed["b"], 1.5);
    }

    #[test]
    fn test_rewrite_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        fs::write(&path, "stale\n").unwrap();

        Egress::new(&path).write_csv(vec![Row { a: 7, b: None }]).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b\n7,\n");
    }

    #[test]
    fn test_network_written_tables_read_back() {
        let dir = tempdir().unwrap();
        let mut graph = NetworkGraph::new();
        let a = graph.add_node(0.0, 0.0);
        let b = graph.add_node(100.0, 0.0);
        let e = graph.add_edge(a, b, Vec::new(), None, false, Some("A".into()));
        graph.split_edge(e, 0, [40.0, 0.0]);

        let egress = MappingEgress::new(dir.path());
        egress.write_network(&graph).unwrap();

        let back = read_network(&dir.path().join("network_nodes.csv"), &dir.path().join("network_edges.csv")).unwrap();
        assert_eq!(back.node_count(), 3);
        assert_eq!(back.active_edge_count(), 2);
        let total: f64 = back.active_edges().map(|e| e.length).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_pairs_route_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camera_pairs.csv");
        let pairs = vec![CameraPair {
            origin: CameraId::new("C1"),
            destination: CameraId::new("C2"),
            distance: 120.0,
            route: vec![EdgeId(4), EdgeId(9)],
        }];

        write_pairs(&path, &pairs).unwrap();

        assert_eq!(read_pairs(&path).unwrap(), pairs);
    }

    #[test]
    fn test_diagnostics_next_to_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("flows.csv");

        let written = write_diagnostics(&output, "flows", &DiagnosticsSnapshot::default()).unwrap();

        assert_eq!(written, dir.path().join("diagnostics.json"));
        let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(parsed["stage"], "flows");
        assert!(parsed.get("counts").is_some());
        assert!(parsed["generated_at"].as_str().unwrap().ends_with('Z'));
    }
}
