//! ANPR flows - number plate sightings to origin-destination flows
//!
//! Module structure:
//! - `domain/` - Core types (Camera, NetworkGraph, TripStep, FlowRecord)
//! - `io/` - CSV readers and CSV/JSONL egress
//! - `services/` - Pipeline stages (NetworkMapper, TripIdentifier, FlowAggregator)
//! - `infra/` - Infrastructure (Config, Diagnostics)

use anpr_flows::domain::{Camera, CameraId, CameraPair, FlowRecord, Sighting, TripStep};
use anpr_flows::infra::{Config, Diagnostics};
use anpr_flows::io::{self, Egress, Format, MappingEgress};
use anpr_flows::services::{
    camera_pairs, Anonymizer, FlowAggregator, MappingOutcome, NetworkMapper, PairIndex, TripIdentifier,
    Wrangler,
};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// ANPR flows - camera mapping, trip identification and flow aggregation
#[derive(Parser, Debug)]
#[command(name = "anpr-flows", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/anpr.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snap cameras onto the road network and compute camera pair distances
    MapCameras {
        #[arg(long)]
        cameras: PathBuf,
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long)]
        edges: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Turn sightings into trip steps
    Trips {
        #[arg(long)]
        sightings: PathBuf,
        #[arg(long)]
        pairs: PathBuf,
        /// Restrict sightings to commissioned cameras in this file
        #[arg(long)]
        cameras: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Aggregate trip steps into flows per period
    Flows {
        #[arg(long)]
        trips: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
        /// Override the configured period width, e.g. "15min"
        #[arg(long)]
        freq: Option<String>,
    },
    /// Every stage in sequence
    Run {
        #[arg(long)]
        cameras: PathBuf,
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long)]
        edges: PathBuf,
        #[arg(long)]
        sightings: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
        #[arg(long)]
        freq: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Jsonl,
}

impl OutputFormat {
    fn format(self) -> Format {
        match self {
            OutputFormat::Csv => Format::Csv,
            OutputFormat::Jsonl => Format::Jsonl,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Structured logging, level from RUST_LOG (default: info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "anpr_flows_starting");

    let config = Config::load_from_path(Config::resolve_config_path(args.config.as_deref()))?;
    info!(
        config_file = %config.config_file(),
        passes = config.mapper().passes,
        camera_range = config.mapper().camera_range,
        max_speed_ms = config.trips().max_speed,
        freq_secs = config.flows().freq_secs,
        pthreshold = config.flows().pthreshold,
        anonymise = config.wrangle().anonymise,
        "config_loaded"
    );

    let diagnostics = Diagnostics::new();
    let (stage, report_next_to) = match args.command {
        Command::MapCameras { cameras, nodes, edges, out_dir } => {
            let cameras = io::read_cameras(&cameras)?;
            let (outcome, pairs) = map_cameras(&config, &diagnostics, &cameras, &nodes, &edges)?;
            write_mapping(&out_dir, &outcome, &pairs)?;
            ("map_cameras", out_dir.join("camera_pairs.csv"))
        }
        Command::Trips { sightings, pairs, cameras, output } => {
            let pairs = io::read_pairs(&pairs)?;
            let known: FxHashSet<CameraId> = match cameras {
                Some(path) => commissioned(&io::read_cameras(&path)?),
                None => pairs.iter().flat_map(|p| [p.origin.clone(), p.destination.clone()]).collect(),
            };
            let index = PairIndex::new(&pairs);
            let sightings = io::read_sightings(&sightings, &config.wrangle().date_format)?;
            let steps = trips(&config, &diagnostics, &index, &known, sightings)?;
            Egress::new(&output).write_csv(&steps)?;
            ("trips", output)
        }
        Command::Flows { trips, output, format, freq } => {
            let config = with_freq(config, freq.as_deref())?;
            let steps = io::read_trips(&trips)?;
            let flows = flows(&config, &diagnostics, steps)?;
            Egress::new(&output).write_rows(&flows, format.format())?;
            ("flows", output)
        }
        Command::Run { cameras, nodes, edges, sightings, out_dir, format, freq } => {
            let config = with_freq(config, freq.as_deref())?;
            let cameras = io::read_cameras(&cameras)?;
            let (outcome, pairs) = map_cameras(&config, &diagnostics, &cameras, &nodes, &edges)?;
            write_mapping(&out_dir, &outcome, &pairs)?;

            let index = PairIndex::new(&pairs);
            let known: FxHashSet<CameraId> = outcome.mappings.iter().map(|m| m.camera.clone()).collect();
            let sightings = io::read_sightings(&sightings, &config.wrangle().date_format)?;
            let steps = trips(&config, &diagnostics, &index, &known, sightings)?;
            Egress::new(out_dir.join("trips.csv")).write_csv(&steps)?;

            let flows = flows(&config, &diagnostics, steps)?;
            let flows_path = out_dir.join(format!("flows.{}", format.extension()));
            Egress::new(&flows_path).write_rows(&flows, format.format())?;
            ("run", flows_path)
        }
    };

    diagnostics.log_summary(stage);
    let report = io::write_diagnostics(&report_next_to, stage, &diagnostics.snapshot())?;
    info!(stage = stage, report = %report.display(), "anpr_flows_finished");
    Ok(())
}

fn with_freq(config: Config, freq: Option<&str>) -> anyhow::Result<Config> {
    match freq {
        Some(freq) => config.with_freq(freq).with_context(|| format!("Invalid --freq {freq}")),
        None => Ok(config),
    }
}

fn commissioned(cameras: &[Camera]) -> FxHashSet<CameraId> {
    cameras.iter().filter(|c| c.is_commissioned).map(|c| c.id.clone()).collect()
}

fn map_cameras(
    config: &Config,
    diagnostics: &Diagnostics,
    cameras: &[Camera],
    nodes: &Path,
    edges: &Path,
) -> anyhow::Result<(MappingOutcome, Vec<CameraPair>)> {
    let graph = io::read_network(nodes, edges)?;
    let outcome = NetworkMapper::new(config.mapper(), diagnostics).map(cameras, graph);
    let pairs = camera_pairs(&outcome.graph, &outcome.mappings, diagnostics);
    Ok((outcome, pairs))
}

fn write_mapping(out_dir: &Path, outcome: &MappingOutcome, pairs: &[CameraPair]) -> anyhow::Result<()> {
    let egress = MappingEgress::new(out_dir);
    egress.write_mappings(&outcome.mappings)?;
    egress.write_unmapped(&outcome.unmapped, &outcome.decommissioned)?;
    egress.write_network(&outcome.graph)?;
    egress.write_pairs(pairs)?;
    Ok(())
}

fn trips(
    config: &Config,
    diagnostics: &Diagnostics,
    index: &PairIndex,
    known: &FxHashSet<CameraId>,
    sightings: Vec<Sighting>,
) -> anyhow::Result<Vec<TripStep>> {
    let wrangle = config.wrangle();
    let anonymizer = if wrangle.anonymise {
        let anonymizer = match &wrangle.digest_salt {
            Some(salt) => Anonymizer::new(salt.clone(), wrangle.digest_size)?,
            None => Anonymizer::with_random_salt(wrangle.digest_size)?,
        };
        Some(anonymizer)
    } else {
        None
    };

    let mut wrangler = Wrangler::new(wrangle, diagnostics).with_known_cameras(known);
    if let Some(anonymizer) = &anonymizer {
        wrangler = wrangler.with_anonymizer(anonymizer);
    }
    let sightings = wrangler.wrangle(sightings);

    let steps = TripIdentifier::new(config.trips(), index, diagnostics)
        .identify(&sightings)
        .context("Trip identification failed")?;
    Ok(steps)
}

fn flows(config: &Config, diagnostics: &Diagnostics, steps: Vec<TripStep>) -> anyhow::Result<Vec<FlowRecord>> {
    let flows = FlowAggregator::new(config.flows(), diagnostics)
        .compute(steps)
        .context("Flow aggregation failed")?;
    Ok(flows)
}
