//! pulse-report - read-only reports over the Pulse aggregate file and capture log
//!
//! Usage:
//!   pulse-report [--root-folder P] [--store FILE] [--json] summary
//!   pulse-report scores --type sleep
//!   pulse-report --demo 50 --seed 7 archetypes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_common::capture::{read_capture_log, WebhookEventRecord};
use pulse_common::config::{locate_toml_config, log_filter, RootFolderInitializer, RootFolderResolver};
use pulse_common::fixtures::FixtureGenerator;
use pulse_common::store::read_aggregate_file;
use pulse_common::AggregateMap;
use pulse_report::{
    demo_capture_records, ArchetypeReport, BiomarkerReport, EventsReport, ScoreReport,
    SummaryReport,
};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use tracing::{info, warn};

/// Command-line arguments for pulse-report
#[derive(Parser, Debug)]
#[command(name = "pulse-report")]
#[command(about = "Statistics over Pulse wellbeing aggregates")]
#[command(version)]
struct Args {
    /// Root folder holding aggregates.json and the capture log
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Aggregate file to read instead of <root>/aggregates.json
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Capture log to read instead of <root>/webhook-events.jsonl
    #[arg(long, global = true)]
    capture_log: Option<PathBuf>,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Report over N seeded demo subjects instead of the files
    #[arg(long, value_name = "SUBJECTS", global = true)]
    demo: Option<usize>,

    /// Seed for --demo
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subject count and per-category coverage
    Summary,
    /// Score distributions per score type
    Scores {
        /// Only this score type
        #[arg(long = "type")]
        score_type: Option<String>,
    },
    /// Biomarker value statistics per key
    Biomarkers,
    /// Archetype value counts
    Archetypes,
    /// Capture log summary
    Events,
}

fn emit<R: Serialize + Display>(report: &R, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (toml_config, config_source) = locate_toml_config();

    // Logs go to stderr so stdout stays a clean report
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_filter(&toml_config)))
        .with_writer(std::io::stderr)
        .init();
    config_source.log();

    let initializer = RootFolderInitializer::new(
        RootFolderResolver::new("pulse-report")
            .with_cli_arg(args.root_folder.clone())
            .with_toml(&toml_config)
            .resolve(),
    );

    match &args.command {
        Command::Summary => {
            let aggregates = load_aggregates(&args, &initializer).await?;
            emit(&SummaryReport::build(&aggregates), args.json)
        }
        Command::Scores { score_type } => {
            let aggregates = load_aggregates(&args, &initializer).await?;
            emit(&ScoreReport::build(&aggregates, score_type.as_deref()), args.json)
        }
        Command::Biomarkers => {
            let aggregates = load_aggregates(&args, &initializer).await?;
            emit(&BiomarkerReport::build(&aggregates), args.json)
        }
        Command::Archetypes => {
            let aggregates = load_aggregates(&args, &initializer).await?;
            emit(&ArchetypeReport::build(&aggregates), args.json)
        }
        Command::Events => {
            let records = load_records(&args, &initializer).await?;
            emit(&EventsReport::build(&records), args.json)
        }
    }
}

/// Aggregates from the store file, or demo fixtures with --demo
async fn load_aggregates(args: &Args, initializer: &RootFolderInitializer) -> Result<AggregateMap> {
    if let Some(subjects) = args.demo {
        info!("Using {} demo subjects (seed {})", subjects, args.seed);
        return Ok(FixtureGenerator::new(args.seed).aggregates(subjects));
    }

    let path = args.store.clone().unwrap_or_else(|| initializer.aggregate_path());
    if !path.exists() {
        warn!("Aggregate file {} not found, reporting on nothing", path.display());
    }
    read_aggregate_file(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Capture log records, or demo deliveries with --demo
async fn load_records(args: &Args, initializer: &RootFolderInitializer) -> Result<Vec<WebhookEventRecord>> {
    if let Some(subjects) = args.demo {
        info!("Using {} demo subjects (seed {})", subjects, args.seed);
        return Ok(demo_capture_records(subjects, args.seed));
    }

    let path = args
        .capture_log
        .clone()
        .unwrap_or_else(|| initializer.capture_log_path());
    if !path.exists() {
        warn!("Capture log {} not found, reporting on nothing", path.display());
    }
    read_capture_log(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}
