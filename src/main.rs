use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ssvep_cca::orchestrator;
use ssvep_cca::segmentation::EngineClient;
use ssvep_cca::store::Store;
use ssvep_cca::{RunConfig, Schedule};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(about = "Evaluate SSVEP frequency detection accuracy with CCA")]
struct CliArgs {
    /// TOML run configuration. Built-in defaults are used when omitted.
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(long)]
    database: Option<PathBuf>,

    /// Base URL of the segmentation engine.
    #[clap(long)]
    engine_url: Option<String>,

    /// Worker threads per pool (defaults to the CPU count).
    #[clap(long)]
    workers: Option<usize>,

    #[clap(long, value_enum)]
    schedule: Option<Schedule>,

    /// Give up on an engine execution after this many seconds.
    #[clap(long)]
    poll_timeout_secs: Option<u64>,

    #[clap(long)]
    log_dir: Option<PathBuf>,
}

impl CliArgs {
    fn resolve(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(engine_url) = self.engine_url {
            config.engine_url = engine_url;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        if let Some(schedule) = self.schedule {
            config.schedule = schedule;
        }
        if self.poll_timeout_secs.is_some() {
            config.poll_timeout_secs = self.poll_timeout_secs;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    let config = CliArgs::parse().resolve()?;
    let log_file = ssvep_cca::logging::init(&config.log_dir)?;

    info!("{}", "=".repeat(80));
    info!("Init processing...");
    info!("Log file: {:?}", log_file);
    info!("Database: {:?}", config.database);
    info!("Recordings folder: {:?}", config.recordings_dir);
    info!("Temp folder: {:?}", config.temp_dir);
    info!("Engine base url: {}", config.engine_url);
    info!("Pipeline file: {:?}", config.pipeline_file);
    info!("Workers: {}", config.worker_count());
    info!("Schedule: {:?}", config.schedule);
    info!("Parameters: {:?}", config.parameters);

    let mut store = Store::open(&config.database)
        .with_context(|| format!("Failed to open database {:?}", config.database))?;
    let engine = EngineClient::new(
        &config.engine_url,
        &config.pipeline_file,
        config.request_timeout(),
        config.poll_policy(),
    )
    .context("Failed to create engine client")?;

    let summary = orchestrator::run(&config, &mut store, &engine).context("Run aborted")?;

    info!(
        "Processed {} recordings: {} inserted, {} updated, {} failed",
        summary.selected,
        summary.inserted,
        summary.updated,
        summary.failures.len()
    );
    if summary.is_complete() {
        return Ok(ExitCode::SUCCESS);
    }
    for failure in &summary.failures {
        error!(
            "Recording {} ({}) failed during {}: {}",
            failure.recording_id, failure.file, failure.stage, failure.error
        );
    }
    Ok(ExitCode::FAILURE)
}
