//! Run configuration: TOML file with defaults, overridden from the command line.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::params::{ProcessParameters, RecordingFilter};
use crate::segmentation::PollPolicy;

/// How segmentation and classification are scheduled across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Segment everything, wait, then classify everything.
    TwoPhase,
    /// Each worker segments and then classifies its own recording.
    #[default]
    Pipelined,
}

/// Configuration for one evaluation run, read from TOML. Missing keys take
/// the defaults of the reference setup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub engine_url: String,
    pub pipeline_file: PathBuf,
    pub database: PathBuf,
    pub recordings_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Worker threads per pool; defaults to the available CPU count.
    pub workers: Option<usize>,
    pub poll_interval_ms: u64,
    /// Unset waits for the engine indefinitely.
    pub poll_timeout_secs: Option<u64>,
    pub request_timeout_secs: u64,
    pub schedule: Schedule,
    pub recording_duration_s: f64,
    pub parameters: ProcessParameters,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine_url: "http://127.0.0.1:6937".to_string(),
            pipeline_file: PathBuf::from("../pipelines/SSVEP Sequential.pyp"),
            database: PathBuf::from("../../database/data/ssvep-db.sqlite"),
            recordings_dir: PathBuf::from("../../database/data/recordings"),
            temp_dir: PathBuf::from("../../database/data/temp"),
            log_dir: PathBuf::from("../../logs"),
            workers: None,
            poll_interval_ms: 100,
            poll_timeout_secs: None,
            request_timeout_secs: 30,
            schedule: Schedule::default(),
            recording_duration_s: 6.0,
            parameters: ProcessParameters::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {path:?}: {e}")))?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{path:?}: {msg}")),
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        if !(self.recording_duration_s.is_finite() && self.recording_duration_s > 0.0) {
            return Err(Error::Config("recording_duration_s must be positive".into()));
        }
        self.parameters.validate()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: self.poll_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn recording_filter(&self) -> RecordingFilter {
        RecordingFilter::new(&self.parameters, self.recording_duration_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Frequency;

    #[test]
    fn empty_file_yields_defaults() {
        let config = RunConfig::from_toml("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.schedule, Schedule::Pipelined);
        assert_eq!(config.poll_policy(), PollPolicy::default());
    }

    #[test]
    fn parses_overrides() {
        let config = RunConfig::from_toml(
            r#"
            engine_url = "http://engine:7000"
            workers = 3
            poll_timeout_secs = 120
            schedule = "two_phase"

            [parameters]
            method = "test"
            frequencies = [10, 12]
            segmentTimeLimits = [0.0, 4.0]
            trialSequence = [10, 12, 10]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine_url, "http://engine:7000");
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.schedule, Schedule::TwoPhase);
        assert_eq!(config.poll_policy().timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.parameters.frequencies, vec![Frequency(10), Frequency(12)]);
        assert_eq!(config.recording_filter().frequencies, vec![Frequency(10), Frequency(12)]);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(RunConfig::from_toml("workers = 0").is_err());
        assert!(RunConfig::from_toml("schedule = \"sometimes\"").is_err());
        assert!(RunConfig::from_toml("request_timeout_secs = 0").is_err());
        assert!(RunConfig::from_toml("poll_interval_ms = 0").is_err());
        assert!(RunConfig::from_toml(
            "[parameters]\nmethod = \"m\"\nfrequencies = []\nsegmentTimeLimits = [0.0, 1.0]\ntrialSequence = []"
        )
        .is_err());
    }

    #[test]
    fn bundled_config_matches_defaults() {
        let config = RunConfig::from_toml(include_str!("../ssvep-cca.toml")).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn worker_count_defaults_to_cpus() {
        assert!(RunConfig::default().worker_count() >= 1);
    }
}
