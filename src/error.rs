//! Error types for the SSVEP evaluation run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::params::Frequency;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Degenerate input handed to the CCA scorer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("sequence lengths differ: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("at least 2 samples are required, got {0}")]
    TooFewSamples(usize),

    #[error("{0} sequence has zero variance")]
    ZeroVariance(&'static str),

    #[error("{0} sequence contains non-finite samples")]
    NonFinite(&'static str),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("CCA failed: {0}")]
    Numeric(#[from] NumericError),

    /// Accuracy is undefined without at least one tested trial.
    #[error("no trials were tested, accuracy is undefined")]
    NoTrialsTested,

    #[error("no calibration data for frequency {0}")]
    MissingFrequency(Frequency),

    #[error("invalid trial data in {path:?}: {reason}")]
    TrialData { path: PathBuf, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("segmentation engine request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("segmentation engine protocol error: {0}")]
    Engine(String),

    #[error("execution {execution} did not complete within {waited:?}")]
    EngineTimeout { execution: String, waited: Duration },

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid process parameters: {0}")]
    InvalidParameters(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
