//! # ssvep-cca
//!
//! Batch evaluation of SSVEP frequency detection on segmented EEG
//! recordings.
//!
//! ```text
//! recordings (SQLite)
//!   │
//!   ├─ segmentation   external pipeline engine → <freq>hz.csv per recording
//!   ├─ trials         header + index column dropped, rows 0-1 calibration
//!   ├─ classifier     avg CCA vs both calibrations, argmax per trial
//!   └─ store          one result row per (parameters, recording)
//! ```
//!
//! The [`orchestrator::run`] entry point wires the stages together; every
//! stage is also usable on its own.

pub mod cca;
pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod params;
pub mod segmentation;
pub mod store;
pub mod trials;

pub use config::{RunConfig, Schedule};
pub use error::{Error, NumericError, Result};
pub use params::{Frequency, ProcessParameters};
