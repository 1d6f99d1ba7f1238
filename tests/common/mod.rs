//! Shared fixtures: synthetic SSVEP signals and a segmenter that writes them
//! as trial CSVs instead of calling the engine.
#![allow(dead_code)]
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ndarray::Array1;
use serde_json::json;
use ssvep_cca::error::{Error, Result};
use ssvep_cca::segmentation::{SegmentationRequest, Segmenter};
use ssvep_cca::store::{Recording, Store};
use ssvep_cca::{Frequency, RunConfig};

pub const SAMPLE_RATE: f64 = 250.0;
pub const SAMPLES: usize = 300;

pub fn sine(freq: f64, phase: f64) -> Array1<f64> {
    Array1::from_iter(
        (0..SAMPLES).map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE + phase).sin()),
    )
}

/// Writes one frequency file in the engine's layout: header row, index
/// column, one series per row.
pub fn write_trial_csv(path: &Path, rows: &[Array1<f64>]) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    let width = rows.first().map_or(0, |r| r.len());
    let mut header = vec![String::new()];
    header.extend((0..width).map(|i| i.to_string()));
    writer.write_record(&header).unwrap();
    for (i, row) in rows.iter().enumerate() {
        let mut record = vec![i.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record).unwrap();
    }
    writer.flush().unwrap();
}

/// Stands in for the engine: writes two calibration rows and
/// `trials_per_frequency` trials per frequency. The first `mislabeled`
/// trials of the first frequency carry the second frequency's signal.
pub struct SyntheticSegmenter {
    pub trials_per_frequency: usize,
    pub mislabeled: usize,
    /// Source file names (without directories) for which segmentation fails.
    pub fail_for: Vec<String>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<SegmentationRequest>>,
}

impl SyntheticSegmenter {
    pub fn new(trials_per_frequency: usize) -> Self {
        Self {
            trials_per_frequency,
            mislabeled: 0,
            fail_for: Vec::new(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Segmenter for SyntheticSegmenter {
    fn segment(&self, request: &SegmentationRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let name = request
            .source_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_for.contains(&name) {
            return Err(Error::Engine(format!("engine rejected {name}")));
        }

        std::fs::create_dir_all(&request.output_dir)?;
        for (index, frequency) in request.frequencies.iter().enumerate() {
            let own = sine(frequency.0 as f64, 0.0);
            let mut rows = vec![own.clone(), own.clone()];
            for trial in 0..self.trials_per_frequency {
                if index == 0 && trial < self.mislabeled {
                    let other = request.frequencies.get(1).copied().unwrap_or(Frequency(1));
                    rows.push(sine(other.0 as f64, 0.0));
                } else {
                    rows.push(own.clone());
                }
            }
            write_trial_csv(&request.output_dir.join(format!("{}.csv", frequency.label())), &rows);
        }
        Ok(())
    }
}

pub fn test_config(root: &Path) -> RunConfig {
    RunConfig {
        database: root.join("ssvep.sqlite"),
        recordings_dir: root.join("recordings"),
        temp_dir: root.join("temp"),
        log_dir: root.join("logs"),
        workers: Some(2),
        ..RunConfig::default()
    }
}

pub fn add_reference_recording(store: &Store, file: &str) -> Recording {
    store
        .insert_recording(file, &json!({"duration_s": 6.0, "frequencies": ["9", "16", "13"]}))
        .unwrap()
}
