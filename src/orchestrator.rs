//! Run orchestration: resolve parameters, select recordings, fan segmentation
//! and classification out over worker pools, and persist the results.
use std::fmt;
use std::path::PathBuf;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::classifier::{classify, RecordingResult};
use crate::config::{RunConfig, Schedule};
use crate::error::Result;
use crate::segmentation::{SegmentationRequest, Segmenter};
use crate::store::{Recording, ResultRecord, Store};
use crate::trials::TrialSet;

/// Step of the per-recording work a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmentation,
    Classification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Segmentation => f.write_str("segmentation"),
            Stage::Classification => f.write_str("classification"),
        }
    }
}

/// A recording that could not be processed. The rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingFailure {
    pub recording_id: i64,
    pub file: String,
    pub stage: Stage,
    pub error: String,
}

/// Outcome of one run: the parameters row used, how many recordings were
/// selected and persisted, and which ones failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub parameters_id: i64,
    pub parameters_created: bool,
    pub selected: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failures: Vec<RecordingFailure>,
}

impl RunSummary {
    /// `true` when no recording failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

type Outcome = std::result::Result<RecordingResult, RecordingFailure>;

/// Runs one evaluation against `store`, segmenting through `segmenter`.
pub fn run(config: &RunConfig, store: &mut Store, segmenter: &dyn Segmenter) -> Result<RunSummary> {
    info!("Start processing...");
    config.validate()?;

    let (parameters, created) = store.find_or_create_parameters(&config.parameters)?;
    if created {
        info!("Process parameters did not exist. Created id {}", parameters.id);
    } else {
        info!("Found existing process parameters id {}", parameters.id);
    }

    let recordings = store.select_recordings(&config.recording_filter())?;
    let workers = config.worker_count();

    let outcomes = match config.schedule {
        Schedule::TwoPhase => run_two_phase(config, segmenter, &recordings, workers)?,
        Schedule::Pipelined => run_pipelined(config, segmenter, &recordings, workers)?,
    };

    let mut records = Vec::new();
    let mut failures = Vec::new();
    for (recording, outcome) in recordings.iter().zip(outcomes) {
        match outcome {
            Ok(result) => {
                info!(
                    "Recording {} ({}): {}/{} correct, accuracy {:.3}",
                    recording.id,
                    recording.xdf_file_path,
                    result.total_correct,
                    result.total_trials_tested,
                    result.accuracy
                );
                records.push(ResultRecord {
                    recording_id: recording.id,
                    results: serde_json::to_value(&result)?,
                    notes: None,
                    meta: None,
                });
            }
            Err(failure) => {
                warn!(
                    "Recording {} ({}) failed during {}: {}",
                    failure.recording_id, failure.file, failure.stage, failure.error
                );
                failures.push(failure);
            }
        }
    }

    let persisted = store.save_results(parameters.id, &records)?;
    info!(
        "Inserted new {} results. Updated {} results",
        persisted.inserted, persisted.updated
    );
    if !failures.is_empty() {
        warn!("{} of {} recordings failed", failures.len(), recordings.len());
    }

    Ok(RunSummary {
        parameters_id: parameters.id,
        parameters_created: created,
        selected: recordings.len(),
        inserted: persisted.inserted,
        updated: persisted.updated,
        failures,
    })
}

fn build_pool(workers: usize) -> Result<ThreadPool> {
    Ok(ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("ssvep-worker-{i}"))
        .build()?)
}

/// Segments every recording, then classifies the ones that segmented, with a
/// full barrier in between. Each phase gets its own pool.
fn run_two_phase(
    config: &RunConfig,
    segmenter: &dyn Segmenter,
    recordings: &[Recording],
    workers: usize,
) -> Result<Vec<Outcome>> {
    info!(
        "Submit {} recordings for segmentation on {} workers",
        recordings.len(),
        workers
    );
    let segmented: Vec<std::result::Result<(), RecordingFailure>> = {
        let pool = build_pool(workers)?;
        pool.install(|| {
            recordings
                .par_iter()
                .map(|recording| segment_recording(config, segmenter, recording))
                .collect()
        })
    };
    info!("Segmentation finished, output saved into {:?}", config.temp_dir);

    let pool = build_pool(workers)?;
    info!("Classifying {} recordings", recordings.len());
    let outcomes = pool.install(|| {
        recordings
            .par_iter()
            .zip(segmented)
            .map(|(recording, segmented)| {
                segmented?;
                classify_recording(config, recording)
            })
            .collect()
    });
    info!("Classification finished");
    Ok(outcomes)
}

/// Each task segments and then classifies one recording.
fn run_pipelined(
    config: &RunConfig,
    segmenter: &dyn Segmenter,
    recordings: &[Recording],
    workers: usize,
) -> Result<Vec<Outcome>> {
    info!(
        "Submit {} recordings for segmentation and classification on {} workers",
        recordings.len(),
        workers
    );
    let pool = build_pool(workers)?;
    let outcomes = pool.install(|| {
        recordings
            .par_iter()
            .map(|recording| {
                segment_recording(config, segmenter, recording)?;
                classify_recording(config, recording)
            })
            .collect()
    });
    info!("Processing finished for {} recordings", recordings.len());
    Ok(outcomes)
}

/// Output directory for a recording's trial CSVs.
pub fn output_dir(config: &RunConfig, recording: &Recording) -> PathBuf {
    config.temp_dir.join(recording.folder_name())
}

pub fn segmentation_request(config: &RunConfig, recording: &Recording) -> SegmentationRequest {
    SegmentationRequest {
        source_file: config.recordings_dir.join(&recording.xdf_file_path),
        frequencies: config.parameters.frequencies.clone(),
        time_window: config.parameters.segment_time_limits,
        output_dir: output_dir(config, recording),
    }
}

fn segment_recording(
    config: &RunConfig,
    segmenter: &dyn Segmenter,
    recording: &Recording,
) -> std::result::Result<(), RecordingFailure> {
    segmenter
        .segment(&segmentation_request(config, recording))
        .map_err(|e| failure(recording, Stage::Segmentation, e))
}

fn classify_recording(config: &RunConfig, recording: &Recording) -> Outcome {
    let frequencies = &config.parameters.frequencies;
    TrialSet::load(&output_dir(config, recording), frequencies)
        .and_then(|trials| classify(&trials, frequencies))
        .map_err(|e| failure(recording, Stage::Classification, e))
}

fn failure(recording: &Recording, stage: Stage, error: crate::error::Error) -> RecordingFailure {
    RecordingFailure {
        recording_id: recording.id,
        file: recording.xdf_file_path.clone(),
        stage,
        error: error.to_string(),
    }
}
