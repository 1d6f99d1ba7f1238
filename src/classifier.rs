//! CCA-based SSVEP trial classification for one recording.
//!
//! Every trial is scored against each candidate frequency's two calibration
//! series; the candidate with the highest averaged score is the guess. Ties
//! go to the candidate listed first.
use ndarray::ArrayView1;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::cca::canonical_correlation;
use crate::error::{Error, Result};
use crate::params::{Frequency, LabeledFrequency};
use crate::trials::TrialSet;

/// Averaged scores for one trial, in candidate order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap(pub Vec<(Frequency, f64)>);

impl ScoreMap {
    /// First candidate holding the maximum score. NaN scores never win.
    pub fn argmax(&self) -> Option<Frequency> {
        let mut best: Option<(Frequency, f64)> = None;
        for &(frequency, score) in &self.0 {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((frequency, score)),
            }
        }
        best.map(|(frequency, _)| frequency)
    }

    pub fn get(&self, frequency: Frequency) -> Option<f64> {
        self.0.iter().find(|(f, _)| *f == frequency).map(|(_, s)| *s)
    }
}

impl Serialize for ScoreMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (frequency, score) in &self.0 {
            map.serialize_entry(&frequency.label(), score)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCalculation {
    #[serde(serialize_with = "as_label")]
    pub target_frequency: Frequency,
    pub calculations_results: ScoreMap,
    #[serde(serialize_with = "as_label")]
    pub guessed_frequency: Frequency,
    pub is_correct: u8,
}

/// Result payload persisted for one recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingResult {
    pub calculations: Vec<TrialCalculation>,
    pub total_trials_tested: usize,
    pub total_correct: usize,
    pub accuracy: f64,
}

fn as_label<S: Serializer>(frequency: &Frequency, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    LabeledFrequency(*frequency).serialize(serializer)
}

/// Average of the CCA scores of `trial` against both calibration series.
pub fn averaged_score(
    calibration: (ArrayView1<f64>, ArrayView1<f64>),
    trial: ArrayView1<f64>,
) -> Result<f64> {
    let first = canonical_correlation(calibration.0, trial)?;
    let second = canonical_correlation(calibration.1, trial)?;
    Ok((first + second) / 2.0)
}

/// Scores one trial against every candidate frequency.
pub fn score_trial(trials: &TrialSet, candidates: &[Frequency], trial: ArrayView1<f64>) -> Result<ScoreMap> {
    let mut scores = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        let group = trials
            .group(candidate)
            .ok_or(Error::MissingFrequency(candidate))?;
        scores.push((candidate, averaged_score(group.calibration(), trial)?));
    }
    Ok(ScoreMap(scores))
}

/// Classifies every trial of `trials` against `candidates`.
pub fn classify(trials: &TrialSet, candidates: &[Frequency]) -> Result<RecordingResult> {
    let mut calculations = Vec::with_capacity(trials.total_trials());

    for group in trials.groups() {
        for trial in group.trials() {
            let scores = score_trial(trials, candidates, trial)?;
            let guessed = scores
                .argmax()
                .ok_or_else(|| Error::InvalidParameters("no candidate frequencies".into()))?;
            debug!("target {} guessed {} scores {:?}", group.frequency, guessed, scores.0);
            calculations.push(TrialCalculation {
                target_frequency: group.frequency,
                calculations_results: scores,
                guessed_frequency: guessed,
                is_correct: u8::from(guessed == group.frequency),
            });
        }
    }

    summarize(calculations)
}

/// Aggregates per-trial outcomes. Fails when there is nothing to divide by.
pub fn summarize(calculations: Vec<TrialCalculation>) -> Result<RecordingResult> {
    let total_trials_tested = calculations.len();
    if total_trials_tested == 0 {
        return Err(Error::NoTrialsTested);
    }
    let total_correct = calculations.iter().map(|c| usize::from(c.is_correct)).sum();
    Ok(RecordingResult {
        calculations,
        total_trials_tested,
        total_correct,
        accuracy: total_correct as f64 / total_trials_tested as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trials::FrequencyTrials;
    use ndarray::{Array1, Array2};

    const FS: f64 = 250.0;
    const SAMPLES: usize = 300;

    fn sine(freq: f64, phase: f64) -> Array1<f64> {
        Array1::from_iter(
            (0..SAMPLES).map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / FS + phase).sin()),
        )
    }

    fn group(freq: u32, rows: &[Array1<f64>]) -> FrequencyTrials {
        let mut data = Array2::zeros((rows.len(), SAMPLES));
        for (i, row) in rows.iter().enumerate() {
            data.row_mut(i).assign(row);
        }
        FrequencyTrials::new(Frequency(freq), data).unwrap()
    }

    fn frequencies() -> Vec<Frequency> {
        vec![Frequency(9), Frequency(16), Frequency(13)]
    }

    fn reference_set(trials_per_freq: usize) -> TrialSet {
        let groups = frequencies()
            .into_iter()
            .map(|f| {
                let hz = f.0 as f64;
                let mut rows = vec![sine(hz, 0.0), sine(hz, 0.0)];
                rows.extend((0..trials_per_freq).map(|_| sine(hz, 0.0)));
                group(f.0, &rows)
            })
            .collect();
        TrialSet::from_groups(groups)
    }

    #[test]
    fn exact_copies_are_classified_correctly() {
        let result = classify(&reference_set(2), &frequencies()).unwrap();
        assert_eq!(result.total_trials_tested, 6);
        assert_eq!(result.total_correct, 6);
        assert_eq!(result.accuracy, 1.0);
        for calc in &result.calculations {
            assert_eq!(calc.guessed_frequency, calc.target_frequency);
            assert_eq!(calc.is_correct, 1);
            approx::assert_abs_diff_eq!(
                calc.calculations_results.get(calc.target_frequency).unwrap(),
                1.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn trials_follow_group_then_file_order() {
        let result = classify(&reference_set(2), &frequencies()).unwrap();
        let targets: Vec<u32> = result.calculations.iter().map(|c| c.target_frequency.0).collect();
        assert_eq!(targets, vec![9, 9, 16, 16, 13, 13]);
    }

    #[test]
    fn mislabeled_trial_counts_as_incorrect() {
        let nine = group(9, &[sine(9.0, 0.0), sine(9.0, 0.0), sine(16.0, 0.0)]);
        let sixteen = group(16, &[sine(16.0, 0.0), sine(16.0, 0.0), sine(16.0, 0.0)]);
        let set = TrialSet::from_groups(vec![nine, sixteen]);
        let result = classify(&set, &[Frequency(9), Frequency(16)]).unwrap();
        assert_eq!(result.total_trials_tested, 2);
        assert_eq!(result.total_correct, 1);
        assert_eq!(result.calculations[0].guessed_frequency, Frequency(16));
        assert_eq!(result.calculations[0].is_correct, 0);
        assert_eq!(result.accuracy, 0.5);
    }

    #[test]
    fn argmax_ties_go_to_first_candidate() {
        let scores = ScoreMap(vec![(Frequency(16), 0.7), (Frequency(9), 0.7), (Frequency(13), 0.2)]);
        assert_eq!(scores.argmax(), Some(Frequency(16)));
        let scores = ScoreMap(vec![(Frequency(13), 0.1), (Frequency(9), 0.9), (Frequency(16), 0.9)]);
        assert_eq!(scores.argmax(), Some(Frequency(9)));
        assert_eq!(ScoreMap(vec![]).argmax(), None);
    }

    #[test]
    fn argmax_skips_nan_scores() {
        let later = ScoreMap(vec![(Frequency(9), 0.4), (Frequency(16), f64::NAN), (Frequency(13), 0.2)]);
        assert_eq!(later.argmax(), Some(Frequency(9)));
        let first = ScoreMap(vec![(Frequency(9), f64::NAN), (Frequency(16), 0.1)]);
        assert_eq!(first.argmax(), Some(Frequency(16)));
        assert_eq!(ScoreMap(vec![(Frequency(9), f64::NAN)]).argmax(), None);
    }

    #[test]
    fn identical_calibrations_tie_and_first_wins() {
        // Both candidates share the same calibration signal, so every score ties.
        let shared = [sine(10.0, 0.0), sine(10.0, 0.4)];
        let a = group(9, &[shared[0].clone(), shared[1].clone(), sine(10.0, 0.2)]);
        let b = group(16, &[shared[0].clone(), shared[1].clone(), sine(10.0, 0.2)]);
        let set = TrialSet::from_groups(vec![a, b]);

        let result = classify(&set, &[Frequency(16), Frequency(9)]).unwrap();
        assert!(result.calculations.iter().all(|c| c.guessed_frequency == Frequency(16)));
        assert_eq!(result.total_correct, 1);
    }

    #[test]
    fn zero_trials_is_an_error() {
        let err = classify(&reference_set(0), &frequencies()).unwrap_err();
        assert!(matches!(err, Error::NoTrialsTested));
    }

    #[test]
    fn unknown_candidate_is_an_error() {
        let err = classify(&reference_set(1), &[Frequency(9), Frequency(20)]).unwrap_err();
        assert!(matches!(err, Error::MissingFrequency(Frequency(20))));
    }

    #[test]
    fn payload_uses_labels_and_candidate_order() {
        let result = classify(&reference_set(1), &frequencies()).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"targetFrequency\":\"9hz\""));
        assert!(json.contains("\"guessedFrequency\":\"9hz\""));
        assert!(json.contains("\"isCorrect\":1"));
        assert!(json.contains("\"total_trials_tested\":3"));
        let first = json.find("\"9hz\":").unwrap();
        let second = json.find("\"16hz\":").unwrap();
        let third = json.find("\"13hz\":").unwrap();
        assert!(first < second && second < third);
    }
}
