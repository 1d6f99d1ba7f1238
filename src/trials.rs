//! Per-frequency trial arrays read from the CSV files the segmentation
//! engine writes.
//!
//! Each frequency has one file, `<label>.csv` (or `<label>.csv.gz`), with a
//! header row and an index column that are both discarded. Every remaining
//! row is one time series: rows 0 and 1 are the calibration pair, rows 2+ are
//! the trials to classify.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use ndarray::{Array2, ArrayView1, Axis};
use tracing::debug;

use crate::error::{Error, Result};
use crate::params::Frequency;

const DELIMITER: u8 = b',';

/// Rows reserved for calibration at the top of every frequency file.
pub const CALIBRATION_ROWS: usize = 2;

/// One frequency's calibration pair and trials, shape `[rows, samples]`.
#[derive(Debug, Clone)]
pub struct FrequencyTrials {
    pub frequency: Frequency,
    data: Array2<f64>,
}

impl FrequencyTrials {
    pub fn new(frequency: Frequency, data: Array2<f64>) -> Result<Self> {
        if data.nrows() < CALIBRATION_ROWS {
            return Err(Error::TrialData {
                path: PathBuf::from(frequency.label()),
                reason: format!(
                    "expected at least {CALIBRATION_ROWS} calibration rows, found {}",
                    data.nrows()
                ),
            });
        }
        Ok(Self { frequency, data })
    }

    pub fn calibration(&self) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        (self.data.row(0), self.data.row(1))
    }

    /// Test trials in file order.
    pub fn trials(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> {
        self.data.axis_iter(Axis(0)).skip(CALIBRATION_ROWS)
    }

    pub fn trial_count(&self) -> usize {
        self.data.nrows() - CALIBRATION_ROWS
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }
}

/// All frequency groups of one recording, in configured frequency order.
#[derive(Debug, Clone)]
pub struct TrialSet {
    groups: Vec<FrequencyTrials>,
}

impl TrialSet {
    pub fn from_groups(groups: Vec<FrequencyTrials>) -> Self {
        Self { groups }
    }

    /// Loads `<label>.csv` (falling back to `<label>.csv.gz`) from `dir` for
    /// every frequency, preserving the order of `frequencies`.
    pub fn load(dir: &Path, frequencies: &[Frequency]) -> Result<Self> {
        let mut groups = Vec::with_capacity(frequencies.len());
        for &frequency in frequencies {
            let path = trial_file_path(dir, frequency);
            let data = read_trial_csv(&path)?;
            debug!(
                "Loaded {} rows x {} samples for {} from {:?}",
                data.nrows(),
                data.ncols(),
                frequency,
                path
            );
            let group = FrequencyTrials::new(frequency, data).map_err(|e| match e {
                Error::TrialData { reason, .. } => Error::TrialData { path: path.clone(), reason },
                other => other,
            })?;
            groups.push(group);
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[FrequencyTrials] {
        &self.groups
    }

    pub fn group(&self, frequency: Frequency) -> Option<&FrequencyTrials> {
        self.groups.iter().find(|g| g.frequency == frequency)
    }

    pub fn total_trials(&self) -> usize {
        self.groups.iter().map(FrequencyTrials::trial_count).sum()
    }
}

/// Path of the CSV for `frequency` in `dir`, preferring the uncompressed file.
pub fn trial_file_path(dir: &Path, frequency: Frequency) -> PathBuf {
    let plain = dir.join(format!("{}.csv", frequency.label()));
    if plain.exists() {
        return plain;
    }
    let gz = dir.join(format!("{}.csv.gz", frequency.label()));
    if gz.exists() {
        gz
    } else {
        plain
    }
}

/// Reads one frequency file into `[rows, samples]`, dropping the header row
/// and the index column.
pub fn read_trial_csv(path: &Path) -> Result<Array2<f64>> {
    let reader = get_file_reader(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut values = Vec::new();
    let mut rows = 0;
    let mut width = None;

    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let samples = record.len().saturating_sub(1);
        match width {
            None => width = Some(samples),
            Some(w) if w != samples => {
                return Err(Error::TrialData {
                    path: path.to_path_buf(),
                    reason: format!("row {row} has {samples} samples, expected {w}"),
                })
            }
            Some(_) => {}
        }
        for (column, cell) in record.iter().enumerate().skip(1) {
            let value = cell.parse::<f64>().map_err(|_| Error::TrialData {
                path: path.to_path_buf(),
                reason: format!("row {row}, column {column}: {cell:?} is not a number"),
            })?;
            values.push(value);
        }
        rows += 1;
    }

    let width = width.unwrap_or(0);
    Array2::from_shape_vec((rows, width), values).map_err(|e| Error::TrialData {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Helper function to get a reader for the file, whether it's gzipped or not.
fn get_file_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| Error::TrialData {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::array;
    use std::io::Write;

    const CSV: &str = ",0,1,2,3\n0,1.0,2.0,3.0,4.0\n1,2.0,4.0,6.0,8.5\n2,0.5, 0.25 ,1.0,0.0\n";

    #[test]
    fn drops_header_and_index_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("9hz.csv");
        std::fs::write(&path, CSV).unwrap();

        let data = read_trial_csv(&path).unwrap();
        assert_eq!(data.dim(), (3, 4));
        assert_eq!(data.row(0), array![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(data.row(2), array![0.5, 0.25, 1.0, 0.0]);
    }

    #[test]
    fn reads_gzipped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("16hz.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(CSV.as_bytes()).unwrap();
        encoder.finish().unwrap();

        assert_eq!(trial_file_path(dir.path(), Frequency(16)), path);
        let set = TrialSet::load(dir.path(), &[Frequency(16)]).unwrap();
        assert_eq!(set.total_trials(), 1);
        assert_eq!(set.groups()[0].samples(), 4);
    }

    #[test]
    fn splits_calibration_and_trials() {
        let data = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];
        let group = FrequencyTrials::new(Frequency(13), data).unwrap();
        let (c1, c2) = group.calibration();
        assert_eq!(c1, array![1.0, 2.0]);
        assert_eq!(c2, array![3.0, 4.0]);
        let trials: Vec<_> = group.trials().map(|t| t.to_vec()).collect();
        assert_eq!(trials, vec![vec![5.0, 6.0], vec![7.0, 8.0]]);
        assert_eq!(group.trial_count(), 2);
    }

    #[test]
    fn calibration_only_group_has_no_trials() {
        let group = FrequencyTrials::new(Frequency(9), array![[1.0, 2.0], [2.0, 1.0]]).unwrap();
        assert_eq!(group.trials().count(), 0);
    }

    #[test]
    fn rejects_missing_calibration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("9hz.csv"), ",0,1\n0,1.0,2.0\n").unwrap();
        let err = TrialSet::load(dir.path(), &[Frequency(9)]).unwrap_err();
        match err {
            Error::TrialData { path, .. } => assert!(path.ends_with("9hz.csv")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_non_numeric_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("9hz.csv");
        std::fs::write(&path, ",0,1\n0,1.0,abc\n1,1.0,2.0\n").unwrap();
        assert!(matches!(read_trial_csv(&path), Err(Error::TrialData { .. })));
    }

    #[test]
    fn rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("16hz.csv");
        std::fs::write(&path, ",0,1,2\n0,1.0,2.0,3.0\n1,1.0,2.0\n").unwrap();
        match read_trial_csv(&path) {
            Err(Error::TrialData { reason, .. }) => assert!(reason.contains("row 1 has 2 samples, expected 3")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrialSet::load(dir.path(), &[Frequency(13)]).unwrap_err();
        match err {
            Error::TrialData { path, .. } => assert!(path.ends_with("13hz.csv")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
