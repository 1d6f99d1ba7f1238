//! Run parameters, stimulus frequencies and the recording filter derived from them.
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Largest difference at which a recording's duration still matches.
pub const DURATION_TOLERANCE: f64 = 1e-9;

/// A stimulus frequency in whole Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency(pub u32);

impl Frequency {
    /// Label used for CSV file names and result keys, e.g. `9hz`.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hz", self.0)
    }
}

/// Serializes a frequency by its label instead of its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledFrequency(pub Frequency);

impl Serialize for LabeledFrequency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Configuration of one evaluation run. Rows in the store are deduplicated
/// on the canonical JSON form of this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessParameters {
    pub method: String,
    pub frequencies: Vec<Frequency>,
    pub segment_time_limits: [f64; 2],
    pub trial_sequence: Vec<Frequency>,
}

impl Default for ProcessParameters {
    fn default() -> Self {
        let frequencies = vec![Frequency(9), Frequency(16), Frequency(13)];
        let trial_sequence = frequencies.iter().copied().cycle().take(frequencies.len() * 8).collect();
        Self {
            method: "CCA n_components=1, first 2 vs rest averaged, preprocessing in Neuropype".to_string(),
            frequencies,
            segment_time_limits: [0.14, 6.0],
            trial_sequence,
        }
    }
}

impl ProcessParameters {
    pub fn validate(&self) -> Result<()> {
        if self.frequencies.is_empty() {
            return Err(Error::InvalidParameters("frequency set is empty".into()));
        }
        let mut seen = HashSet::new();
        for f in &self.frequencies {
            if !seen.insert(*f) {
                return Err(Error::InvalidParameters(format!("frequency {f} listed twice")));
            }
        }
        let [min, max] = self.segment_time_limits;
        if !(min.is_finite() && max.is_finite() && min >= 0.0 && min < max) {
            return Err(Error::InvalidParameters(format!(
                "segment time limits [{min}, {max}] are not an increasing non-negative window"
            )));
        }
        if let Some(f) = self.trial_sequence.iter().find(|f| !seen.contains(*f)) {
            return Err(Error::InvalidParameters(format!(
                "trial sequence contains {f}, which is not a configured frequency"
            )));
        }
        Ok(())
    }

    /// Canonical JSON text (sorted keys) used for structural comparison.
    pub fn canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&value)?)
    }
}

/// Selects the recordings a run applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingFilter {
    pub duration_s: f64,
    pub frequencies: Vec<Frequency>,
}

impl RecordingFilter {
    pub fn new(parameters: &ProcessParameters, duration_s: f64) -> Self {
        Self {
            duration_s,
            frequencies: parameters.frequencies.clone(),
        }
    }

    /// Whether a recording's parameter bag matches. `frequencies` may hold
    /// numbers or numeric strings and must match in order.
    pub fn matches(&self, recording_parameters: &Value) -> bool {
        let duration_ok = recording_parameters
            .get("duration_s")
            .and_then(Value::as_f64)
            .is_some_and(|d| (d - self.duration_s).abs() < DURATION_TOLERANCE);
        if !duration_ok {
            return false;
        }
        let Some(list) = recording_parameters.get("frequencies").and_then(Value::as_array) else {
            return false;
        };
        list.len() == self.frequencies.len()
            && list
                .iter()
                .zip(&self.frequencies)
                .all(|(v, f)| parse_frequency(v) == Some(*f))
    }
}

fn parse_frequency(v: &Value) -> Option<Frequency> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(Frequency),
        Value::String(s) => s.trim().parse().ok().map(Frequency),
        _ => None,
    }
}
