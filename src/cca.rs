//! Rank-1 canonical correlation between two single-variable sequences.
//!
//! Each sequence is treated as a one-feature column. Both are centered and
//! scaled to unit sample standard deviation, projected onto their first
//! canonical weight, and scored by the Pearson correlation of the two
//! projections. With one feature per side the canonical weights are `±1`, so
//! the score equals `|pearson(x, y)|`.
use ndarray::{Array1, ArrayView1};

use crate::error::{NumericError, Result};

/// Relative tolerance below which a standard deviation counts as zero.
const VARIANCE_EPSILON: f64 = 1e-12;

/// Canonical correlation of `x` and `y`, in `[-1, 1]`.
pub fn canonical_correlation(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<f64> {
    Ok(CanonicalFit::fit(x, y)?.score(x, y))
}

/// Standardization and first-component weights learned from one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFit {
    pub x_mean: f64,
    pub x_scale: f64,
    pub y_mean: f64,
    pub y_scale: f64,
    pub x_weight: f64,
    pub y_weight: f64,
}

impl CanonicalFit {
    pub fn fit(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(NumericError::LengthMismatch {
                left: x.len(),
                right: y.len(),
            }
            .into());
        }
        if x.len() < 2 {
            return Err(NumericError::TooFewSamples(x.len()).into());
        }

        let (x_mean, x_scale) = moments(x, "first")?;
        let (y_mean, y_scale) = moments(y, "second")?;

        let cross: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(a, b)| ((a - x_mean) / x_scale) * ((b - y_mean) / y_scale))
            .sum();

        // X weight is sign-normalised to +1; Y follows the sign of the covariance.
        let y_weight = if cross < 0.0 { -1.0 } else { 1.0 };

        Ok(Self {
            x_mean,
            x_scale,
            y_mean,
            y_scale,
            x_weight: 1.0,
            y_weight,
        })
    }

    /// Project both sequences onto the fitted canonical component.
    pub fn transform(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
        let x_c = x.mapv(|v| (v - self.x_mean) / self.x_scale * self.x_weight);
        let y_c = y.mapv(|v| (v - self.y_mean) / self.y_scale * self.y_weight);
        (x_c, y_c)
    }

    /// Correlation of the projected pair.
    pub fn score(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let (x_c, y_c) = self.transform(x, y);
        pearson(x_c.view(), y_c.view())
    }
}

fn moments(v: ArrayView1<f64>, which: &'static str) -> Result<(f64, f64)> {
    if v.iter().any(|s| !s.is_finite()) {
        return Err(NumericError::NonFinite(which).into());
    }
    let n = v.len() as f64;
    let mean = v.sum() / n;
    let var = v.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std <= VARIANCE_EPSILON * (1.0 + mean.abs()) {
        return Err(NumericError::ZeroVariance(which).into());
    }
    Ok((mean, std))
}

fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    let ma = a.sum() / n;
    let mb = b.sum() / n;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - ma;
        let dy = y - mb;
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    (cov / (va * vb).sqrt()).clamp(-1.0, 1.0)
}
