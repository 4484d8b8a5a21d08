//! Min-max normalization for the tabular pipeline.
//!
//! Records are shuffled in place, split into paired feature/target columns,
//! and rescaled to `[0, 1]` with `(x - min) / (max - min)`. The bounds are
//! returned alongside the tensors because the prediction layer needs them
//! later to invert the mapping; they must be the *training* bounds, never
//! recomputed.

use ndarray::Array2;
use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;

use super::cars::CarRecord;

/// Errors raised while normalizing a dataset snapshot.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Normalization over zero records is meaningless.
    #[error("dataset is empty")]
    Empty,
    /// A column whose min equals its max cannot be rescaled: the
    /// denominator is zero and the mapping has no inverse. Constant
    /// datasets are rejected instead of silently emitting zeros.
    #[error("column {column} is degenerate: min == max == {value}")]
    DegenerateColumn { column: &'static str, value: f64 },
}

/// Per-column min/max retained for inverse mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub feature_min: f64,
    pub feature_max: f64,
    pub target_min: f64,
    pub target_max: f64,
}

impl Bounds {
    /// Map a raw feature value into normalized `[0, 1]` space.
    pub fn normalize_feature(&self, value: f64) -> f64 {
        (value - self.feature_min) / (self.feature_max - self.feature_min)
    }

    /// Map a normalized feature value back to original units.
    pub fn denormalize_feature(&self, value: f64) -> f64 {
        value * (self.feature_max - self.feature_min) + self.feature_min
    }

    /// Map a normalized target value back to original units.
    pub fn denormalize_target(&self, value: f64) -> f64 {
        value * (self.target_max - self.target_min) + self.target_min
    }
}

/// Normalized `[n, 1]` tensors plus the bounds that produced them.
#[derive(Debug, Clone)]
pub struct NormalizedData {
    /// Feature column, shape `[n, 1]`, values in `[0, 1]`.
    pub inputs: Array2<f32>,
    /// Target column, shape `[n, 1]`, values in `[0, 1]`.
    pub targets: Array2<f32>,
    /// Bounds for inverse mapping; outlive the normalization call.
    pub bounds: Bounds,
}

/// Shuffle `records` in place and produce normalized paired tensors.
///
/// The shuffle is uniform and unseeded; determinism is a non-goal. Pairing
/// is preserved: index `i` of the inputs and targets always refers to the
/// same record.
pub fn normalize_records(records: &mut [CarRecord]) -> Result<NormalizedData, NormalizeError> {
    if records.is_empty() {
        return Err(NormalizeError::Empty);
    }
    records.shuffle(&mut rand::rng());

    let (feature_min, feature_max) = column_bounds(records.iter().map(|r| r.horsepower));
    let (target_min, target_max) = column_bounds(records.iter().map(|r| r.mpg));
    if feature_max == feature_min {
        return Err(NormalizeError::DegenerateColumn {
            column: "feature",
            value: feature_min,
        });
    }
    if target_max == target_min {
        return Err(NormalizeError::DegenerateColumn {
            column: "target",
            value: target_min,
        });
    }

    let bounds = Bounds {
        feature_min,
        feature_max,
        target_min,
        target_max,
    };
    let n = records.len();
    let inputs = Array2::from_shape_fn((n, 1), |(i, _)| {
        bounds.normalize_feature(records[i].horsepower) as f32
    });
    let targets = Array2::from_shape_fn((n, 1), |(i, _)| {
        ((records[i].mpg - target_min) / (target_max - target_min)) as f32
    });

    Ok(NormalizedData {
        inputs,
        targets,
        bounds,
    })
}

fn column_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    })
}
