//! Models, optimizers, and trainers for both pipelines.

/// Adam optimizer state shared by both trainers.
pub mod adam;
/// Convolutional digit classifier.
pub mod convnet;
/// Evaluation metrics for the classifier.
pub mod metrics;
/// Dense regression model and trainer.
pub mod regression;

use thiserror::Error;

/// A tensor or buffer did not match the model's expected dimensionality.
///
/// Fatal for the call that raised it; orchestrator state is untouched.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// An input buffer had the wrong length.
    #[error("input of length {got} does not match expected {expected}")]
    InputLen { expected: usize, got: usize },
    /// Inputs and targets disagree in row count.
    #[error("inputs have {inputs} rows but targets have {targets}")]
    RowMismatch { inputs: usize, targets: usize },
    /// A `[n, 1]` column tensor was expected.
    #[error("expected an [n, 1] column tensor, got [{rows}, {cols}]")]
    NotColumn { rows: usize, cols: usize },
    /// A raw canvas buffer was not a 28x28 image with 1 to 4 channels.
    #[error("raw buffer of {got} bytes is not a 28x28 image with 1-4 channels")]
    CanvasLen { got: usize },
}

/// Errors raised inside an epoch of training.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// A full pass over zero examples is meaningless.
    #[error("training dataset is empty")]
    EmptyDataset,
}

/// Errors surfaced by a trainer's top-level fit/train call.
#[derive(Debug, Error)]
pub enum FitError {
    /// Pre-flight shape validation failed; nothing was trained.
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// The orchestrated run was rejected or failed mid-run.
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),
}
