//! Training and inference pipeline behind an interactive ML demo.
//!
//! Two pipelines share one shape: raw ingestion, normalization or encoding,
//! batched training with per-epoch observation hooks, then decoded
//! predictions for a hosting UI to display.

/// Dataset ingestion: tabular records, normalization, digit corpus.
pub mod dataset;
/// Models, optimizers, and trainers.
pub mod ml;
/// Prediction and decoding back to original units or class labels.
pub mod predict;
/// The training orchestrator (`TrainingSession`).
pub mod session;

/// Logging setup for hosts that want the crate's tracing output.
pub mod logging;

mod http_client;
