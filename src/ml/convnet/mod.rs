//! Convolutional digit classifier: fixed conv/pool/dense architecture,
//! categorical cross-entropy with Adam, and held-out evaluation.

mod model;
mod train;

pub use model::ConvNet;
pub use train::{TrainOptions, evaluate, train};
