//! Dense regression pipeline: a small feed-forward model fit against
//! normalized `[n, 1]` tensors with MSE and Adam.

mod model;
mod train;

pub use model::{Activation, Dense, RegressionModel};
pub use train::{FitOptions, fit};
