//! Mini-batch MSE training for the regression model.

use ndarray::Array2;
use rand::seq::SliceRandom;
use tracing::info;

use crate::ml::adam::{self, Adam};
use crate::ml::{FitError, ShapeError, TrainError};
use crate::session::{EpochMetrics, EpochObserver, EpochRunner, RunSummary, TrainingSession};

use super::model::{Dense, RegressionModel};

/// Options for [`fit`], all with demo-friendly defaults.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// Full passes over the data.
    pub epochs: usize,
    /// Examples per optimizer step; the final chunk of a pass may be short.
    pub batch_size: usize,
    pub learning_rate: f32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: adam::DEFAULT_LEARNING_RATE,
        }
    }
}

/// Fit `model` against normalized `[n, 1]` tensors.
///
/// Each pass reshuffles the example order. The observer fires synchronously
/// after every epoch, in order, through `session`; shape problems are
/// rejected before any training happens.
pub fn fit(
    model: &mut RegressionModel,
    inputs: &Array2<f32>,
    targets: &Array2<f32>,
    options: &FitOptions,
    session: &TrainingSession,
    observer: &mut dyn EpochObserver,
) -> Result<RunSummary, FitError> {
    if inputs.ncols() != 1 {
        return Err(ShapeError::NotColumn {
            rows: inputs.nrows(),
            cols: inputs.ncols(),
        }
        .into());
    }
    if targets.ncols() != 1 {
        return Err(ShapeError::NotColumn {
            rows: targets.nrows(),
            cols: targets.ncols(),
        }
        .into());
    }
    if inputs.nrows() != targets.nrows() {
        return Err(ShapeError::RowMismatch {
            inputs: inputs.nrows(),
            targets: targets.nrows(),
        }
        .into());
    }

    let mut runner = RegressionEpochs::new(model, inputs, targets, options);
    let summary = session.run(options.epochs, &mut runner, observer)?;
    if let Some(report) = summary.final_report {
        info!(
            epochs = summary.epochs,
            loss = report.loss,
            "Regression fit finished"
        );
    }
    Ok(summary)
}

/// Gradient accumulators matching one dense layer.
struct LayerGrads {
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl LayerGrads {
    fn zeroed_for(layer: &Dense) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }

    fn reset(&mut self) {
        self.weights.fill(0.0);
        self.biases.fill(0.0);
    }
}

struct RegressionEpochs<'a> {
    model: &'a mut RegressionModel,
    inputs: Vec<f32>,
    targets: Vec<f32>,
    batch_size: usize,
    indices: Vec<usize>,
    // One (weights, biases) optimizer pair per layer.
    optimizers: Vec<(Adam, Adam)>,
}

impl<'a> RegressionEpochs<'a> {
    fn new(
        model: &'a mut RegressionModel,
        inputs: &Array2<f32>,
        targets: &Array2<f32>,
        options: &FitOptions,
    ) -> Self {
        let optimizers = model
            .layers
            .iter()
            .map(|layer| {
                (
                    Adam::new(layer.weights.len(), options.learning_rate),
                    Adam::new(layer.biases.len(), options.learning_rate),
                )
            })
            .collect();
        let n = inputs.nrows();
        Self {
            model,
            inputs: inputs.column(0).to_vec(),
            targets: targets.column(0).to_vec(),
            batch_size: options.batch_size.max(1),
            indices: (0..n).collect(),
            optimizers,
        }
    }
}

impl EpochRunner for RegressionEpochs<'_> {
    fn run_epoch(&mut self, _epoch: usize) -> Result<EpochMetrics, TrainError> {
        if self.inputs.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        self.indices.shuffle(&mut rand::rng());

        let mut grads: Vec<LayerGrads> = self
            .model
            .layers
            .iter()
            .map(LayerGrads::zeroed_for)
            .collect();
        let mut squared_error = 0.0f64;

        for batch in self.indices.chunks(self.batch_size) {
            for grad in &mut grads {
                grad.reset();
            }
            for &idx in batch {
                let activations = forward_cached(self.model, self.inputs[idx]);
                let prediction = activations.last().map_or(0.0, |a| a[0]);
                let error = prediction - self.targets[idx];
                squared_error += f64::from(error * error);
                // d(mean squared error)/d(prediction), averaged per batch.
                let upstream = vec![2.0 * error / batch.len() as f32];
                backward(self.model, &activations, upstream, &mut grads);
            }
            for (layer, ((w_opt, b_opt), grad)) in self
                .model
                .layers
                .iter_mut()
                .zip(self.optimizers.iter_mut().zip(grads.iter()))
            {
                w_opt.step(&mut layer.weights, &grad.weights);
                b_opt.step(&mut layer.biases, &grad.biases);
            }
        }

        Ok(EpochMetrics {
            loss: (squared_error / self.inputs.len() as f64) as f32,
            accuracy: None,
        })
    }
}

/// Forward pass retaining every layer's output; index 0 is the input.
fn forward_cached(model: &RegressionModel, x: f32) -> Vec<Vec<f32>> {
    let mut activations = Vec::with_capacity(model.layers.len() + 1);
    activations.push(vec![x]);
    for layer in &model.layers {
        let next = layer.forward(activations.last().map_or(&[][..], |a| a.as_slice()));
        activations.push(next);
    }
    activations
}

/// Accumulate gradients for one example, walking the layers backwards.
///
/// `upstream` enters as dL/d(output of the last layer).
fn backward(
    model: &RegressionModel,
    activations: &[Vec<f32>],
    mut upstream: Vec<f32>,
    grads: &mut [LayerGrads],
) {
    for (l, layer) in model.layers.iter().enumerate().rev() {
        let output = &activations[l + 1];
        let input = &activations[l];
        let mut downstream = vec![0.0f32; layer.in_dim];
        for o in 0..layer.out_dim {
            let delta = upstream[o] * layer.activation.derivative_from_output(output[o]);
            grads[l].biases[o] += delta;
            let base = o * layer.in_dim;
            for i in 0..layer.in_dim {
                grads[l].weights[base + i] += delta * input[i];
                downstream[i] += delta * layer.weights[base + i];
            }
        }
        upstream = downstream;
    }
}
