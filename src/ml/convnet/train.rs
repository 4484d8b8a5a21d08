//! Batched cross-entropy training for the convolutional classifier.
//!
//! Training batches are sampled from the train partition; the validation
//! accuracy reported per epoch comes from batches drawn from the dedicated
//! test partition, never from training data.

use ndarray::Axis;
use tracing::info;

use crate::dataset::digits::{DigitBatches, NUM_CLASSES};
use crate::ml::adam::{self, Adam};
use crate::ml::metrics::ConfusionMatrix;
use crate::ml::{FitError, TrainError};
use crate::session::{EpochMetrics, EpochObserver, EpochRunner, RunSummary, TrainingSession};

use super::model::{
    CONV1_FILTERS, CONV1_WIDTH, CONV2_FILTERS, CONV2_WIDTH, ConvLayer, ConvNet, FLAT_LEN, KERNEL,
    POOL1_WIDTH, argmax,
};
use crate::dataset::digits::IMAGE_WIDTH;

/// Options for [`train`], all with demo-friendly defaults.
#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    /// Full passes over the train partition.
    pub epochs: usize,
    /// Examples per optimizer step.
    pub batch_size: usize,
    pub learning_rate: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 512,
            learning_rate: adam::DEFAULT_LEARNING_RATE,
        }
    }
}

/// Train `model` against batches drawn from `batches`.
///
/// Each epoch runs `ceil(train_size / batch_size)` steps. Per-epoch loss
/// and validation accuracy are delivered through `session` to `observer`.
pub fn train(
    model: &mut ConvNet,
    batches: &DigitBatches<'_>,
    options: &TrainOptions,
    session: &TrainingSession,
    observer: &mut dyn EpochObserver,
) -> Result<RunSummary, FitError> {
    let mut runner = ConvEpochs::new(model, batches, options);
    let summary = session.run(options.epochs, &mut runner, observer)?;
    if let Some(report) = summary.final_report {
        info!(
            epochs = summary.epochs,
            loss = report.loss,
            accuracy = report.accuracy,
            "Classifier training finished"
        );
    }
    Ok(summary)
}

/// Run the whole test partition through `model` and tally a confusion
/// matrix; `matrix.accuracy()` gives the held-out accuracy.
pub fn evaluate(model: &ConvNet, batches: &DigitBatches<'_>) -> ConfusionMatrix {
    let mut matrix = ConfusionMatrix::new(NUM_CLASSES);
    for (image, truth) in batches.test_examples() {
        let pass = model.forward(image);
        matrix.add(truth as usize, argmax(&pass.probs));
    }
    matrix
}

/// Gradient accumulators matching the model's parameter buffers.
struct ConvNetGrads {
    conv1_w: Vec<f32>,
    conv1_b: Vec<f32>,
    conv2_w: Vec<f32>,
    conv2_b: Vec<f32>,
    fc_w: Vec<f32>,
    fc_b: Vec<f32>,
}

impl ConvNetGrads {
    fn zeroed_for(model: &ConvNet) -> Self {
        Self {
            conv1_w: vec![0.0; model.conv1.weights.len()],
            conv1_b: vec![0.0; model.conv1.biases.len()],
            conv2_w: vec![0.0; model.conv2.weights.len()],
            conv2_b: vec![0.0; model.conv2.biases.len()],
            fc_w: vec![0.0; model.fc_weights.len()],
            fc_b: vec![0.0; model.fc_biases.len()],
        }
    }

    fn reset(&mut self) {
        self.conv1_w.fill(0.0);
        self.conv1_b.fill(0.0);
        self.conv2_w.fill(0.0);
        self.conv2_b.fill(0.0);
        self.fc_w.fill(0.0);
        self.fc_b.fill(0.0);
    }
}

struct ConvEpochs<'a, 'c> {
    model: &'a mut ConvNet,
    batches: &'a DigitBatches<'c>,
    batch_size: usize,
    steps_per_epoch: usize,
    grads: ConvNetGrads,
    optimizers: ConvNetOptimizers,
}

struct ConvNetOptimizers {
    conv1_w: Adam,
    conv1_b: Adam,
    conv2_w: Adam,
    conv2_b: Adam,
    fc_w: Adam,
    fc_b: Adam,
}

impl<'a, 'c> ConvEpochs<'a, 'c> {
    fn new(model: &'a mut ConvNet, batches: &'a DigitBatches<'c>, options: &TrainOptions) -> Self {
        let batch_size = options.batch_size.max(1);
        let train_len = batches.train_indices().len();
        let lr = options.learning_rate;
        let optimizers = ConvNetOptimizers {
            conv1_w: Adam::new(model.conv1.weights.len(), lr),
            conv1_b: Adam::new(model.conv1.biases.len(), lr),
            conv2_w: Adam::new(model.conv2.weights.len(), lr),
            conv2_b: Adam::new(model.conv2.biases.len(), lr),
            fc_w: Adam::new(model.fc_weights.len(), lr),
            fc_b: Adam::new(model.fc_biases.len(), lr),
        };
        let grads = ConvNetGrads::zeroed_for(model);
        Self {
            model,
            batches,
            batch_size,
            steps_per_epoch: train_len.div_ceil(batch_size).max(1),
            grads,
            optimizers,
        }
    }
}

impl EpochRunner for ConvEpochs<'_, '_> {
    fn run_epoch(&mut self, _epoch: usize) -> Result<EpochMetrics, TrainError> {
        if self.batches.train_indices().is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        let mut loss_sum = 0.0f64;
        let mut examples = 0usize;
        let mut val_correct = 0usize;
        let mut val_total = 0usize;

        for _step in 0..self.steps_per_epoch {
            let batch = self.batches.next_train_batch(self.batch_size);
            if batch.is_empty() {
                continue;
            }
            self.grads.reset();
            let scale = 1.0 / batch.len() as f32;
            for (image_view, label_row) in batch
                .images
                .axis_iter(Axis(0))
                .zip(batch.labels.axis_iter(Axis(0)))
            {
                let image: Vec<f32> = image_view.iter().copied().collect();
                let target = argmax(&label_row.iter().copied().collect::<Vec<f32>>());
                let pass = self.model.forward(&image);
                let target_prob = pass.probs[target].max(1e-7);
                loss_sum += f64::from(-target_prob.ln());
                examples += 1;
                backward(self.model, &image, &pass, target, scale, &mut self.grads);
            }
            apply_updates(self.model, &self.grads, &mut self.optimizers);

            // Validation draw from the held-out partition, one per step.
            let val = self.batches.next_test_batch(self.batch_size);
            for (image_view, label_row) in val
                .images
                .axis_iter(Axis(0))
                .zip(val.labels.axis_iter(Axis(0)))
            {
                let image: Vec<f32> = image_view.iter().copied().collect();
                let truth = argmax(&label_row.iter().copied().collect::<Vec<f32>>());
                let pass = self.model.forward(&image);
                if argmax(&pass.probs) == truth {
                    val_correct += 1;
                }
                val_total += 1;
            }
        }

        let loss = if examples == 0 {
            0.0
        } else {
            (loss_sum / examples as f64) as f32
        };
        let accuracy = if val_total == 0 {
            None
        } else {
            Some(val_correct as f32 / val_total as f32)
        };
        Ok(EpochMetrics { loss, accuracy })
    }
}

fn apply_updates(model: &mut ConvNet, grads: &ConvNetGrads, optimizers: &mut ConvNetOptimizers) {
    optimizers
        .conv1_w
        .step(&mut model.conv1.weights, &grads.conv1_w);
    optimizers
        .conv1_b
        .step(&mut model.conv1.biases, &grads.conv1_b);
    optimizers
        .conv2_w
        .step(&mut model.conv2.weights, &grads.conv2_w);
    optimizers
        .conv2_b
        .step(&mut model.conv2.biases, &grads.conv2_b);
    optimizers.fc_w.step(&mut model.fc_weights, &grads.fc_w);
    optimizers.fc_b.step(&mut model.fc_biases, &grads.fc_b);
}

/// Accumulate gradients for one example.
///
/// Softmax plus cross-entropy gives `d(loss)/d(logit) = prob - one_hot`;
/// everything upstream of that is plain chain rule through the dense, pool,
/// and conv layers. `scale` folds in the per-batch averaging.
fn backward(
    model: &ConvNet,
    image: &[f32],
    pass: &super::model::ForwardPass,
    target: usize,
    scale: f32,
    grads: &mut ConvNetGrads,
) {
    // Dense layer.
    let mut d_flat = vec![0.0f32; FLAT_LEN];
    for class in 0..NUM_CLASSES {
        let one_hot = if class == target { 1.0 } else { 0.0 };
        let d_logit = (pass.probs[class] - one_hot) * scale;
        grads.fc_b[class] += d_logit;
        let base = class * FLAT_LEN;
        for i in 0..FLAT_LEN {
            grads.fc_w[base + i] += d_logit * pass.pool2_out[i];
            d_flat[i] += d_logit * model.fc_weights[base + i];
        }
    }

    // Pool2: route each gradient to the winning conv2 cell, gated by ReLU.
    let mut d_conv2 = vec![0.0f32; CONV2_FILTERS * CONV2_WIDTH * CONV2_WIDTH];
    for (out_idx, &in_idx) in pass.pool2_argmax.iter().enumerate() {
        if pass.conv2_out[in_idx] > 0.0 {
            d_conv2[in_idx] += d_flat[out_idx];
        }
    }

    // Conv2: weight gradients and the gradient flowing into pool1's output.
    let mut d_pool1 = vec![0.0f32; CONV1_FILTERS * POOL1_WIDTH * POOL1_WIDTH];
    conv_backward(
        &pass.pool1_out,
        POOL1_WIDTH,
        &model.conv2,
        CONV2_WIDTH,
        &d_conv2,
        &mut grads.conv2_w,
        &mut grads.conv2_b,
        Some(&mut d_pool1),
    );

    // Pool1 routing, again ReLU-gated.
    let mut d_conv1 = vec![0.0f32; CONV1_FILTERS * CONV1_WIDTH * CONV1_WIDTH];
    for (out_idx, &in_idx) in pass.pool1_argmax.iter().enumerate() {
        if pass.conv1_out[in_idx] > 0.0 {
            d_conv1[in_idx] += d_pool1[out_idx];
        }
    }

    // Conv1: weight gradients only; the image needs no gradient.
    conv_backward(
        image,
        IMAGE_WIDTH,
        &model.conv1,
        CONV1_WIDTH,
        &d_conv1,
        &mut grads.conv1_w,
        &mut grads.conv1_b,
        None,
    );
}

#[allow(clippy::too_many_arguments)]
fn conv_backward(
    input: &[f32],
    in_w: usize,
    layer: &ConvLayer,
    out_w: usize,
    d_out: &[f32],
    d_weights: &mut [f32],
    d_biases: &mut [f32],
    mut d_input: Option<&mut Vec<f32>>,
) {
    for oc in 0..layer.out_ch {
        for oy in 0..out_w {
            for ox in 0..out_w {
                let g = d_out[(oc * out_w + oy) * out_w + ox];
                if g == 0.0 {
                    continue;
                }
                d_biases[oc] += g;
                for ic in 0..layer.in_ch {
                    for ky in 0..KERNEL {
                        for kx in 0..KERNEL {
                            let w_idx = ((oc * layer.in_ch + ic) * KERNEL + ky) * KERNEL + kx;
                            let in_idx = (ic * in_w + oy + ky) * in_w + ox + kx;
                            d_weights[w_idx] += g * input[in_idx];
                            if let Some(d_in) = d_input.as_deref_mut() {
                                d_in[in_idx] += g * layer.weights[w_idx];
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::digits::{DigitCorpus, IMAGE_PIXELS};
    use crate::session::{TrainingSession, noop_observer};

    /// Tiny synthetic corpus: class k images are a solid intensity ramp,
    /// separable enough for a couple of epochs to learn something.
    fn synthetic_corpus(len: usize) -> DigitCorpus {
        let mut pixels = Vec::with_capacity(len * IMAGE_PIXELS);
        let mut labels = Vec::with_capacity(len);
        for i in 0..len {
            let class = (i % 2) as u8; // two visually distinct classes
            let intensity = if class == 0 { 0.1 } else { 0.9 };
            pixels.extend(std::iter::repeat_n(intensity, IMAGE_PIXELS));
            labels.push(class);
        }
        DigitCorpus::from_parts(pixels, labels).unwrap()
    }

    #[test]
    fn one_epoch_reports_finite_loss_and_accuracy() {
        let corpus = synthetic_corpus(24);
        let batches = DigitBatches::new(&corpus, 16, 8).unwrap();
        let mut model = ConvNet::new();
        let session = TrainingSession::new();
        let options = TrainOptions {
            epochs: 1,
            batch_size: 8,
            ..TrainOptions::default()
        };
        let summary = train(&mut model, &batches, &options, &session, &mut noop_observer()).unwrap();
        let report = summary.final_report.unwrap();
        assert!(report.loss.is_finite());
        let accuracy = report.accuracy.unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn training_separates_two_solid_classes() {
        let corpus = synthetic_corpus(48);
        let batches = DigitBatches::new(&corpus, 32, 16).unwrap();
        let mut model = ConvNet::new();
        let options = TrainOptions {
            epochs: 12,
            batch_size: 8,
            learning_rate: 0.02,
        };
        let mut losses = Vec::new();
        let mut observer = |report: &crate::session::EpochReport| {
            losses.push(report.loss);
            Ok(())
        };
        train(
            &mut model,
            &batches,
            &options,
            &TrainingSession::new(),
            &mut observer,
        )
        .unwrap();
        assert!(
            losses.last().unwrap() < losses.first().unwrap(),
            "loss did not decrease: {losses:?}"
        );
        let matrix = evaluate(&model, &batches);
        assert!(matrix.accuracy() >= 0.5, "accuracy {}", matrix.accuracy());
    }

    #[test]
    fn empty_train_partition_fails_the_run() {
        let corpus = synthetic_corpus(8);
        let batches = DigitBatches::new(&corpus, 0, 8).unwrap();
        let mut model = ConvNet::new();
        let session = TrainingSession::new();
        let err = train(
            &mut model,
            &batches,
            &TrainOptions::default(),
            &session,
            &mut noop_observer(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FitError::Session(crate::session::SessionError::Train {
                epoch: 0,
                source: TrainError::EmptyDataset
            })
        ));
    }
}
