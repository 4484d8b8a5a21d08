//! Convolutional network over 28x28 single-channel images.
//!
//! Architecture: conv(5x5, 8, ReLU) -> maxpool(2x2) -> conv(5x5, 16, ReLU)
//! -> maxpool(2x2) -> flatten -> dense(10, softmax). Buffers are flat and
//! channel-major (`[channel][y][x]`); the flattened pooled output feeds the
//! dense layer in that same order.

use rand::Rng;

use crate::dataset::digits::{IMAGE_PIXELS, IMAGE_WIDTH, NUM_CLASSES};
use crate::ml::ShapeError;

pub(crate) const KERNEL: usize = 5;
pub(crate) const CONV1_FILTERS: usize = 8;
pub(crate) const CONV2_FILTERS: usize = 16;
/// 28 - 5 + 1, valid padding, stride 1.
pub(crate) const CONV1_WIDTH: usize = IMAGE_WIDTH - KERNEL + 1;
pub(crate) const POOL1_WIDTH: usize = CONV1_WIDTH / 2;
pub(crate) const CONV2_WIDTH: usize = POOL1_WIDTH - KERNEL + 1;
pub(crate) const POOL2_WIDTH: usize = CONV2_WIDTH / 2;
/// Flattened input width of the dense layer.
pub(crate) const FLAT_LEN: usize = POOL2_WIDTH * POOL2_WIDTH * CONV2_FILTERS;

/// One valid-padding convolution layer, weights `[out][in][ky][kx]`.
#[derive(Debug, Clone)]
pub(crate) struct ConvLayer {
    pub in_ch: usize,
    pub out_ch: usize,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl ConvLayer {
    fn new(in_ch: usize, out_ch: usize, rng: &mut impl Rng) -> Self {
        let fan_in = in_ch * KERNEL * KERNEL;
        let fan_out = out_ch * KERNEL * KERNEL;
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        Self {
            in_ch,
            out_ch,
            weights: (0..out_ch * in_ch * KERNEL * KERNEL)
                .map(|_| rng.random_range(-limit..limit))
                .collect(),
            biases: vec![0.0; out_ch],
        }
    }
}

/// Activations retained from one forward pass for backpropagation.
#[derive(Debug)]
pub(crate) struct ForwardPass {
    /// Post-ReLU conv1 output, `[8][24][24]`.
    pub conv1_out: Vec<f32>,
    /// Pool1 output `[8][12][12]` and the winning input index per cell.
    pub pool1_out: Vec<f32>,
    pub pool1_argmax: Vec<usize>,
    /// Post-ReLU conv2 output, `[16][8][8]`.
    pub conv2_out: Vec<f32>,
    /// Pool2 output, already the flattened dense input.
    pub pool2_out: Vec<f32>,
    pub pool2_argmax: Vec<usize>,
    /// Softmax output, width 10.
    pub probs: Vec<f32>,
}

/// The trainable classifier.
#[derive(Debug, Clone)]
pub struct ConvNet {
    pub(crate) conv1: ConvLayer,
    pub(crate) conv2: ConvLayer,
    /// Dense weights, `[class][FLAT_LEN]`.
    pub(crate) fc_weights: Vec<f32>,
    pub(crate) fc_biases: Vec<f32>,
}

impl ConvNet {
    /// Build the fixed architecture with small random weights.
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let limit = (6.0 / (FLAT_LEN + NUM_CLASSES) as f32).sqrt();
        Self {
            conv1: ConvLayer::new(1, CONV1_FILTERS, &mut rng),
            conv2: ConvLayer::new(CONV1_FILTERS, CONV2_FILTERS, &mut rng),
            fc_weights: (0..NUM_CLASSES * FLAT_LEN)
                .map(|_| rng.random_range(-limit..limit))
                .collect(),
            fc_biases: vec![0.0; NUM_CLASSES],
        }
    }

    /// Class probabilities for one flattened 28x28 image.
    pub fn predict_proba(&self, image: &[f32]) -> Result<Vec<f32>, ShapeError> {
        if image.len() != IMAGE_PIXELS {
            return Err(ShapeError::InputLen {
                expected: IMAGE_PIXELS,
                got: image.len(),
            });
        }
        Ok(self.forward(image).probs)
    }

    /// Predicted class for one image; ties break to the lowest index.
    pub fn predict_class(&self, image: &[f32]) -> Result<usize, ShapeError> {
        let probs = self.predict_proba(image)?;
        Ok(argmax(&probs))
    }

    pub(crate) fn forward(&self, image: &[f32]) -> ForwardPass {
        let mut conv1_out = vec![0.0f32; CONV1_FILTERS * CONV1_WIDTH * CONV1_WIDTH];
        conv_relu_forward(image, IMAGE_WIDTH, &self.conv1, CONV1_WIDTH, &mut conv1_out);
        let (pool1_out, pool1_argmax) = max_pool_forward(&conv1_out, CONV1_FILTERS, CONV1_WIDTH);

        let mut conv2_out = vec![0.0f32; CONV2_FILTERS * CONV2_WIDTH * CONV2_WIDTH];
        conv_relu_forward(&pool1_out, POOL1_WIDTH, &self.conv2, CONV2_WIDTH, &mut conv2_out);
        let (pool2_out, pool2_argmax) = max_pool_forward(&conv2_out, CONV2_FILTERS, CONV2_WIDTH);

        let mut logits = vec![0.0f32; NUM_CLASSES];
        for (class, logit) in logits.iter_mut().enumerate() {
            let mut sum = self.fc_biases[class];
            let base = class * FLAT_LEN;
            for (i, &v) in pool2_out.iter().enumerate() {
                sum += self.fc_weights[base + i] * v;
            }
            *logit = sum;
        }
        let probs = softmax(&logits);

        ForwardPass {
            conv1_out,
            pool1_out,
            pool1_argmax,
            conv2_out,
            pool2_out,
            pool2_argmax,
            probs,
        }
    }
}

impl Default for ConvNet {
    fn default() -> Self {
        Self::new()
    }
}

/// First maximum wins, so ties resolve to the lowest class index.
pub(crate) fn argmax(values: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in values.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = idx;
        }
    }
    best
}

/// Valid-padding stride-1 convolution with a fused ReLU.
pub(crate) fn conv_relu_forward(
    input: &[f32],
    in_w: usize,
    layer: &ConvLayer,
    out_w: usize,
    out: &mut [f32],
) {
    for oc in 0..layer.out_ch {
        for oy in 0..out_w {
            for ox in 0..out_w {
                let mut sum = layer.biases[oc];
                for ic in 0..layer.in_ch {
                    for ky in 0..KERNEL {
                        for kx in 0..KERNEL {
                            let w =
                                layer.weights[((oc * layer.in_ch + ic) * KERNEL + ky) * KERNEL + kx];
                            let v = input[(ic * in_w + oy + ky) * in_w + ox + kx];
                            sum += w * v;
                        }
                    }
                }
                out[(oc * out_w + oy) * out_w + ox] = sum.max(0.0);
            }
        }
    }
}

/// 2x2 stride-2 max pool; records the winning input index per output cell.
pub(crate) fn max_pool_forward(input: &[f32], channels: usize, in_w: usize) -> (Vec<f32>, Vec<usize>) {
    let out_w = in_w / 2;
    let mut out = vec![0.0f32; channels * out_w * out_w];
    let mut argmax = vec![0usize; channels * out_w * out_w];
    for c in 0..channels {
        for oy in 0..out_w {
            for ox in 0..out_w {
                let mut best = f32::NEG_INFINITY;
                let mut best_idx = 0usize;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let idx = (c * in_w + 2 * oy + dy) * in_w + 2 * ox + dx;
                        if input[idx] > best {
                            best = input[idx];
                            best_idx = idx;
                        }
                    }
                }
                let out_idx = (c * out_w + oy) * out_w + ox;
                out[out_idx] = best;
                argmax[out_idx] = best_idx;
            }
        }
    }
    (out, argmax)
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 {
        return vec![1.0 / logits.len() as f32; logits.len()];
    }
    exps.iter().map(|&e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_widths_match_the_architecture() {
        assert_eq!(CONV1_WIDTH, 24);
        assert_eq!(POOL1_WIDTH, 12);
        assert_eq!(CONV2_WIDTH, 8);
        assert_eq!(POOL2_WIDTH, 4);
        assert_eq!(FLAT_LEN, 256);
    }

    #[test]
    fn untrained_model_classifies_an_all_zero_image() {
        let model = ConvNet::new();
        let class = model.predict_class(&vec![0.0; IMAGE_PIXELS]).unwrap();
        assert!(class < NUM_CLASSES);
        let probs = model.predict_proba(&vec![0.0; IMAGE_PIXELS]).unwrap();
        assert!(probs.iter().all(|p| p.is_finite()));
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn wrong_input_length_is_rejected() {
        let model = ConvNet::new();
        let err = model.predict_class(&[0.0; 100]).unwrap_err();
        assert!(matches!(
            err,
            ShapeError::InputLen {
                expected: IMAGE_PIXELS,
                got: 100
            }
        ));
    }

    #[test]
    fn argmax_breaks_ties_to_the_lowest_index() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!(probs.iter().all(|p| p.is_finite()));
    }
}
