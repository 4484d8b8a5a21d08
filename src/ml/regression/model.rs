//! Feed-forward regression model over a single scalar feature.

use rand::Rng;

/// Activation applied to a dense layer's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Sigmoid,
}

impl Activation {
    pub(crate) fn apply(self, z: f32) -> f32 {
        match self {
            Activation::Identity => z,
            Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
        }
    }

    /// Derivative expressed in terms of the activation output.
    pub(crate) fn derivative_from_output(self, output: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => output * (1.0 - output),
        }
    }
}

/// One fully-connected layer with weights laid out `w[out * in_dim + i]`.
#[derive(Debug, Clone)]
pub struct Dense {
    pub in_dim: usize,
    pub out_dim: usize,
    pub activation: Activation,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl Dense {
    fn new(in_dim: usize, out_dim: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
        let weights = (0..in_dim * out_dim)
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        Self {
            in_dim,
            out_dim,
            activation,
            weights,
            biases: vec![0.0; out_dim],
        }
    }

    pub(crate) fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0f32; self.out_dim];
        for (o, out) in output.iter_mut().enumerate() {
            let mut sum = self.biases[o];
            let base = o * self.in_dim;
            for (i, &x) in input.iter().enumerate() {
                sum += self.weights[base + i] * x;
            }
            *out = self.activation.apply(sum);
        }
        output
    }
}

/// Fixed regression architecture: 1 -> 32 (identity) -> 32 (sigmoid) -> 1
/// (sigmoid). The sigmoid output keeps predictions inside the normalized
/// target range.
#[derive(Debug, Clone)]
pub struct RegressionModel {
    pub(crate) layers: Vec<Dense>,
}

impl RegressionModel {
    /// Build the fixed architecture with small random weights.
    pub fn new() -> Self {
        let mut rng = rand::rng();
        Self {
            layers: vec![
                Dense::new(1, 32, Activation::Identity, &mut rng),
                Dense::new(32, 32, Activation::Sigmoid, &mut rng),
                Dense::new(32, 1, Activation::Sigmoid, &mut rng),
            ],
        }
    }

    /// One forward pass for a normalized scalar input.
    pub fn forward(&self, x: f32) -> f32 {
        let mut activation = vec![x];
        for layer in &self.layers {
            activation = layer.forward(&activation);
        }
        activation[0]
    }

    /// Forward passes for a slice of normalized inputs.
    pub fn predict(&self, xs: &[f32]) -> Vec<f32> {
        xs.iter().map(|&x| self.forward(x)).collect()
    }
}

impl Default for RegressionModel {
    fn default() -> Self {
        Self::new()
    }
}
