//! Adam optimizer over flat parameter buffers.
//!
//! Both trainers keep one `Adam` per parameter buffer (weights and biases
//! separately) and update the buffers in place after each batch.

/// Learning rate used when the caller does not supply one.
pub const DEFAULT_LEARNING_RATE: f32 = 0.001;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// First/second moment estimates for one parameter buffer.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    step: i32,
    first_moment: Vec<f32>,
    second_moment: Vec<f32>,
}

impl Adam {
    /// Create optimizer state for a buffer of `len` parameters.
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            step: 0,
            first_moment: vec![0.0; len],
            second_moment: vec![0.0; len],
        }
    }

    /// Apply one update to `params` from `grads`.
    ///
    /// Moment estimates are bias-corrected by the running step count.
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        debug_assert_eq!(params.len(), self.first_moment.len());
        debug_assert_eq!(grads.len(), self.first_moment.len());
        self.step += 1;
        let correction1 = 1.0 - BETA1.powi(self.step);
        let correction2 = 1.0 - BETA2.powi(self.step);
        for i in 0..params.len() {
            let g = grads[i];
            let m = &mut self.first_moment[i];
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            let v = &mut self.second_moment[i];
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            let m_hat = *m / correction1;
            let v_hat = *v / correction2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        // With bias correction, the first update magnitude is close to lr.
        let mut adam = Adam::new(1, 0.001);
        let mut params = vec![1.0f32];
        adam.step(&mut params, &[0.5]);
        assert!((params[0] - (1.0 - 0.001)).abs() < 1e-5);
    }

    #[test]
    fn descends_a_quadratic() {
        let mut adam = Adam::new(1, 0.05);
        let mut params = vec![3.0f32];
        for _ in 0..500 {
            let grad = 2.0 * params[0];
            let grads = [grad];
            adam.step(&mut params, &grads);
        }
        assert!(params[0].abs() < 0.1, "got {}", params[0]);
    }
}
