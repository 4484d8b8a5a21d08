//! Evaluation metrics for the digit classifier.

/// Confusion matrix for a `K`-class classifier.
///
/// Counts are row-major, `truth * K + predicted`.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    n_classes: usize,
    counts: Vec<u32>,
}

/// Precision/recall for a single class.
#[derive(Debug, Clone, Copy)]
pub struct ClassStats {
    /// `TP / (TP + FP)`; 0 when the class was never predicted.
    pub precision: f32,
    /// `TP / (TP + FN)`; 0 when the class never occurs.
    pub recall: f32,
    /// Number of true examples of the class.
    pub support: u32,
}

impl ConfusionMatrix {
    /// Create an empty `K x K` matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Record one prediction. Out-of-range pairs are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    /// Count of examples with the given truth/prediction pair.
    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    /// Fraction of examples on the diagonal; 0 for an empty matrix.
    pub fn accuracy(&self) -> f32 {
        let mut correct = 0u64;
        let mut total = 0u64;
        for truth in 0..self.n_classes {
            for predicted in 0..self.n_classes {
                let count = u64::from(self.get(truth, predicted));
                total += count;
                if truth == predicted {
                    correct += count;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            correct as f32 / total as f32
        }
    }

    /// Per-class precision and recall.
    pub fn per_class(&self) -> Vec<ClassStats> {
        (0..self.n_classes)
            .map(|class| {
                let tp = self.get(class, class) as f32;
                let mut fp = 0.0f32;
                let mut missed = 0.0f32;
                let mut support = 0u32;
                for other in 0..self.n_classes {
                    support = support.saturating_add(self.get(class, other));
                    if other != class {
                        missed += self.get(class, other) as f32;
                        fp += self.get(other, class) as f32;
                    }
                }
                ClassStats {
                    precision: if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) },
                    recall: if tp + missed == 0.0 {
                        0.0
                    } else {
                        tp / (tp + missed)
                    },
                    support,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_counts_the_diagonal() {
        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 0);
        cm.add(0, 0);
        cm.add(1, 1);
        cm.add(2, 1);
        assert!((cm.accuracy() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn per_class_precision_and_recall() {
        let mut cm = ConfusionMatrix::new(2);
        // class 0: 3 true, 2 recovered; class 1 predicted 0 once.
        cm.add(0, 0);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 0);
        let stats = cm.per_class();
        assert_eq!(stats[0].support, 3);
        assert!((stats[0].recall - 2.0 / 3.0).abs() < 1e-6);
        assert!((stats[0].precision - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(stats[1].support, 1);
        assert_eq!(stats[1].recall, 0.0);
    }

    #[test]
    fn empty_matrix_has_zero_accuracy() {
        assert_eq!(ConfusionMatrix::new(4).accuracy(), 0.0);
    }
}
