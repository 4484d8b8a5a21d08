//! Prediction and decoding back into UI-facing values.
//!
//! Regression predictions are produced on a uniform grid, normalized with
//! the bounds retained from training (never recomputed from the grid), and
//! denormalized back to original units. Classification inputs arrive as raw
//! canvas bytes and are decoded to the intensity channel before inference.

use serde::Serialize;

use crate::dataset::digits::IMAGE_PIXELS;
use crate::dataset::normalize::Bounds;
use crate::ml::ShapeError;
use crate::ml::convnet::ConvNet;
use crate::ml::regression::RegressionModel;

/// One predicted point in original units, comparable against raw records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictedPoint {
    pub x: f64,
    pub y: f64,
}

/// Run regression inference over a uniform grid of `count` x-values.
///
/// The grid spans the training data's observed feature range by default;
/// `plot_min`/`plot_max` extend (or shrink) it in original units. Inputs
/// are normalized with the training `bounds`, predictions denormalized
/// with the same bounds. Degenerate bounds or `count == 0` yield an empty
/// line.
pub fn prediction_line(
    model: &RegressionModel,
    bounds: &Bounds,
    count: usize,
    plot_min: Option<f64>,
    plot_max: Option<f64>,
) -> Vec<PredictedPoint> {
    let difference = bounds.feature_max - bounds.feature_min;
    if count == 0 || !difference.is_finite() || difference <= 0.0 {
        return Vec::new();
    }
    // Plot range expressed in normalized space: the observed range is
    // [0, 1]; caller extensions land outside it.
    let grid_min = plot_min.map_or(0.0, |p| (p - bounds.feature_min) / difference);
    let grid_max = plot_max.map_or(1.0, |p| 1.0 + (p - bounds.feature_max) / difference);

    (0..count)
        .map(|i| {
            let t = if count == 1 {
                0.0
            } else {
                i as f64 / (count - 1) as f64
            };
            let normalized_x = grid_min + t * (grid_max - grid_min);
            let normalized_y = f64::from(model.forward(normalized_x as f32));
            PredictedPoint {
                x: bounds.denormalize_feature(normalized_x),
                y: bounds.denormalize_target(normalized_y),
            }
        })
        .collect()
}

/// Decoded classification result for a single drawn digit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigitPrediction {
    /// Argmax class, `0..=9`, lowest index on ties.
    pub label: u8,
    /// Raw 10-way probability vector for optional display.
    pub probabilities: Vec<f32>,
}

/// Classify a rasterized 28x28 grayscale input.
///
/// `raw` may carry 1 to 4 bytes per pixel (grayscale, gray+alpha, RGB,
/// RGBA); only the first channel is read. Intensities are divided by 255,
/// nothing else.
pub fn decode_digit(model: &ConvNet, raw: &[u8]) -> Result<DigitPrediction, ShapeError> {
    let pixels = canvas_to_pixels(raw)?;
    let probabilities = model.predict_proba(&pixels)?;
    let mut label = 0u8;
    let mut best = f32::NEG_INFINITY;
    for (class, &p) in probabilities.iter().enumerate() {
        if p > best {
            best = p;
            label = class as u8;
        }
    }
    Ok(DigitPrediction {
        label,
        probabilities,
    })
}

fn canvas_to_pixels(raw: &[u8]) -> Result<Vec<f32>, ShapeError> {
    let channels = raw.len() / IMAGE_PIXELS;
    if !(1..=4).contains(&channels) || raw.len() != channels * IMAGE_PIXELS {
        return Err(ShapeError::CanvasLen { got: raw.len() });
    }
    Ok(raw
        .iter()
        .step_by(channels)
        .map(|&b| f32::from(b) / 255.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds {
            feature_min: 40.0,
            feature_max: 240.0,
            target_min: 10.0,
            target_max: 45.0,
        }
    }

    #[test]
    fn grid_spans_observed_bounds_by_default() {
        let model = RegressionModel::new();
        let line = prediction_line(&model, &bounds(), 100, None, None);
        assert_eq!(line.len(), 100);
        assert!((line[0].x - 40.0).abs() < 1e-9);
        assert!((line[99].x - 240.0).abs() < 1e-9);
        for point in &line {
            // Sigmoid output stays inside the normalized target range.
            assert!(point.y >= 10.0 - 1e-6 && point.y <= 45.0 + 1e-6);
        }
    }

    #[test]
    fn plot_range_extends_the_grid() {
        let model = RegressionModel::new();
        let line = prediction_line(&model, &bounds(), 50, Some(0.0), Some(300.0));
        assert!((line[0].x - 0.0).abs() < 1e-9);
        assert!((line[49].x - 300.0).abs() < 1e-9);
    }

    #[test]
    fn single_point_grid_sits_at_the_range_start() {
        let model = RegressionModel::new();
        let line = prediction_line(&model, &bounds(), 1, None, None);
        assert_eq!(line.len(), 1);
        assert!((line[0].x - 40.0).abs() < 1e-9);
    }

    #[test]
    fn zero_count_or_degenerate_bounds_yield_empty_lines() {
        let model = RegressionModel::new();
        assert!(prediction_line(&model, &bounds(), 0, None, None).is_empty());
        let degenerate = Bounds {
            feature_min: 5.0,
            feature_max: 5.0,
            target_min: 0.0,
            target_max: 1.0,
        };
        assert!(prediction_line(&model, &degenerate, 10, None, None).is_empty());
    }

    #[test]
    fn decodes_an_all_zero_canvas() {
        let model = ConvNet::new();
        let prediction = decode_digit(&model, &[0u8; IMAGE_PIXELS]).unwrap();
        assert!(prediction.label < 10);
        assert_eq!(prediction.probabilities.len(), 10);
        let sum: f32 = prediction.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(prediction.probabilities.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn rgba_canvas_reads_only_the_intensity_channel() {
        let model = ConvNet::new();
        let mut rgba = vec![0u8; IMAGE_PIXELS * 4];
        for (i, chunk) in rgba.chunks_exact_mut(4).enumerate() {
            chunk[0] = (i % 256) as u8; // intensity
            chunk[1] = 255; // noise that must be ignored
            chunk[2] = 7;
            chunk[3] = 19;
        }
        let gray: Vec<u8> = (0..IMAGE_PIXELS).map(|i| (i % 256) as u8).collect();
        let from_rgba = decode_digit(&model, &rgba).unwrap();
        let from_gray = decode_digit(&model, &gray).unwrap();
        assert_eq!(from_rgba, from_gray);
    }

    #[test]
    fn malformed_canvas_is_rejected() {
        let model = ConvNet::new();
        for len in [0usize, 100, IMAGE_PIXELS - 1, IMAGE_PIXELS * 5] {
            let raw = vec![0u8; len];
            let err = decode_digit(&model, &raw).unwrap_err();
            assert!(matches!(err, ShapeError::CanvasLen { .. }), "len {len}");
        }
    }
}
