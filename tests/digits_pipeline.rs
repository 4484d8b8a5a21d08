//! End-to-end checks for the digit pipeline: corpus, partitions, batch
//! sampling, convolutional training, and canvas decoding.

use std::collections::HashSet;

use minifit::dataset::digits::{DigitBatches, DigitCorpus, IMAGE_PIXELS, NUM_CLASSES};
use minifit::ml::convnet::{ConvNet, TrainOptions, evaluate, train};
use minifit::predict::decode_digit;
use minifit::session::{SessionState, TrainingSession, noop_observer};

/// Synthetic corpus where class k is a solid image of intensity k / 10.
fn synthetic_corpus(len: usize) -> DigitCorpus {
    let mut pixels = Vec::with_capacity(len * IMAGE_PIXELS);
    let mut labels = Vec::with_capacity(len);
    for i in 0..len {
        let class = (i % NUM_CLASSES) as u8;
        pixels.extend(std::iter::repeat_n(f32::from(class) / 10.0, IMAGE_PIXELS));
        labels.push(class);
    }
    DigitCorpus::from_parts(pixels, labels).unwrap()
}

#[test]
fn partitions_stay_disjoint_for_various_splits() {
    let corpus = synthetic_corpus(200);
    for (train_size, test_size) in [(150, 50), (10, 190), (200, 0), (0, 0)] {
        let batches = DigitBatches::new(&corpus, train_size, test_size).unwrap();
        let train: HashSet<u32> = batches.train_indices().iter().copied().collect();
        let test: HashSet<u32> = batches.test_indices().iter().copied().collect();
        assert_eq!(train.len(), train_size);
        assert_eq!(test.len(), test_size);
        assert!(train.is_disjoint(&test));
        assert_eq!(train.union(&test).count(), train_size + test_size);
    }
}

#[test]
fn sampling_is_with_replacement() {
    let corpus = synthetic_corpus(20);
    let batches = DigitBatches::new(&corpus, 3, 0).unwrap();
    // A batch larger than the partition can only exist with replacement.
    let batch = batches.next_train_batch(10);
    assert_eq!(batch.len(), 10);
    for row in batch.labels.rows() {
        assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(row.sum(), 1.0);
    }
}

#[test]
fn training_reports_progress_and_leaves_a_completed_session() {
    let corpus = synthetic_corpus(60);
    let batches = DigitBatches::new(&corpus, 40, 20).unwrap();
    let mut model = ConvNet::new();
    let session = TrainingSession::new();
    let mut epochs_seen = Vec::new();
    let mut observer = |report: &minifit::session::EpochReport| {
        epochs_seen.push(report.epoch);
        assert!(report.loss.is_finite());
        assert!(report.accuracy.is_some());
        Ok(())
    };
    let options = TrainOptions {
        epochs: 3,
        batch_size: 16,
        ..TrainOptions::default()
    };
    train(&mut model, &batches, &options, &session, &mut observer).unwrap();
    assert_eq!(epochs_seen, vec![0, 1, 2]);
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.last_report().unwrap().epoch, 2);
}

#[test]
fn evaluation_covers_the_whole_test_partition() {
    let corpus = synthetic_corpus(50);
    let batches = DigitBatches::new(&corpus, 30, 20).unwrap();
    let model = ConvNet::new();
    let matrix = evaluate(&model, &batches);
    let total: u32 = (0..NUM_CLASSES)
        .flat_map(|t| (0..NUM_CLASSES).map(move |p| (t, p)))
        .map(|(t, p)| matrix.get(t, p))
        .sum();
    assert_eq!(total, 20);
}

#[test]
fn trained_model_decodes_a_drawn_canvas() {
    let corpus = synthetic_corpus(40);
    let batches = DigitBatches::new(&corpus, 30, 10).unwrap();
    let mut model = ConvNet::new();
    train(
        &mut model,
        &batches,
        &TrainOptions {
            epochs: 2,
            batch_size: 8,
            ..TrainOptions::default()
        },
        &TrainingSession::new(),
        &mut noop_observer(),
    )
    .unwrap();

    // A canvas is u8 intensities; decoding divides by 255 and must agree
    // with running the model on the equivalent float image.
    let canvas: Vec<u8> = (0..IMAGE_PIXELS).map(|i| (i % 200) as u8).collect();
    let prediction = decode_digit(&model, &canvas).unwrap();
    let pixels: Vec<f32> = canvas.iter().map(|&b| f32::from(b) / 255.0).collect();
    let direct = model.predict_class(&pixels).unwrap();
    assert_eq!(prediction.label as usize, direct);
    assert_eq!(prediction.probabilities.len(), NUM_CLASSES);
}

#[test]
fn untrained_model_still_produces_a_valid_class() {
    let model = ConvNet::new();
    let prediction = decode_digit(&model, &[0u8; IMAGE_PIXELS]).unwrap();
    assert!((prediction.label as usize) < NUM_CLASSES);
    assert!(prediction.probabilities.iter().all(|p| p.is_finite()));
}
