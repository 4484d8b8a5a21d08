//! Labeled 28x28 digit corpus: decoding, partitioning, and batch sampling.
//!
//! The remote corpus is a sprite PNG holding 65,000 images (one flattened
//! 784-pixel image per row) plus a parallel label resource of one-hot rows.
//! After `fetch` the pixel and label buffers are read-only and safe to share
//! across concurrent inference calls.

use ndarray::{Array2, Array4};
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::info;

use super::FetchError;
use crate::http_client;

/// Width and height of one image in pixels.
pub const IMAGE_WIDTH: usize = 28;
/// Flattened pixel count per image.
pub const IMAGE_PIXELS: usize = IMAGE_WIDTH * IMAGE_WIDTH;
/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;
/// Exact number of examples in the remote corpus.
pub const CORPUS_LEN: usize = 65_000;
/// Default train partition size.
pub const DEFAULT_TRAIN_SIZE: usize = 5_500;
/// Default test partition size.
pub const DEFAULT_TEST_SIZE: usize = 1_000;

const SPRITE_URL: &str =
    "https://storage.googleapis.com/learnjs-data/model-builder/mnist_images.png";
const LABELS_URL: &str =
    "https://storage.googleapis.com/learnjs-data/model-builder/mnist_labels_uint8";

/// The raw sprite is ~25 MiB; leave generous headroom.
const MAX_SPRITE_BYTES: usize = 64 * 1024 * 1024;
const MAX_LABEL_BYTES: usize = 8 * 1024 * 1024;

/// Errors while loading or partitioning the digit corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// A remote resource was unreachable or oversized.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The sprite bytes did not decode as an image.
    #[error("sprite decode failed: {0}")]
    Decode(#[from] image::ImageError),
    /// The sprite does not have one flattened image per row.
    #[error("sprite is {width}x{height}, expected width {expected_width}")]
    SpriteShape {
        width: usize,
        height: usize,
        expected_width: usize,
    },
    /// The remote corpus must hold exactly [`CORPUS_LEN`] examples.
    #[error("corpus holds {got} examples, expected {expected}")]
    CorpusLen { got: usize, expected: usize },
    /// The label resource length disagrees with the image count.
    #[error("label buffer is {got} bytes, expected {expected}")]
    LabelLen { got: usize, expected: usize },
    /// A label row is not a one-hot vector of width 10.
    #[error("label row {row} is not one-hot")]
    LabelRow { row: usize },
    /// Pixel and label buffers disagree in example count.
    #[error("pixel buffer holds {pixel_examples} examples but {labels} labels were given")]
    BufferMismatch {
        pixel_examples: usize,
        labels: usize,
    },
    /// A label value is outside `0..10`.
    #[error("label {value} at index {index} is out of range")]
    LabelRange { index: usize, value: u8 },
    /// A partition request exceeds the corpus size. Out-of-range requests
    /// fail here instead of silently wrapping.
    #[error("partition of {requested} examples exceeds corpus of {available}")]
    PartitionTooLarge { requested: usize, available: usize },
}

/// Decoded digit corpus: one contiguous pixel buffer and one label buffer,
/// indexed identically.
#[derive(Debug, Clone)]
pub struct DigitCorpus {
    pixels: Vec<f32>,
    labels: Vec<u8>,
}

impl DigitCorpus {
    /// Download and decode the remote corpus.
    pub fn fetch() -> Result<Self, CorpusError> {
        let sprite = fetch_resource(SPRITE_URL, MAX_SPRITE_BYTES)?;
        let labels = fetch_resource(LABELS_URL, MAX_LABEL_BYTES)?;
        let corpus = Self::from_raw(&sprite, &labels)?;
        if corpus.len() != CORPUS_LEN {
            return Err(CorpusError::CorpusLen {
                got: corpus.len(),
                expected: CORPUS_LEN,
            });
        }
        info!(examples = corpus.len(), "Loaded digit corpus");
        Ok(corpus)
    }

    /// Decode a sprite PNG plus a one-hot label resource.
    ///
    /// Pixel intensities come from the first channel only, divided by 255;
    /// no gamma correction and no channel averaging.
    pub fn from_raw(sprite_png: &[u8], label_bytes: &[u8]) -> Result<Self, CorpusError> {
        let decoded = image::load_from_memory(sprite_png)?;
        let width = decoded.width() as usize;
        let height = decoded.height() as usize;
        if width != IMAGE_PIXELS {
            return Err(CorpusError::SpriteShape {
                width,
                height,
                expected_width: IMAGE_PIXELS,
            });
        }

        let channels = decoded.color().channel_count() as usize;
        let raw = decoded.as_bytes();
        let pixels: Vec<f32> = if raw.len() == width * height * channels {
            raw.iter()
                .step_by(channels)
                .map(|&b| f32::from(b) / 255.0)
                .collect()
        } else {
            // Deeper-than-8-bit source; take channel 0 of an 8-bit copy.
            decoded
                .to_rgba8()
                .as_raw()
                .iter()
                .step_by(4)
                .map(|&b| f32::from(b) / 255.0)
                .collect()
        };

        let labels = decode_one_hot_labels(label_bytes, height)?;
        Ok(Self { pixels, labels })
    }

    /// Build a corpus from already-decoded buffers.
    ///
    /// Used for synthetic corpora in tests and by hosts that cache the
    /// decoded data themselves.
    pub fn from_parts(pixels: Vec<f32>, labels: Vec<u8>) -> Result<Self, CorpusError> {
        if pixels.len() != labels.len() * IMAGE_PIXELS {
            return Err(CorpusError::BufferMismatch {
                pixel_examples: pixels.len() / IMAGE_PIXELS,
                labels: labels.len(),
            });
        }
        if let Some((index, &value)) = labels
            .iter()
            .enumerate()
            .find(|&(_, &value)| value as usize >= NUM_CLASSES)
        {
            return Err(CorpusError::LabelRange { index, value });
        }
        Ok(Self { pixels, labels })
    }

    /// Number of examples in the corpus.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when the corpus holds no examples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Flattened pixels of example `index`, values in `[0, 1]`.
    pub fn image(&self, index: usize) -> &[f32] {
        &self.pixels[index * IMAGE_PIXELS..(index + 1) * IMAGE_PIXELS]
    }

    /// Class label of example `index`, in `0..10`.
    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }
}

fn fetch_resource(url: &str, max_bytes: usize) -> Result<Vec<u8>, CorpusError> {
    let response = http_client::agent()
        .get(url)
        .call()
        .map_err(|err| FetchError::Request {
            url: url.to_string(),
            source: Box::new(err),
        })?;
    Ok(http_client::read_response_bytes(response, max_bytes).map_err(FetchError::Body)?)
}

fn decode_one_hot_labels(bytes: &[u8], expected_rows: usize) -> Result<Vec<u8>, CorpusError> {
    let expected = expected_rows * NUM_CLASSES;
    if bytes.len() != expected {
        return Err(CorpusError::LabelLen {
            got: bytes.len(),
            expected,
        });
    }
    let mut labels = Vec::with_capacity(expected_rows);
    for (row, chunk) in bytes.chunks_exact(NUM_CLASSES).enumerate() {
        let mut hot = None;
        for (class, &value) in chunk.iter().enumerate() {
            if value != 0 {
                if hot.is_some() || value != 1 {
                    return Err(CorpusError::LabelRow { row });
                }
                hot = Some(class as u8);
            }
        }
        let Some(label) = hot else {
            return Err(CorpusError::LabelRow { row });
        };
        labels.push(label);
    }
    Ok(labels)
}

/// One training step's worth of examples.
///
/// Created lazily per step and discarded after use; nothing here borrows
/// from the corpus.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Images, shape `[batch, 28, 28, 1]`.
    pub images: Array4<f32>,
    /// One-hot labels, shape `[batch, 10]`, exactly one 1 per row.
    pub labels: Array2<f32>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    /// True when the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Disjoint train/test views over one master permutation of the corpus.
#[derive(Debug)]
pub struct DigitBatches<'a> {
    corpus: &'a DigitCorpus,
    train: Vec<u32>,
    test: Vec<u32>,
}

impl<'a> DigitBatches<'a> {
    /// Draw one master permutation of the corpus indices and split off the
    /// first `train_size` as the train set and the next `test_size` as the
    /// test set.
    pub fn new(
        corpus: &'a DigitCorpus,
        train_size: usize,
        test_size: usize,
    ) -> Result<Self, CorpusError> {
        let requested = train_size + test_size;
        if requested > corpus.len() {
            return Err(CorpusError::PartitionTooLarge {
                requested,
                available: corpus.len(),
            });
        }
        let mut permutation: Vec<u32> = (0..corpus.len() as u32).collect();
        permutation.shuffle(&mut rand::rng());
        let mut test = permutation.split_off(train_size);
        test.truncate(test_size);
        Ok(Self {
            corpus,
            train: permutation,
            test,
        })
    }

    /// Partition with the demo's default 5500/1000 split.
    pub fn with_default_split(corpus: &'a DigitCorpus) -> Result<Self, CorpusError> {
        Self::new(corpus, DEFAULT_TRAIN_SIZE, DEFAULT_TEST_SIZE)
    }

    /// Indices forming the train partition.
    pub fn train_indices(&self) -> &[u32] {
        &self.train
    }

    /// Indices forming the test partition.
    pub fn test_indices(&self) -> &[u32] {
        &self.test
    }

    /// Sample `batch_size` training examples uniformly, with replacement.
    ///
    /// Each call re-samples independently; there is no cursor to exhaust.
    /// An empty partition or a zero batch size yields an empty batch.
    pub fn next_train_batch(&self, batch_size: usize) -> Batch {
        self.sample(&self.train, batch_size)
    }

    /// Sample `batch_size` held-out examples uniformly, with replacement.
    pub fn next_test_batch(&self, batch_size: usize) -> Batch {
        self.sample(&self.test, batch_size)
    }

    /// Walk the whole test partition once, in permutation order.
    ///
    /// Used for held-out evaluation, where sampling with replacement would
    /// double-count examples.
    pub fn test_examples(&self) -> impl Iterator<Item = (&[f32], u8)> + '_ {
        self.test.iter().map(|&idx| {
            let idx = idx as usize;
            (self.corpus.image(idx), self.corpus.label(idx))
        })
    }

    fn sample(&self, partition: &[u32], batch_size: usize) -> Batch {
        let count = if partition.is_empty() { 0 } else { batch_size };
        let mut images = Array4::zeros((count, IMAGE_WIDTH, IMAGE_WIDTH, 1));
        let mut labels = Array2::zeros((count, NUM_CLASSES));
        let mut rng = rand::rng();
        for i in 0..count {
            let example = partition[rng.random_range(0..partition.len())] as usize;
            let pixels = self.corpus.image(example);
            for y in 0..IMAGE_WIDTH {
                for x in 0..IMAGE_WIDTH {
                    images[[i, y, x, 0]] = pixels[y * IMAGE_WIDTH + x];
                }
            }
            labels[[i, self.corpus.label(example) as usize]] = 1.0;
        }
        Batch { images, labels }
    }
}
