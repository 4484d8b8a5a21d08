//! Dataset ingestion and preparation for both pipelines.

/// Remote tabular horsepower/MPG records plus a synthetic sine source.
pub mod cars;
/// Labeled 28x28 digit corpus, partitions, and batch sampling.
pub mod digits;
/// Min-max normalization with retained bounds for inverse mapping.
pub mod normalize;

use thiserror::Error;

/// Errors while fetching a remote dataset resource.
///
/// There is no retry here; the failure is the caller's to handle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, TLS, timeout, non-2xx status).
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    /// Reading the response body failed or exceeded the size cap.
    #[error("reading response body failed: {0}")]
    Body(#[from] std::io::Error),
    /// The payload did not parse as the expected JSON shape.
    #[error("malformed dataset payload: {0}")]
    Payload(#[from] serde_json::Error),
}
