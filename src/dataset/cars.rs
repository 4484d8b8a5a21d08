//! Tabular demo dataset: car horsepower vs. fuel economy.
//!
//! The remote resource is an array of records where either column may be
//! null; incomplete records are dropped before the data reaches the
//! normalizer. A synthetic sine source is provided as an interchangeable
//! alternative for eyeballing non-linear fits.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::FetchError;
use crate::http_client;

const CARS_URL: &str = "https://storage.googleapis.com/tfjs-tutorials/carsData.json";
/// Size cap for the cars payload; the real file is well under 100 KiB.
const MAX_CARS_BYTES: usize = 4 * 1024 * 1024;

/// One cleaned tabular record. Order is irrelevant once shuffled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CarRecord {
    /// Engine horsepower (the model input).
    pub horsepower: f64,
    /// Miles per gallon (the regression target).
    pub mpg: f64,
}

/// Raw record shape as served by the remote endpoint.
#[derive(Debug, Deserialize)]
struct CarSource {
    #[serde(rename = "Miles_per_Gallon")]
    miles_per_gallon: Option<f64>,
    #[serde(rename = "Horsepower")]
    horsepower: Option<f64>,
}

/// Fetch and clean the remote cars dataset.
pub fn fetch_cars() -> Result<Vec<CarRecord>, FetchError> {
    let response = http_client::agent()
        .get(CARS_URL)
        .call()
        .map_err(|err| FetchError::Request {
            url: CARS_URL.to_string(),
            source: Box::new(err),
        })?;
    let bytes = http_client::read_response_bytes(response, MAX_CARS_BYTES)?;
    let records = parse_cars(&bytes)?;
    info!(records = records.len(), "Loaded cars dataset");
    Ok(records)
}

/// Parse the raw JSON payload, dropping records with a missing column.
pub fn parse_cars(bytes: &[u8]) -> Result<Vec<CarRecord>, FetchError> {
    let raw: Vec<CarSource> = serde_json::from_slice(bytes)?;
    Ok(raw
        .into_iter()
        .filter_map(|car| {
            let mpg = car.miles_per_gallon?;
            let horsepower = car.horsepower?;
            Some(CarRecord { horsepower, mpg })
        })
        .collect())
}

/// Generate `(x, sin x)` records spanning `periods` full sine periods.
///
/// The x values land in the feature column and the sine values in the
/// target column, so the result is drop-in compatible with the cars data.
pub fn sine_points(periods: usize) -> Vec<CarRecord> {
    const SAMPLES_PER_PERIOD: usize = 40;
    let count = periods * SAMPLES_PER_PERIOD;
    (0..count)
        .map(|i| {
            let x = i as f64 * std::f64::consts::TAU / SAMPLES_PER_PERIOD as f64;
            CarRecord {
                horsepower: x,
                mpg: x.sin(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_null_columns() {
        let payload = br#"[
            {"Miles_per_Gallon": 18.0, "Horsepower": 130.0},
            {"Miles_per_Gallon": null, "Horsepower": 165.0},
            {"Miles_per_Gallon": 24.0, "Horsepower": null},
            {"Miles_per_Gallon": 27.0, "Horsepower": 90.0}
        ]"#;
        let records = parse_cars(payload).unwrap();
        assert_eq!(
            records,
            vec![
                CarRecord {
                    horsepower: 130.0,
                    mpg: 18.0
                },
                CarRecord {
                    horsepower: 90.0,
                    mpg: 27.0
                },
            ]
        );
    }

    #[test]
    fn parse_rejects_non_array_payload() {
        let err = parse_cars(b"{\"not\": \"an array\"}").unwrap_err();
        assert!(matches!(err, FetchError::Payload(_)));
    }

    #[test]
    fn sine_points_cover_requested_periods() {
        let points = sine_points(2);
        assert_eq!(points.len(), 80);
        let last = points.last().unwrap();
        assert!(last.horsepower < 2.0 * std::f64::consts::TAU);
        assert!(points.iter().all(|p| p.mpg.abs() <= 1.0));
    }
}
