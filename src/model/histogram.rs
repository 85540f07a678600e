//! BPM histograms: a track's tempo distribution as bucket -> weight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Slack allowed on the total weight for float rounding in analyzer output.
const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum HistogramError {
    #[error("Invalid BPM bucket {0}")]
    InvalidBpm(String),
    #[error("Invalid weight {weight} for bucket {bpm}")]
    InvalidWeight { bpm: f64, weight: f64 },
    #[error("Duplicate BPM bucket {0}")]
    DuplicateBucket(f64),
    #[error("Histogram weights sum to {0}, expected at most 1")]
    WeightOverflow(f64),
}

/// Buckets are kept sorted by BPM. Every weight is non-negative and the
/// total is at most 1.
///
/// Serialized as a JSON object keyed by the BPM value, matching the
/// documents the seed data uses: `{"90": 0.9, "181": 0.1}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, f64>",
    into = "BTreeMap<String, f64>"
)]
pub struct Histogram {
    bins: Vec<(f64, f64)>,
}

impl Histogram {
    pub fn new<I>(bins: I) -> Result<Self, HistogramError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bins: Vec<(f64, f64)> = bins.into_iter().collect();
        for &(bpm, weight) in &bins {
            if !bpm.is_finite() || bpm <= 0.0 {
                return Err(HistogramError::InvalidBpm(bpm.to_string()));
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(HistogramError::InvalidWeight { bpm, weight });
            }
        }
        bins.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(pair) = bins.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(HistogramError::DuplicateBucket(pair[0].0));
        }

        let total: f64 = bins.iter().map(|(_, w)| w).sum();
        if total > 1.0 + WEIGHT_EPSILON {
            return Err(HistogramError::WeightOverflow(total));
        }
        Ok(Self { bins })
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.bins.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.bins.iter().map(|(_, w)| w).sum()
    }

    /// Heaviest bucket; the lower BPM wins ties.
    pub fn dominant(&self) -> Option<(f64, f64)> {
        self.bins
            .iter()
            .copied()
            .fold(None, |best: Option<(f64, f64)>, bin| match best {
                Some(b) if b.1 >= bin.1 => Some(b),
                _ => Some(bin),
            })
    }
}

impl TryFrom<BTreeMap<String, f64>> for Histogram {
    type Error = HistogramError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        let bins = map
            .into_iter()
            .map(|(key, weight)| {
                key.trim()
                    .parse::<f64>()
                    .map(|bpm| (bpm, weight))
                    .map_err(|_| HistogramError::InvalidBpm(key))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Histogram::new(bins)
    }
}

impl From<Histogram> for BTreeMap<String, f64> {
    fn from(histogram: Histogram) -> Self {
        histogram
            .bins
            .into_iter()
            .map(|(bpm, weight)| (bpm.to_string(), weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_seed_document() {
        let histogram: Histogram = serde_json::from_str(r#"{"90": 0.9, "181": 0.1}"#).unwrap();

        assert_eq!(histogram.len(), 2);
        assert_eq!(histogram.iter().collect::<Vec<_>>(), vec![(90.0, 0.9), (181.0, 0.1)]);
        assert_eq!(histogram.dominant(), Some((90.0, 0.9)));
        assert!((histogram.total_weight() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_serializes_with_bpm_keys() {
        let histogram = Histogram::new(vec![(181.0, 0.1), (90.5, 0.4)]).unwrap();
        let json = serde_json::to_value(&histogram).unwrap();

        assert_eq!(json, serde_json::json!({"90.5": 0.4, "181": 0.1}));
    }

    #[test]
    fn test_rejects_weights_over_one() {
        let err = Histogram::new(vec![(90.0, 0.7), (180.0, 0.5)]).unwrap_err();
        assert!(matches!(err, HistogramError::WeightOverflow(_)));
    }

    #[test]
    fn test_rejects_negative_weight_and_bad_bpm() {
        assert!(matches!(
            Histogram::new(vec![(90.0, -0.1)]),
            Err(HistogramError::InvalidWeight { .. })
        ));
        assert!(matches!(
            Histogram::new(vec![(0.0, 0.1)]),
            Err(HistogramError::InvalidBpm(_))
        ));
        assert!(matches!(
            Histogram::new(vec![(f64::NAN, 0.1)]),
            Err(HistogramError::InvalidBpm(_))
        ));
        assert!(serde_json::from_str::<Histogram>(r#"{"fast": 0.5}"#).is_err());
    }

    #[test]
    fn test_rejects_duplicate_buckets() {
        assert_eq!(
            Histogram::new(vec![(120.0, 0.2), (120.0, 0.3)]),
            Err(HistogramError::DuplicateBucket(120.0))
        );
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::default();
        assert!(histogram.is_empty());
        assert_eq!(histogram.dominant(), None);
        assert_eq!(histogram.total_weight(), 0.0);
    }
}
