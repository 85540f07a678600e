//! Decides whether a track's tempo histogram fits a target BPM range.

use crate::model::{BpmRange, Histogram};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Only the bucket's own BPM is tested.
    #[default]
    Exact,
    /// Also tests double and half tempo, for detectors that lock onto
    /// every other beat.
    TempoMultiples,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Minimum total weight that must fall inside the range.
    pub min_share: f64,
    pub mode: MatchMode,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_share: 0.5,
            mode: MatchMode::Exact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSummary {
    pub in_range_share: f64,
    /// Weighted mean of the in-range buckets, after tempo scaling.
    pub average_bpm: f64,
}

/// BPM the bucket counts as, if any of the tested multiples lands in range.
fn scaled_bpm(bpm: f64, range: &BpmRange, mode: MatchMode) -> Option<f64> {
    let candidates: &[f64] = match mode {
        MatchMode::Exact => &[1.0],
        MatchMode::TempoMultiples => &[1.0, 2.0, 0.5],
    };
    candidates
        .iter()
        .map(|factor| bpm * factor)
        .find(|scaled| range.contains(*scaled))
}

/// Returns the in-range summary when the histogram matches, `None` otherwise.
///
/// A histogram matches when the weight inside `range` reaches
/// `config.min_share` and is non-zero.
pub fn evaluate(histogram: &Histogram, range: &BpmRange, config: &MatchConfig) -> Option<MatchSummary> {
    let mut share = 0.0;
    let mut weighted_bpm = 0.0;
    for (bpm, weight) in histogram.iter() {
        if let Some(scaled) = scaled_bpm(bpm, range, config.mode) {
            share += weight;
            weighted_bpm += scaled * weight;
        }
    }

    if share <= 0.0 || share < config.min_share {
        return None;
    }
    Some(MatchSummary {
        in_range_share: share,
        average_bpm: weighted_bpm / share,
    })
}

pub fn matches(histogram: &Histogram, range: &BpmRange, config: &MatchConfig) -> bool {
    evaluate(histogram, range, config).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> BpmRange {
        BpmRange::new(176.0, 182.0).unwrap()
    }

    fn exact(min_share: f64) -> MatchConfig {
        MatchConfig {
            min_share,
            mode: MatchMode::Exact,
        }
    }

    fn hist(bins: &[(f64, f64)]) -> Histogram {
        Histogram::new(bins.iter().copied()).unwrap()
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        assert!(matches(&hist(&[(176.0, 1.0)]), &range(), &exact(0.5)));
        assert!(matches(&hist(&[(182.0, 1.0)]), &range(), &exact(0.5)));
        assert!(!matches(&hist(&[(175.9, 1.0)]), &range(), &exact(0.5)));
        assert!(!matches(&hist(&[(182.1, 1.0)]), &range(), &exact(0.5)));
    }

    #[test]
    fn test_threshold_decides_minor_bucket() {
        let histogram = hist(&[(90.0, 0.9), (181.0, 0.1)]);

        let summary = evaluate(&histogram, &range(), &exact(0.05)).unwrap();
        assert!((summary.in_range_share - 0.1).abs() < 1e-9);
        assert!((summary.average_bpm - 181.0).abs() < 1e-9);

        assert!(!matches(&histogram, &range(), &exact(0.5)));
    }

    #[test]
    fn test_share_equal_to_threshold_matches() {
        let histogram = hist(&[(100.0, 0.5), (180.0, 0.5)]);
        assert!(matches(&histogram, &range(), &exact(0.5)));
    }

    #[test]
    fn test_empty_or_weightless_never_matches() {
        assert!(!matches(&Histogram::default(), &range(), &exact(0.0)));
        assert!(!matches(&hist(&[(180.0, 0.0)]), &range(), &exact(0.0)));
    }

    #[test]
    fn test_tempo_multiples_fold_half_tempo() {
        let histogram = hist(&[(90.0, 0.9), (181.0, 0.1)]);
        let config = MatchConfig {
            min_share: 0.5,
            mode: MatchMode::TempoMultiples,
        };

        let summary = evaluate(&histogram, &range(), &config).unwrap();
        assert!((summary.in_range_share - 1.0).abs() < 1e-9);
        // 90 counts as 180
        assert!((summary.average_bpm - 180.1).abs() < 1e-9);

        assert!(!matches(&histogram, &range(), &exact(0.5)));
    }

    #[test]
    fn test_tempo_multiples_fold_double_tempo() {
        let slow = BpmRange::new(88.0, 92.0).unwrap();
        let config = MatchConfig {
            min_share: 0.5,
            mode: MatchMode::TempoMultiples,
        };
        let summary = evaluate(&hist(&[(180.0, 0.8)]), &slow, &config).unwrap();
        assert!((summary.average_bpm - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_counted_once() {
        // 100 and 200 both land in a wide range; the bucket still counts once
        let wide = BpmRange::new(90.0, 210.0).unwrap();
        let config = MatchConfig {
            min_share: 0.1,
            mode: MatchMode::TempoMultiples,
        };
        let summary = evaluate(&hist(&[(100.0, 0.6)]), &wide, &config).unwrap();
        assert!((summary.in_range_share - 0.6).abs() < 1e-9);
        assert!((summary.average_bpm - 100.0).abs() < 1e-9);
    }
}
