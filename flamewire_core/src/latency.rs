// ---------------------------------------------------------------------
// Latency scoring: map each node's response time to [0,1], faster = higher.
// ---------------------------------------------------------------------

/// Pluggable latency comparator.
///
/// `cohort[i]` is node i's mean latency in milliseconds, or `None` when the
/// node produced no successful sample this cycle. The returned vector has
/// the same length and order; every entry must lie in [0,1].
pub trait LatencyScorer {
    fn score_cohort(&self, cohort: &[Option<f64>]) -> Vec<f64>;
}

/// Relative speed within the cycle's cohort.
///
/// Fastest node gets 1.0, slowest 0.0, linear in between. A cohort where
/// every measured node is equally fast scores them all 1.0. Nodes without a
/// sample score 0.0.
#[derive(Clone, Copy, Debug, Default)]
pub struct CohortMinMax;

impl LatencyScorer for CohortMinMax {
    fn score_cohort(&self, cohort: &[Option<f64>]) -> Vec<f64> {
        let measured = cohort.iter().flatten().copied().filter(|v| v.is_finite());
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for v in measured {
            min = min.min(v);
            max = max.max(v);
        }
        if !min.is_finite() {
            return vec![0.0; cohort.len()];
        }

        cohort
            .iter()
            .map(|lat| match lat {
                Some(v) if v.is_finite() => {
                    if max == min {
                        1.0
                    } else {
                        ((max - v) / (max - min)).clamp(0.0, 1.0)
                    }
                }
                _ => 0.0,
            })
            .collect()
    }
}

/// Absolute thresholds, independent of the rest of the cohort.
///
/// At or under `full_credit_ms` → 1.0, at or over `zero_credit_ms` → 0.0,
/// otherwise `(zero_credit_ms - mean) / zero_credit_ms`.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdLatency {
    pub full_credit_ms: f64,
    pub zero_credit_ms: f64,
}

impl Default for ThresholdLatency {
    fn default() -> Self {
        Self {
            full_credit_ms: 2000.0,
            zero_credit_ms: 4000.0,
        }
    }
}

impl ThresholdLatency {
    fn score_one(&self, mean_ms: f64) -> f64 {
        if !mean_ms.is_finite() || self.zero_credit_ms <= 0.0 {
            return 0.0;
        }
        if mean_ms <= self.full_credit_ms {
            1.0
        } else if mean_ms >= self.zero_credit_ms {
            0.0
        } else {
            ((self.zero_credit_ms - mean_ms) / self.zero_credit_ms).clamp(0.0, 1.0)
        }
    }
}

impl LatencyScorer for ThresholdLatency {
    fn score_cohort(&self, cohort: &[Option<f64>]) -> Vec<f64> {
        cohort
            .iter()
            .map(|lat| lat.map_or(0.0, |v| self.score_one(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_spreads_linearly() {
        let s = CohortMinMax.score_cohort(&[Some(100.0), Some(150.0), Some(200.0), None]);
        assert_eq!(s, vec![1.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn min_max_equal_latencies_all_full_credit() {
        let s = CohortMinMax.score_cohort(&[Some(80.0), None, Some(80.0)]);
        assert_eq!(s, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn min_max_without_samples() {
        assert_eq!(CohortMinMax.score_cohort(&[None, None]), vec![0.0, 0.0]);
        assert!(CohortMinMax.score_cohort(&[]).is_empty());
    }

    #[test]
    fn threshold_bands() {
        let t = ThresholdLatency::default();
        let s = t.score_cohort(&[Some(1500.0), Some(3000.0), Some(4500.0), None]);
        assert_eq!(s[0], 1.0);
        assert!((s[1] - 0.25).abs() < 1e-12);
        assert_eq!(s[2], 0.0);
        assert_eq!(s[3], 0.0);
    }
}
