use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cfg::UnverifiedPolicy;
use crate::latency::LatencyScorer;
use crate::probe::{NodeKey, NodeWindow, Region};

/// Fixed policy weights for combining node metrics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricWeights {
    pub correctness: f64,
    pub uptime: f64,
    pub latency: f64,
}

pub const METRIC_WEIGHTS: MetricWeights = MetricWeights {
    correctness: 0.40,
    uptime: 0.30,
    latency: 0.30,
};

/// One node's score for one cycle. Every component lies in [0,1].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeCycleScore {
    pub key: NodeKey,
    pub region: Region,
    pub correctness: f64,
    pub uptime: f64,
    pub latency_score: f64,
    pub combined: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NodeScoreError {
    /// Nothing was collected for the node this cycle; its score is undefined.
    #[error("no probe outcomes collected for node {0}")]
    NoProbes(NodeKey),
}

impl NodeScoreError {
    pub fn key(&self) -> &NodeKey {
        match self {
            NodeScoreError::NoProbes(key) => key,
        }
    }
}

/// Zero-tolerance correctness: any failed check zeroes it.
pub fn correctness(window: &NodeWindow, policy: UnverifiedPolicy) -> f64 {
    let mut checked = false;
    for o in &window.outcomes {
        match o.correctness_check_passed {
            Some(false) => return 0.0,
            Some(true) => checked = true,
            None => {}
        }
    }
    if checked {
        1.0
    } else {
        policy.correctness()
    }
}

pub fn uptime(window: &NodeWindow) -> Result<f64, NodeScoreError> {
    let total = window.outcomes.len();
    if total == 0 {
        return Err(NodeScoreError::NoProbes(window.key.clone()));
    }
    let passed = window
        .outcomes
        .iter()
        .filter(|o| o.health_check_passed)
        .count();
    Ok(passed as f64 / total as f64)
}

#[inline]
fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

pub fn combine(correctness: f64, uptime: f64, latency_score: f64) -> f64 {
    let w = METRIC_WEIGHTS;
    let c = clamp01(correctness);
    let u = clamp01(uptime);
    let l = clamp01(latency_score);
    clamp01(w.correctness * c + w.uptime * u + w.latency * l)
}

/// Score a single window given its already-computed latency score.
pub fn score_node(
    window: &NodeWindow,
    latency_score: f64,
    policy: UnverifiedPolicy,
) -> Result<NodeCycleScore, NodeScoreError> {
    let uptime = uptime(window)?;
    let correctness = correctness(window, policy);
    let latency_score = clamp01(latency_score);

    Ok(NodeCycleScore {
        key: window.key.clone(),
        region: window.region,
        correctness,
        uptime,
        latency_score,
        combined: combine(correctness, uptime, latency_score),
    })
}

/// Score every window of the cycle.
///
/// Windows without probes come back as `Err` and are left out of the
/// latency cohort, so they never shift other nodes' relative speed.
pub fn score_nodes<L: LatencyScorer + ?Sized>(
    windows: &[NodeWindow],
    latency: &L,
    policy: UnverifiedPolicy,
) -> Vec<Result<NodeCycleScore, NodeScoreError>> {
    let scorable: Vec<&NodeWindow> = windows.iter().filter(|w| !w.is_empty()).collect();
    let cohort: Vec<Option<f64>> = scorable.iter().map(|w| w.mean_latency_ms()).collect();
    let mut latency_scores = latency.score_cohort(&cohort).into_iter();

    windows
        .iter()
        .map(|w| {
            if w.is_empty() {
                return Err(NodeScoreError::NoProbes(w.key.clone()));
            }
            let l = latency_scores.next().unwrap_or(0.0);
            score_node(w, l, policy)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;
    use std::time::Duration;

    fn window_with(health: &[bool]) -> NodeWindow {
        let mut w = NodeWindow::new("m", "n", Region::Us);
        for &ok in health {
            if ok {
                w.push(ProbeOutcome::healthy("n", Region::Us, Duration::from_millis(50)));
            } else {
                w.push(ProbeOutcome::unhealthy("n", Region::Us));
            }
        }
        w
    }

    #[test]
    fn uptime_six_of_eight() {
        let w = window_with(&[true, true, false, true, true, false, true, true]);
        assert_eq!(uptime(&w), Ok(0.75));
    }

    #[test]
    fn uptime_without_probes_is_an_error() {
        let w = window_with(&[]);
        assert!(matches!(uptime(&w), Err(NodeScoreError::NoProbes(_))));
    }

    #[test]
    fn one_failed_check_zeroes_correctness() {
        let mut w = window_with(&[true, true, true]);
        for o in w.outcomes.iter_mut() {
            o.correctness_check_passed = Some(true);
        }
        w.outcomes[1].correctness_check_passed = Some(false);
        assert_eq!(correctness(&w, UnverifiedPolicy::Pass), 0.0);
    }

    #[test]
    fn no_correctness_checks_follow_policy() {
        let w = window_with(&[true, true]);
        assert_eq!(correctness(&w, UnverifiedPolicy::Fail), 0.0);
        assert_eq!(correctness(&w, UnverifiedPolicy::Pass), 1.0);
    }

    #[test]
    fn combined_uses_fixed_weights() {
        let c = combine(1.0, 0.75, 0.5);
        assert!((c - 0.775).abs() < 1e-12);
    }

    #[test]
    fn components_are_clamped_before_combining() {
        assert_eq!(combine(2.0, 3.0, 9.0), 1.0);
        assert_eq!(combine(-1.0, f64::NAN, -0.5), 0.0);
    }
}
