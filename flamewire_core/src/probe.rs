use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Geographic region a node is deployed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Us,
    Eu,
    As,
}

impl Region {
    /// Supported regions in their canonical order.
    pub const ALL: [Region; 3] = [Region::Us, Region::Eu, Region::As];

    pub fn code(self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::As => "as",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown region code: {0:?}")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "eu" => Ok(Region::Eu),
            "as" => Ok(Region::As),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}

/// One measurement event for one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub node_id: String,
    pub region: Region,
    pub timestamp: DateTime<Utc>,
    pub health_check_passed: bool,
    /// `None` when no correctness probe ran for this event.
    pub correctness_check_passed: Option<bool>,
    /// Only meaningful when the health check passed.
    pub latency: Option<Duration>,
}

impl ProbeOutcome {
    pub fn healthy(node_id: impl Into<String>, region: Region, latency: Duration) -> Self {
        Self {
            node_id: node_id.into(),
            region,
            timestamp: Utc::now(),
            health_check_passed: true,
            correctness_check_passed: None,
            latency: Some(latency),
        }
    }

    pub fn unhealthy(node_id: impl Into<String>, region: Region) -> Self {
        Self {
            node_id: node_id.into(),
            region,
            timestamp: Utc::now(),
            health_check_passed: false,
            correctness_check_passed: None,
            latency: None,
        }
    }

    /// Record for a probe that never answered within its deadline.
    pub fn timed_out(node_id: impl Into<String>, region: Region) -> Self {
        Self::unhealthy(node_id, region)
    }

    pub fn with_correctness(mut self, passed: bool) -> Self {
        self.correctness_check_passed = Some(passed);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Identity of a node within a cycle: the owning miner plus its node id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub miner: String,
    pub node_id: String,
}

impl NodeKey {
    pub fn new(miner: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            miner: miner.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.miner, self.node_id)
    }
}

/// All outcomes collected for one node during the current cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeWindow {
    pub key: NodeKey,
    pub region: Region,
    pub outcomes: Vec<ProbeOutcome>,
}

impl NodeWindow {
    pub fn new(miner: impl Into<String>, node_id: impl Into<String>, region: Region) -> Self {
        Self {
            key: NodeKey::new(miner, node_id),
            region,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ProbeOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Mean latency in milliseconds over successful probes that carried a sample.
    pub fn mean_latency_ms(&self) -> Option<f64> {
        let mut sum = 0.0_f64;
        let mut n = 0_u32;
        for o in &self.outcomes {
            if !o.health_check_passed {
                continue;
            }
            if let Some(lat) = o.latency {
                sum += lat.as_secs_f64() * 1000.0;
                n += 1;
            }
        }
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_case_insensitively() {
        assert_eq!("US".parse::<Region>(), Ok(Region::Us));
        assert_eq!(" eu ".parse::<Region>(), Ok(Region::Eu));
        assert_eq!("as".parse::<Region>(), Ok(Region::As));
        assert!("sa".parse::<Region>().is_err());
    }

    #[test]
    fn mean_latency_ignores_failed_probes() {
        let mut w = NodeWindow::new("miner", "n1", Region::Us);
        w.push(ProbeOutcome::healthy("n1", Region::Us, Duration::from_millis(100)));
        w.push(ProbeOutcome::healthy("n1", Region::Us, Duration::from_millis(300)));
        let mut failed = ProbeOutcome::unhealthy("n1", Region::Us);
        failed.latency = Some(Duration::from_secs(9));
        w.push(failed);

        let mean = w.mean_latency_ms().unwrap();
        assert!((mean - 200.0).abs() < 1e-9);
    }

    #[test]
    fn timed_out_probe_is_a_failed_health_check() {
        let o = ProbeOutcome::timed_out("n1", Region::As);
        assert!(!o.health_check_passed);
        assert_eq!(o.latency, None);
        assert_eq!(o.correctness_check_passed, None);
    }
}
