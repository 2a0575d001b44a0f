//! Domain adapter layer: convert gateway statistics into `flamewire_core::NodeWindow`s.
//!
//! The gateway reports health checks as counters and verification as a
//! verdict plus latency samples. This module expands those rows into the
//! per-probe outcomes the core scores. No IO, no async.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use chrono::{DateTime, Utc};
use flamewire_core::{NodeWindow, ProbeOutcome, Region, UnknownRegion};
use std::time::Duration;

/// Health-check counters for one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStats {
    pub total: u32,
    pub passed: u32,
}

impl CheckStats {
    pub fn new(total: u32, passed: u32) -> Self {
        Self { total, passed }
    }
}

/// One node's statistics row as delivered by the probing subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub miner_hotkey: String,
    pub node_id: String,
    /// Region code ("us", "eu", "as").
    pub region: String,
    #[serde(default)]
    pub health: CheckStats,
    /// Verdict of this cycle's data verification, if one ran.
    #[serde(default)]
    pub data_verified: Option<bool>,
    /// Latency of each successful call in milliseconds.
    #[serde(default)]
    pub latencies_ms: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("node {node_id}: {source}")]
    Region {
        node_id: String,
        #[source]
        source: UnknownRegion,
    },
    #[error("node {node_id}: {passed} passed checks out of {total}")]
    Counters { node_id: String, passed: u32, total: u32 },
}

/// Trait: map a `NodeReport` into the window the core scores.
pub trait WindowBuilder {
    fn build(&self, report: &NodeReport) -> Result<NodeWindow, AdapterError>;
}

/// Default builder for gateway rows.
///
/// - `passed` healthy outcomes followed by `total - passed` failed ones
/// - latency samples attach to healthy outcomes in order; samples that are
///   negative, NaN or too large for a `Duration` are dropped
/// - the verification verdict attaches to the first outcome; a node with
///   no health checks stays empty and is excluded from the cycle
#[derive(Clone, Debug, Default)]
pub struct GatewayWindowBuilder {
    /// Timestamp stamped on the expanded outcomes; `None` = now.
    pub observed_at: Option<DateTime<Utc>>,
}

impl WindowBuilder for GatewayWindowBuilder {
    fn build(&self, report: &NodeReport) -> Result<NodeWindow, AdapterError> {
        let region: Region = report.region.parse().map_err(|source| AdapterError::Region {
            node_id: report.node_id.clone(),
            source,
        })?;
        let CheckStats { total, passed } = report.health;
        if passed > total {
            return Err(AdapterError::Counters {
                node_id: report.node_id.clone(),
                passed,
                total,
            });
        }

        let at = self.observed_at.unwrap_or_else(Utc::now);
        let mut latencies = report
            .latencies_ms
            .iter()
            .filter_map(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok());

        let mut window = NodeWindow::new(&report.miner_hotkey, &report.node_id, region);
        for i in 0..total {
            let healthy = i < passed;
            let mut o = ProbeOutcome {
                node_id: report.node_id.clone(),
                region,
                timestamp: at,
                health_check_passed: healthy,
                correctness_check_passed: None,
                latency: if healthy {
                    latencies.next()
                } else {
                    None
                },
            };
            if i == 0 {
                o.correctness_check_passed = report.data_verified;
            }
            window.push(o);
        }
        Ok(window)
    }
}

/// A report the builder refused.
#[derive(Clone, Debug)]
pub struct Rejected {
    pub report: NodeReport,
    pub error: AdapterError,
}

/// Build windows for a batch of reports, collecting the rejects instead of
/// failing the whole batch.
pub fn build_window_batch<B: WindowBuilder + ?Sized>(
    builder: &B,
    reports: &[NodeReport],
) -> (Vec<NodeWindow>, Vec<Rejected>) {
    let mut out = Vec::with_capacity(reports.len());
    let mut rejected = Vec::new();
    for r in reports {
        match builder.build(r) {
            Ok(w) => out.push(w),
            Err(error) => {
                warn!(miner = %r.miner_hotkey, node = %r.node_id, %error, "report rejected");
                rejected.push(Rejected {
                    report: r.clone(),
                    error,
                });
            }
        }
    }
    (out, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(region: &str, total: u32, passed: u32) -> NodeReport {
        NodeReport {
            miner_hotkey: "hk".into(),
            node_id: "n1".into(),
            region: region.into(),
            health: CheckStats::new(total, passed),
            data_verified: Some(true),
            latencies_ms: vec![120.0, f64::NAN, 80.0],
        }
    }

    #[test]
    fn expands_counters_into_outcomes() {
        let w = GatewayWindowBuilder::default().build(&report("EU", 4, 3)).unwrap();
        assert_eq!(w.region, Region::Eu);
        assert_eq!(w.outcomes.len(), 4);
        assert_eq!(w.outcomes.iter().filter(|o| o.health_check_passed).count(), 3);
        assert_eq!(w.outcomes[0].correctness_check_passed, Some(true));
        assert_eq!(w.outcomes[2].latency, None);
        assert!((w.mean_latency_ms().unwrap() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn batch_keeps_going_past_bad_rows() {
        let reports = vec![report("mars", 2, 2), report("us", 1, 3), report("us", 2, 1)];
        let (windows, rejected) = build_window_batch(&GatewayWindowBuilder::default(), &reports);
        assert_eq!(windows.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[0].error, AdapterError::Region { .. }));
        assert!(matches!(rejected[1].error, AdapterError::Counters { .. }));
    }

    #[test]
    fn oversized_latency_sample_is_dropped() {
        let mut r = report("us", 2, 2);
        r.latencies_ms = vec![1e30, f64::INFINITY, 250.0];
        let w = GatewayWindowBuilder::default().build(&r).unwrap();
        assert_eq!(w.outcomes.len(), 2);
        assert_eq!(w.outcomes[0].latency, Some(Duration::from_millis(250)));
        assert_eq!(w.outcomes[1].latency, None);
    }

    #[test]
    fn no_checks_means_empty_window() {
        let w = GatewayWindowBuilder::default().build(&report("as", 0, 0)).unwrap();
        assert!(w.is_empty());
    }
}
