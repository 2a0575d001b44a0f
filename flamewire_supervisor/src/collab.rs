//! Seams to the outside world: node probing, the registry and chain submission.
//!
//! Implementations live outside this crate; the supervisor only drives them.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flamewire_core::{ProbeOutcome, Region, RegionCensus, WeightVector};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("registry unavailable: {0}")]
    Registry(String),
    #[error("weight submission rejected: {0}")]
    Submission(String),
}

/// A node to probe this cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTarget {
    pub miner_hotkey: String,
    pub node_id: String,
    pub region: Region,
}

impl NodeTarget {
    pub fn new(miner_hotkey: impl Into<String>, node_id: impl Into<String>, region: Region) -> Self {
        Self {
            miner_hotkey: miner_hotkey.into(),
            node_id: node_id.into(),
            region,
        }
    }
}

/// What a single probe observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeSample {
    pub healthy: bool,
    /// `Some(false)` when the node answered with data that does not match the reference.
    pub correct: Option<bool>,
    pub latency: Option<Duration>,
}

impl ProbeSample {
    pub fn into_outcome(self, target: &NodeTarget, at: DateTime<Utc>) -> ProbeOutcome {
        ProbeOutcome {
            node_id: target.node_id.clone(),
            region: target.region,
            timestamp: at,
            health_check_passed: self.healthy,
            correctness_check_passed: self.correct,
            latency: if self.healthy { self.latency } else { None },
        }
    }
}

/// Issues one probe (health plus reference check) against one node.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `round` numbers the reference checks issued to the node this cycle.
    async fn probe(&self, target: &NodeTarget, round: u32) -> Result<ProbeSample, CollaboratorError>;
}

/// The node population at the start of a cycle.
#[derive(Clone, Debug, Default)]
pub struct Population {
    pub targets: Vec<NodeTarget>,
    /// Network-wide census; derived from `targets` when absent.
    pub census: Option<RegionCensus>,
    /// Currently registered hotkeys. When present, EMA entries for anyone
    /// else are dropped before scoring.
    pub registered: Option<BTreeSet<String>>,
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn population(&self) -> Result<Population, CollaboratorError>;
}

/// Chain-submission collaborator.
#[async_trait]
pub trait WeightSink: Send + Sync {
    async fn submit(&self, weights: &WeightVector) -> Result<(), CollaboratorError>;
}
