pub mod probe;
pub mod latency;

pub mod node;
pub mod region;
pub mod ema;
pub mod weights;
pub mod cfg;

pub use probe::{Region, UnknownRegion, ProbeOutcome, NodeKey, NodeWindow};
pub use latency::{LatencyScorer, CohortMinMax, ThresholdLatency};

pub use node::{NodeCycleScore, NodeScoreError, MetricWeights, METRIC_WEIGHTS, score_node, score_nodes};
pub use region::{
    RegionCensus, RegionPolicy, ShareBasis, MinerBreakdown, AggregateError,
    aggregate_miner, aggregate_all, diminishing_sum,
};
pub use ema::{EmaBook, ema_step};
pub use weights::{WeightVector, WeightError, publish_weights};
pub use cfg::{ScoringCfg, UnverifiedPolicy, ConfigError};
