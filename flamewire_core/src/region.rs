//! Regional aggregation: fold a miner's node scores into one raw score.
//!
//! Per region the miner's node scores are sorted best-first and summed with
//! diminishing weights `1/k`, then scaled by the region's multiplier
//! (`target_share / actual_share`, clamped). The regional sums are added and
//! multiplied by the diversity bonus for the number of regions that actually
//! contributed score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeCycleScore;
use crate::probe::Region;

/// Network-wide node population per region, supplied by the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCensus {
    pub counts: BTreeMap<Region, u64>,
}

impl RegionCensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, region: Region, count: u64) -> Self {
        self.counts.insert(region, count);
        self
    }

    pub fn add(&mut self, region: Region) {
        *self.counts.entry(region).or_insert(0) += 1;
    }

    /// Census built from the regions of the given nodes, one count each.
    pub fn from_regions<I: IntoIterator<Item = Region>>(regions: I) -> Self {
        let mut c = Self::new();
        for r in regions {
            c.add(r);
        }
        c
    }

    pub fn count(&self, region: Region) -> u64 {
        self.counts.get(&region).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// What "actual share" of a region is measured against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareBasis {
    /// Miner's share of the region: `miner_nodes[r] / census[r]`.
    #[default]
    MinerFootprint,
    /// Region's share of the whole network: `census[r] / census.total()`.
    Network,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionPolicy {
    /// Target share per region; normalized to sum to 1 before use.
    pub targets: BTreeMap<Region, f64>,
    pub multiplier_min: f64,
    pub multiplier_max: f64,
    /// Entry `i` is the bonus for `i + 1` covered regions. Counts beyond the
    /// table use the last entry.
    pub diversity_bonus: Vec<f64>,
    pub share_basis: ShareBasis,
}

impl Default for RegionPolicy {
    fn default() -> Self {
        Self {
            targets: Region::ALL.iter().map(|r| (*r, 1.0 / 3.0)).collect(),
            multiplier_min: 0.5,
            multiplier_max: 2.0,
            diversity_bonus: vec![1.00, 1.10, 1.20],
            share_basis: ShareBasis::MinerFootprint,
        }
    }
}

impl RegionPolicy {
    /// Targets restricted to the supported regions, summing to 1.
    /// Falls back to a uniform split when no region has a positive target.
    pub fn normalized_targets(&self) -> BTreeMap<Region, f64> {
        let filtered: BTreeMap<Region, f64> = Region::ALL
            .iter()
            .map(|r| {
                let t = self.targets.get(r).copied().unwrap_or(0.0);
                (*r, if t.is_finite() { t.max(0.0) } else { 0.0 })
            })
            .collect();
        let total: f64 = filtered.values().sum();
        if total <= 0.0 {
            let uniform = 1.0 / Region::ALL.len() as f64;
            return Region::ALL.iter().map(|r| (*r, uniform)).collect();
        }
        filtered.into_iter().map(|(r, t)| (r, t / total)).collect()
    }

    /// `clamp(target / actual, min, max)`, or `None` when the share is zero.
    pub fn multiplier(&self, target: f64, actual_share: f64) -> Option<f64> {
        if !(actual_share > 0.0) {
            return None;
        }
        let raw = target / actual_share;
        Some(raw.max(self.multiplier_min).min(self.multiplier_max))
    }

    pub fn diversity_bonus(&self, covered: usize) -> f64 {
        if covered == 0 {
            return 1.0;
        }
        match self.diversity_bonus.last() {
            None => 1.0,
            Some(last) => self
                .diversity_bonus
                .get(covered - 1)
                .copied()
                .unwrap_or(*last),
        }
    }

    fn actual_share(&self, region: Region, miner_nodes: usize, census: &RegionCensus) -> f64 {
        let in_region = census.count(region);
        match self.share_basis {
            ShareBasis::Network => {
                let total = census.total();
                if total == 0 {
                    0.0
                } else {
                    in_region as f64 / total as f64
                }
            }
            ShareBasis::MinerFootprint => {
                if in_region == 0 {
                    0.0
                } else {
                    miner_nodes as f64 / in_region as f64
                }
            }
        }
    }
}

/// Sum of `scores[k-1] / k` over scores sorted best-first.
pub fn diminishing_sum(scores: &mut [f64]) -> f64 {
    scores.sort_by(|a, b| b.total_cmp(a));
    scores
        .iter()
        .enumerate()
        .map(|(i, s)| s / (i as f64 + 1.0))
        .sum()
}

/// Audit record of how a miner's raw score was formed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinerBreakdown {
    pub hotkey: String,
    /// Per-region score after diminishing returns and the regional multiplier.
    pub regional_scores: BTreeMap<Region, f64>,
    /// Per-region contribution before the multiplier.
    pub region_base_scores: BTreeMap<Region, f64>,
    /// Multiplier applied per region where the miner has nodes.
    pub region_multipliers: BTreeMap<Region, f64>,
    /// Regions where the miner has nodes but the share was zero.
    pub undefined_regions: Vec<Region>,
    pub regions_covered: usize,
    pub diversity_bonus: f64,
    /// Raw miner score for the cycle, before EMA smoothing.
    pub total: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("miner {0} has no scored nodes this cycle")]
    NoScoredNodes(String),
    #[error("miner {0} produced a non-finite raw score")]
    NonFiniteScore(String),
}

/// Aggregate one miner's scored nodes into its raw score.
pub fn aggregate_miner(
    hotkey: &str,
    nodes: &[&NodeCycleScore],
    census: &RegionCensus,
    policy: &RegionPolicy,
) -> Result<MinerBreakdown, AggregateError> {
    if nodes.is_empty() {
        return Err(AggregateError::NoScoredNodes(hotkey.to_string()));
    }

    let targets = policy.normalized_targets();
    let mut by_region: BTreeMap<Region, Vec<f64>> = BTreeMap::new();
    for n in nodes {
        by_region.entry(n.region).or_default().push(n.combined);
    }

    let mut regional_scores = BTreeMap::new();
    let mut region_base_scores = BTreeMap::new();
    let mut region_multipliers = BTreeMap::new();
    let mut undefined_regions = Vec::new();

    for region in Region::ALL {
        let Some(scores) = by_region.get_mut(&region) else {
            regional_scores.insert(region, 0.0);
            region_base_scores.insert(region, 0.0);
            continue;
        };
        let base = diminishing_sum(scores);
        region_base_scores.insert(region, base);

        let target = targets.get(&region).copied().unwrap_or(0.0);
        let share = policy.actual_share(region, scores.len(), census);
        match policy.multiplier(target, share) {
            Some(m) => {
                region_multipliers.insert(region, m);
                regional_scores.insert(region, base * m);
            }
            None => {
                undefined_regions.push(region);
                regional_scores.insert(region, 0.0);
            }
        }
    }

    let regions_covered = regional_scores.values().filter(|s| **s > 0.0).count();
    let diversity_bonus = policy.diversity_bonus(regions_covered);
    let total = regional_scores.values().sum::<f64>() * diversity_bonus;

    if !total.is_finite() {
        return Err(AggregateError::NonFiniteScore(hotkey.to_string()));
    }

    Ok(MinerBreakdown {
        hotkey: hotkey.to_string(),
        regional_scores,
        region_base_scores,
        region_multipliers,
        undefined_regions,
        regions_covered,
        diversity_bonus,
        total,
    })
}

/// Aggregate every miner present in `scores`. One miner's failure does not
/// affect the others.
pub fn aggregate_all(
    scores: &[NodeCycleScore],
    census: &RegionCensus,
    policy: &RegionPolicy,
) -> BTreeMap<String, Result<MinerBreakdown, AggregateError>> {
    let mut grouped: BTreeMap<&str, Vec<&NodeCycleScore>> = BTreeMap::new();
    for s in scores {
        grouped.entry(s.key.miner.as_str()).or_default().push(s);
    }
    grouped
        .into_iter()
        .map(|(hotkey, nodes)| {
            (
                hotkey.to_string(),
                aggregate_miner(hotkey, &nodes, census, policy),
            )
        })
        .collect()
}
