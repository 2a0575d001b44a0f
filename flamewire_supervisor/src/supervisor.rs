//! Sharded scoring supervisor.
//!
//! - owns per-miner EMA state
//! - runs the core scorer, aggregator and weight publisher over one cycle
//! - commits the cycle's EMA updates in one step
//!
//! No IO. Concurrency-safe by sharding state by miner hotkey.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use flamewire_core::{
    aggregate_all, publish_weights, score_nodes, AggregateError, CohortMinMax, EmaBook,
    LatencyScorer, MinerBreakdown, NodeCycleScore, NodeKey, NodeWindow, RegionCensus,
    RegionPolicy, ScoringCfg, WeightVector,
};

/// One cycle's worth of collected probe data.
#[derive(Clone, Debug, Default)]
pub struct CycleBatch {
    pub windows: Vec<NodeWindow>,
    /// Network-wide census. When absent it is derived from `windows`.
    pub census: Option<RegionCensus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedNode {
    pub key: NodeKey,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinerFailure {
    pub hotkey: String,
    pub reason: String,
}

/// Everything a cycle produced, for logging, export and submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub census: RegionCensus,
    pub node_scores: Vec<NodeCycleScore>,
    pub skipped_nodes: Vec<SkippedNode>,
    pub miners: Vec<MinerBreakdown>,
    pub failed_miners: Vec<MinerFailure>,
    /// EMA per miner after this cycle's commit.
    pub emas: BTreeMap<String, f64>,
    pub weights: Option<WeightVector>,
    pub weight_error: Option<String>,
}

impl CycleReport {
    pub fn raw_score(&self, hotkey: &str) -> Option<f64> {
        self.miners.iter().find(|m| m.hotkey == hotkey).map(|m| m.total)
    }
}

/// Snapshot of supervisor state for storage-agnostic persistence.
///
/// This is pure data: callers decide how/where to store it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmaSnapshot {
    /// Per-miner smoothed score, sorted by hotkey.
    pub emas: Vec<(String, f64)>,
}

/// Simple observability counters returned by restore/import operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreStats {
    /// Number of miner entries applied from the snapshot/iterator.
    pub applied: usize,
    /// Number of existing miner entries that were overwritten.
    pub overwritten: usize,
}

#[derive(Default, Debug)]
struct Shard {
    book: EmaBook,
}

/// Deterministic FNV-1a hash (stable across runs).
fn fnv1a_u64(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

fn shard_index(hotkey: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    (fnv1a_u64(hotkey) as usize) % shard_count
}

/// Owns the scoring policy and the persistent per-miner EMA state.
pub struct ScoringSupervisor {
    cfg: ScoringCfg,
    policy: RegionPolicy,
    latency: Box<dyn LatencyScorer + Send + Sync>,
    shards: usize,
    state_shards: Vec<Mutex<Shard>>,
    // Serializes EMA commits so two cycles never interleave their updates.
    commit_lock: Mutex<()>,
    cycles: AtomicU64,
}

impl std::fmt::Debug for ScoringSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringSupervisor")
            .field("cfg", &self.cfg)
            .field("policy", &self.policy)
            .field("shards", &self.shards)
            .finish_non_exhaustive()
    }
}

impl ScoringSupervisor {
    /// Create a supervisor with `shards` state partitions and the default latency comparator.
    pub fn new(shards: usize, cfg: ScoringCfg) -> Self {
        let shards = shards.max(1);
        let mut state_shards = Vec::with_capacity(shards);
        for _ in 0..shards {
            state_shards.push(Mutex::new(Shard::default()));
        }

        Self {
            cfg,
            policy: RegionPolicy::default(),
            latency: Box::new(CohortMinMax),
            shards,
            state_shards,
            commit_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: RegionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_latency_scorer<L: LatencyScorer + Send + Sync + 'static>(mut self, scorer: L) -> Self {
        self.latency = Box::new(scorer);
        self
    }

    pub fn cfg(&self) -> &ScoringCfg {
        &self.cfg
    }

    pub fn policy(&self) -> &RegionPolicy {
        &self.policy
    }

    fn lock_shard(&self, idx: usize) -> std::sync::MutexGuard<'_, Shard> {
        self.state_shards[idx]
            .lock()
            .expect("scoring supervisor shard mutex poisoned")
    }

    pub fn ema(&self, hotkey: &str) -> Option<f64> {
        let idx = shard_index(hotkey, self.shards);
        self.lock_shard(idx).book.get(hotkey)
    }

    /// Export all `(hotkey, ema)` pairs as a plain snapshot.
    ///
    /// Deterministic ordering: entries are returned sorted by hotkey.
    pub fn snapshot(&self) -> EmaSnapshot {
        self.snapshot_filtered(|_, _| true)
    }

    /// Export a snapshot filtered by a caller-provided predicate.
    pub fn snapshot_filtered<F>(&self, mut predicate: F) -> EmaSnapshot
    where
        F: FnMut(&str, f64) -> bool,
    {
        let mut out: Vec<(String, f64)> = Vec::new();

        // Lock shards in a stable order.
        for idx in 0..self.shards {
            let guard = self.lock_shard(idx);
            for (k, v) in guard.book.iter() {
                if predicate(k, v) {
                    out.push((k.to_string(), v));
                }
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        EmaSnapshot { emas: out }
    }

    /// Snapshot containing only the provided hotkeys.
    pub fn snapshot_miners(&self, hotkeys: &[&str]) -> EmaSnapshot {
        let want: HashSet<&str> = hotkeys.iter().copied().collect();
        self.snapshot_filtered(|id, _| want.contains(id))
    }

    /// Replace all state with the snapshot's entries.
    pub fn restore(&self, snap: EmaSnapshot) -> RestoreStats {
        self.import_state(snap.emas)
    }

    /// Merge a snapshot into the current state without clearing it first.
    /// Snapshot entries overwrite existing entries with the same hotkey.
    pub fn restore_merge(&self, snap: EmaSnapshot) -> RestoreStats {
        self.import_state_merge(snap.emas)
    }

    /// Import `(hotkey, ema)` pairs, overwriting any existing state.
    pub fn import_state<I>(&self, iter: I) -> RestoreStats
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let _commit = self.commit_lock.lock().expect("scoring supervisor commit mutex poisoned");
        for idx in 0..self.shards {
            self.lock_shard(idx).book.clear();
        }
        self.insert_all(iter)
    }

    /// Import `(hotkey, ema)` pairs without clearing existing state.
    pub fn import_state_merge<I>(&self, iter: I) -> RestoreStats
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let _commit = self.commit_lock.lock().expect("scoring supervisor commit mutex poisoned");
        self.insert_all(iter)
    }

    fn insert_all<I>(&self, iter: I) -> RestoreStats
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut stats = RestoreStats::default();
        for (hotkey, ema) in iter {
            if !ema.is_finite() {
                warn!(%hotkey, ema, "ignoring non-finite EMA in restored state");
                continue;
            }
            let idx = shard_index(&hotkey, self.shards);
            if self.lock_shard(idx).book.insert(hotkey, ema).is_some() {
                stats.overwritten += 1;
            }
            stats.applied += 1;
        }
        stats
    }

    /// Forget a miner (deregistered or hotkey replaced).
    pub fn clear_miner(&self, hotkey: &str) -> Option<f64> {
        let idx = shard_index(hotkey, self.shards);
        self.lock_shard(idx).book.deregister(hotkey)
    }

    /// Drop every miner not in `registered`. Returns how many were removed.
    pub fn retain_registered(&self, registered: &BTreeSet<String>) -> usize {
        let _commit = self.commit_lock.lock().expect("scoring supervisor commit mutex poisoned");
        let mut removed = 0;
        for idx in 0..self.shards {
            removed += self.lock_shard(idx).book.retain_registered(registered);
        }
        removed
    }

    /// Score one cycle and commit its EMA updates.
    ///
    /// Nodes without probes are skipped and miners that fail aggregation are
    /// reported; neither stops the rest of the cycle. The EMA commit happens
    /// once, after every miner has been aggregated.
    pub fn score_cycle(&self, batch: &CycleBatch) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();

        // 1) Node scores.
        let mut node_scores = Vec::with_capacity(batch.windows.len());
        let mut skipped_nodes = Vec::new();
        for res in score_nodes(&batch.windows, self.latency.as_ref(), self.cfg.unverified) {
            match res {
                Ok(s) => node_scores.push(s),
                Err(e) => {
                    debug!(cycle, error = %e, "node skipped");
                    skipped_nodes.push(SkippedNode {
                        key: e.key().clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // 2) Census: supplied by the registry, or the cycle's own population.
        let census = batch
            .census
            .clone()
            .unwrap_or_else(|| RegionCensus::from_regions(batch.windows.iter().map(|w| w.region)));

        // 3) Aggregate per miner; failures stay isolated.
        let mut miners = Vec::new();
        let mut failed_miners = Vec::new();
        let mut raw: BTreeMap<String, f64> = BTreeMap::new();
        for (hotkey, res) in aggregate_all(&node_scores, &census, &self.policy) {
            match res {
                Ok(b) => {
                    if !b.undefined_regions.is_empty() {
                        warn!(cycle, %hotkey, regions = ?b.undefined_regions, "zero regional share, region contributes nothing");
                    }
                    raw.insert(hotkey, b.total);
                    miners.push(b);
                }
                Err(e) => {
                    warn!(cycle, %hotkey, error = %e, "miner aggregation failed");
                    failed_miners.push(MinerFailure { hotkey, reason: e.to_string() });
                }
            }
        }
        let scored: HashSet<&str> = node_scores.iter().map(|s| s.key.miner.as_str()).collect();
        let unscored: BTreeSet<&str> = batch
            .windows
            .iter()
            .map(|w| w.key.miner.as_str())
            .filter(|m| !scored.contains(m))
            .collect();
        for hotkey in unscored {
            let e = AggregateError::NoScoredNodes(hotkey.to_string());
            warn!(cycle, %hotkey, "miner has no scored nodes; EMA left unchanged");
            failed_miners.push(MinerFailure {
                hotkey: hotkey.to_string(),
                reason: e.to_string(),
            });
        }

        // 4) Commit EMA for every miner with a fresh raw score.
        self.commit(&raw);

        // 5) Weights over the full EMA state.
        let emas: BTreeMap<String, f64> = self.snapshot().emas.into_iter().collect();
        let (weights, weight_error) =
            match publish_weights(emas.iter().map(|(k, v)| (k.as_str(), *v)), self.cfg.weight_budget) {
                Ok(w) => (Some(w), None),
                Err(e) => {
                    warn!(cycle, error = %e, "no weights published");
                    (None, Some(e.to_string()))
                }
            };

        info!(
            cycle,
            nodes = node_scores.len(),
            skipped = skipped_nodes.len(),
            miners = miners.len(),
            failed = failed_miners.len(),
            "cycle scored"
        );

        CycleReport {
            cycle,
            started_at,
            census,
            node_scores,
            skipped_nodes,
            miners,
            failed_miners,
            emas,
            weights,
            weight_error,
        }
    }

    fn commit(&self, raw: &BTreeMap<String, f64>) {
        let _commit = self.commit_lock.lock().expect("scoring supervisor commit mutex poisoned");

        let mut per_shard: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); self.shards];
        for (hotkey, r) in raw {
            per_shard[shard_index(hotkey, self.shards)].insert(hotkey.clone(), *r);
        }
        for (idx, cycle_raw) in per_shard.iter().enumerate() {
            if cycle_raw.is_empty() {
                continue;
            }
            self.lock_shard(idx).book.apply_cycle(cycle_raw, self.cfg.alpha);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_index_is_stable() {
        assert_eq!(shard_index("5F3sa2TJ", 1), 0);
        let a = shard_index("5F3sa2TJ", 8);
        assert_eq!(a, shard_index("5F3sa2TJ", 8));
        assert!(a < 8);
    }

    #[test]
    fn restore_replaces_and_merge_overwrites() {
        let sup = ScoringSupervisor::new(4, ScoringCfg::default());
        sup.import_state(vec![("a".to_string(), 0.5), ("b".to_string(), 0.2)]);

        let stats = sup.restore_merge(EmaSnapshot { emas: vec![("b".into(), 0.9), ("c".into(), 0.1)] });
        assert_eq!(stats, RestoreStats { applied: 2, overwritten: 1 });
        assert_eq!(sup.ema("a"), Some(0.5));
        assert_eq!(sup.ema("b"), Some(0.9));

        let stats = sup.restore(EmaSnapshot { emas: vec![("z".into(), 0.3), ("bad".into(), f64::NAN)] });
        assert_eq!(stats, RestoreStats { applied: 1, overwritten: 0 });
        assert_eq!(sup.snapshot().emas, vec![("z".to_string(), 0.3)]);
    }

    #[test]
    fn snapshot_is_sorted() {
        let sup = ScoringSupervisor::new(3, ScoringCfg::default());
        sup.import_state(vec![("c".to_string(), 3.0), ("a".to_string(), 1.0), ("b".to_string(), 2.0)]);
        let keys: Vec<String> = sup.snapshot().emas.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(sup.snapshot_miners(&["b"]).emas, vec![("b".to_string(), 2.0)]);
    }

    #[test]
    fn commit_updates_book_and_registry_prunes_it() {
        let sup = ScoringSupervisor::new(4, ScoringCfg::default());
        sup.import_state(vec![("a".to_string(), 0.5)]);

        let raw: BTreeMap<String, f64> = [("a".to_string(), 1.0), ("b".to_string(), 0.4)].into_iter().collect();
        sup.commit(&raw);
        assert!((sup.ema("a").unwrap() - 0.55).abs() < 1e-12);
        assert_eq!(sup.ema("b"), Some(0.4));

        let registered: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(sup.retain_registered(&registered), 1);
        assert_eq!(sup.ema("b"), None);
        assert!((sup.clear_miner("a").unwrap() - 0.55).abs() < 1e-12);
        assert!(sup.snapshot().emas.is_empty());
    }
}
