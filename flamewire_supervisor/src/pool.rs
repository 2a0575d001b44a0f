//! Bounded probe pool.
//!
//! Every (node, round) probe runs with at most `max_workers` in flight and
//! its own deadline. `collect_windows` resolves only once every probe has
//! answered or timed out; scoring starts after that barrier.

use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use flamewire_core::{NodeWindow, ProbeOutcome};

use crate::collab::{NodeTarget, Prober};

pub async fn collect_windows<P: Prober + ?Sized>(
    prober: &P,
    targets: &[NodeTarget],
    rounds: u32,
    max_workers: usize,
    timeout: Duration,
) -> Vec<NodeWindow> {
    let jobs = targets
        .iter()
        .enumerate()
        .flat_map(|(idx, t)| (0..rounds).map(move |round| (idx, t, round)));

    let probes: Vec<BoxFuture<'_, (usize, ProbeOutcome)>> = jobs
        .map(|(idx, target, round)| {
            async move {
                let started = Utc::now();
                let outcome = match tokio::time::timeout(timeout, prober.probe(target, round)).await {
                    Ok(Ok(sample)) => sample.into_outcome(target, started),
                    Ok(Err(e)) => {
                        debug!(node = %target.node_id, round, error = %e, "probe failed");
                        ProbeOutcome::unhealthy(&target.node_id, target.region).at(started)
                    }
                    Err(_) => {
                        warn!(node = %target.node_id, round, ?timeout, "probe timed out");
                        ProbeOutcome::timed_out(&target.node_id, target.region).at(started)
                    }
                };
                (idx, outcome)
            }
            .boxed()
        })
        .collect();

    let results: Vec<(usize, ProbeOutcome)> = stream::iter(probes)
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await;

    let mut windows: Vec<NodeWindow> = targets
        .iter()
        .map(|t| NodeWindow::new(&t.miner_hotkey, &t.node_id, t.region))
        .collect();
    for (idx, outcome) in results {
        windows[idx].push(outcome);
    }
    for w in &mut windows {
        w.outcomes.sort_by_key(|o| o.timestamp);
    }
    windows
}
