//! Periodic validator loop: collect, score, persist, submit.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::collab::{CollaboratorError, Prober, Registry, WeightSink};
use crate::pool::collect_windows;
use crate::store::{EmaStore, StoreError};
use crate::supervisor::{CycleBatch, CycleReport, RestoreStats, ScoringSupervisor};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("registry: {0}")]
    Registry(#[source] CollaboratorError),
    #[error("persisting state: {0}")]
    Store(#[from] StoreError),
    #[error("submitting weights: {0}")]
    Submit(#[source] CollaboratorError),
}

pub struct CycleRunner {
    supervisor: Arc<ScoringSupervisor>,
    prober: Arc<dyn Prober>,
    registry: Arc<dyn Registry>,
    sink: Arc<dyn WeightSink>,
    store: Arc<dyn EmaStore>,
}

impl CycleRunner {
    pub fn new(
        supervisor: Arc<ScoringSupervisor>,
        prober: Arc<dyn Prober>,
        registry: Arc<dyn Registry>,
        sink: Arc<dyn WeightSink>,
        store: Arc<dyn EmaStore>,
    ) -> Self {
        Self {
            supervisor,
            prober,
            registry,
            sink,
            store,
        }
    }

    pub fn supervisor(&self) -> &Arc<ScoringSupervisor> {
        &self.supervisor
    }

    /// Restore persisted EMAs. Call once before the first cycle.
    pub fn load_state(&self) -> Result<RestoreStats, StoreError> {
        let snap = self.store.load()?;
        let stats = self.supervisor.restore(snap);
        info!(applied = stats.applied, "restored EMA state");
        Ok(stats)
    }

    /// Run one full cycle.
    ///
    /// EMA state is committed before anything is persisted or submitted, so
    /// a failed save or submission leaves the in-memory state advanced.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let population = self.registry.population().await.map_err(CycleError::Registry)?;

        if let Some(registered) = &population.registered {
            let removed = self.supervisor.retain_registered(registered);
            if removed > 0 {
                info!(removed, "dropped EMA state for deregistered miners");
            }
        }

        let cfg = self.supervisor.cfg();
        let windows = collect_windows(
            self.prober.as_ref(),
            &population.targets,
            cfg.probe_rounds,
            cfg.max_workers,
            cfg.probe_timeout(),
        )
        .await;

        let report = self.supervisor.score_cycle(&CycleBatch {
            windows,
            census: population.census,
        });

        self.store.save(&self.supervisor.snapshot())?;

        match &report.weights {
            Some(w) => self.sink.submit(w).await.map_err(CycleError::Submit)?,
            None => warn!(cycle = report.cycle, "nothing to submit"),
        }
        Ok(report)
    }

    /// Run cycles every `verification_interval` until `shutdown` flips to true.
    ///
    /// A cycle still probing when shutdown arrives is dropped; its partial
    /// results never reach the EMA state.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        let mut ticker = interval(self.supervisor.cfg().verification_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            tokio::select! {
                res = self.run_cycle() => match res {
                    Ok(report) => info!(
                        cycle = report.cycle,
                        miners = report.miners.len(),
                        failed = report.failed_miners.len(),
                        "cycle complete"
                    ),
                    Err(e) => error!(error = %e, "cycle failed"),
                },
                _ = shutdown_requested(&mut shutdown) => {
                    warn!("shutdown during cycle, discarding partial results");
                }
            }
        }

        self.store.save(&self.supervisor.snapshot())?;
        info!("validator loop stopped");
        Ok(())
    }
}

/// Resolves once the flag reads true or the sender is gone; `false` updates are ignored.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            return;
        }
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}
