//! Offline cycle scorer.
//!
//! Reads one cycle of gateway node reports, scores it exactly as the
//! validator would, prints the leaders and the nodes that could not be
//! scored, and writes the full cycle report as JSON.
//!
//! Usage:
//!   score_breakdown --input cycle.json
//!   score_breakdown --input cycle.json --state emas.json --write-state --top 20

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::info;

use flamewire_core::{RegionCensus, RegionPolicy, ShareBasis, ThresholdLatency};
use flamewire_supervisor::{
    build_window_batch, init_tracing, CycleBatch, CycleReport, EmaStore, GatewayWindowBuilder,
    JsonFileStore, NodeReport, ScoringSupervisor, ValidatorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "score_breakdown")]
#[command(about = "Score one cycle of node reports and explain the result")]
struct Args {
    /// Cycle input: `{ "reports": [...], "census": {...} }`
    #[arg(long)]
    input: PathBuf,

    /// Previous EMA state to start from
    #[arg(long)]
    state: Option<PathBuf>,

    /// Save the updated EMA state back to `--state`
    #[arg(long, requires = "state")]
    write_state: bool,

    /// Where to write the cycle report
    #[arg(long, default_value = "cycle_report.json")]
    report: PathBuf,

    /// Number of miners to print
    #[arg(long, default_value = "10")]
    top: usize,

    /// What a region's actual share is measured against
    #[arg(long, value_enum, default_value = "miner-footprint")]
    share_basis: Basis,

    /// Score latency against fixed thresholds instead of the cycle's cohort
    #[arg(long)]
    threshold_latency: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Basis {
    Network,
    MinerFootprint,
}

#[derive(Debug, Deserialize)]
struct CycleInput {
    reports: Vec<NodeReport>,
    #[serde(default)]
    census: Option<RegionCensus>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ValidatorConfig::from_env()?;
    init_tracing(&config.log_filter)?;

    let raw = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let input: CycleInput = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", args.input.display()))?;

    let policy = RegionPolicy {
        share_basis: match args.share_basis {
            Basis::Network => ShareBasis::Network,
            Basis::MinerFootprint => ShareBasis::MinerFootprint,
        },
        ..RegionPolicy::default()
    };
    let mut supervisor = ScoringSupervisor::new(1, config.scoring.clone()).with_policy(policy);
    if args.threshold_latency {
        supervisor = supervisor.with_latency_scorer(ThresholdLatency::default());
    }

    let store = args.state.as_ref().map(JsonFileStore::new);
    if let Some(store) = &store {
        let stats = supervisor.restore(store.load()?);
        info!(applied = stats.applied, path = %store.path().display(), "loaded previous state");
    }

    let (windows, rejected) = build_window_batch(&GatewayWindowBuilder::default(), &input.reports);
    let report = supervisor.score_cycle(&CycleBatch {
        windows,
        census: input.census,
    });

    print_summary(&report, args.top);
    if !rejected.is_empty() {
        println!("\nrejected reports:");
        for r in &rejected {
            println!("  {}/{}: {}", r.report.miner_hotkey, r.report.node_id, r.error);
        }
    }

    let body = serde_json::to_vec_pretty(&report)?;
    fs::write(&args.report, body)
        .with_context(|| format!("writing {}", args.report.display()))?;
    println!("\nreport written to {}", args.report.display());

    if args.write_state {
        if let Some(store) = &store {
            store.save(&supervisor.snapshot())?;
        }
    }
    Ok(())
}

fn print_summary(report: &CycleReport, top: usize) {
    let mut ranked: Vec<_> = report.miners.iter().collect();
    ranked.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.hotkey.cmp(&b.hotkey)));

    println!("cycle {} ({} nodes scored, census {:?})", report.cycle, report.node_scores.len(), report.census.counts);
    println!("{:<4} {:<48} {:>8} {:>8} {:>8} {:>8}", "#", "miner", "raw", "ema", "weight", "regions");
    for (i, m) in ranked.iter().take(top).enumerate() {
        let ema = report.emas.get(&m.hotkey).copied().unwrap_or(0.0);
        let weight = report.weights.as_ref().map_or(0.0, |w| w.get(&m.hotkey));
        println!(
            "{:<4} {:<48} {:>8.4} {:>8.4} {:>8.4} {:>8}",
            i + 1,
            m.hotkey,
            m.total,
            ema,
            weight,
            m.regions_covered
        );
    }

    if !report.skipped_nodes.is_empty() {
        println!("\nunscored nodes:");
        for s in &report.skipped_nodes {
            println!("  {}: {}", s.key, s.reason);
        }
    }
    if !report.failed_miners.is_empty() {
        println!("\nfailed miners:");
        for f in &report.failed_miners {
            println!("  {}: {}", f.hotkey, f.reason);
        }
    }
    if let Some(e) = &report.weight_error {
        println!("\nno weights: {e}");
    }
}
