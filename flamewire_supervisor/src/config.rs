use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use flamewire_core::ScoringCfg;

pub const DEFAULT_STATE_PATH: &str = "flamewire_state.json";
pub const DEFAULT_LOG_FILTER: &str = "info,flamewire_supervisor=info";

/// Process-level configuration for a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Scoring parameters handed to the supervisor
    pub scoring: ScoringCfg,
    /// Where the EMA state file lives
    pub state_path: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive
    pub log_filter: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringCfg::default(),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ValidatorConfig {
    /// Load configuration from `FLAMEWIRE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let s = &mut config.scoring;

        set_parsed(&lookup, "FLAMEWIRE_ALPHA", &mut s.alpha)?;
        set_parsed(
            &lookup,
            "FLAMEWIRE_VERIFICATION_INTERVAL_SECS",
            &mut s.verification_interval_secs,
        )?;
        set_parsed(&lookup, "FLAMEWIRE_MAX_WORKERS", &mut s.max_workers)?;
        set_parsed(&lookup, "FLAMEWIRE_PROBE_TIMEOUT_SECS", &mut s.probe_timeout_secs)?;
        set_parsed(&lookup, "FLAMEWIRE_PROBE_ROUNDS", &mut s.probe_rounds)?;

        if let Some(path) = lookup("FLAMEWIRE_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        if let Some(filter) = lookup("FLAMEWIRE_LOG") {
            config.log_filter = filter;
        }

        config
            .scoring
            .validate()
            .context("invalid scoring configuration")?;
        Ok(config)
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw:?}"))?;
    }
    Ok(())
}
