use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a node with no correctness probe in its window earns for correctness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnverifiedPolicy {
    /// Unverified data earns nothing.
    #[default]
    Fail,
    Pass,
}

impl UnverifiedPolicy {
    pub fn correctness(self) -> f64 {
        match self {
            UnverifiedPolicy::Fail => 0.0,
            UnverifiedPolicy::Pass => 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringCfg {
    /// EMA smoothing factor, in (0, 1].
    pub alpha: f64,
    pub verification_interval_secs: u64,
    pub max_workers: usize,
    pub probe_timeout_secs: u64,
    /// Reference checks issued to every node per cycle.
    pub probe_rounds: u32,
    /// Total the published weight vector sums to.
    pub weight_budget: f64,
    pub unverified: UnverifiedPolicy,
}

impl Default for ScoringCfg {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            verification_interval_secs: 480,
            max_workers: 32,
            probe_timeout_secs: 10,
            probe_rounds: 3,
            weight_budget: 1.0,
            unverified: UnverifiedPolicy::Fail,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("alpha must be in (0, 1], got {0}")]
    Alpha(f64),
    #[error("max_workers must be at least 1")]
    Workers,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("weight_budget must be finite and positive, got {0}")]
    Budget(f64),
}

impl ScoringCfg {
    pub fn verification_interval(&self) -> Duration {
        Duration::from_secs(self.verification_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Workers);
        }
        if self.verification_interval_secs == 0 {
            return Err(ConfigError::Zero("verification_interval_secs"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Zero("probe_timeout_secs"));
        }
        if self.probe_rounds == 0 {
            return Err(ConfigError::Zero("probe_rounds"));
        }
        if !(self.weight_budget.is_finite() && self.weight_budget > 0.0) {
            return Err(ConfigError::Budget(self.weight_budget));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ScoringCfg::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.verification_interval(), Duration::from_secs(480));
        assert_eq!(cfg.max_workers, 32);
    }

    #[test]
    fn alpha_bounds() {
        let mut cfg = ScoringCfg::default();
        cfg.alpha = 1.0;
        assert!(cfg.validate().is_ok());
        cfg.alpha = 0.0;
        assert_eq!(cfg.validate(), Err(ConfigError::Alpha(0.0)));
        cfg.alpha = 1.5;
        assert!(cfg.validate().is_err());
        cfg.alpha = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ScoringCfg =
            serde_json::from_str(r#"{"alpha":0.25,"unverified":"pass"}"#).unwrap();
        assert_eq!(cfg.alpha, 0.25);
        assert_eq!(cfg.unverified, UnverifiedPolicy::Pass);
        assert_eq!(cfg.max_workers, 32);
        assert_eq!(cfg.probe_rounds, 3);
    }
}
