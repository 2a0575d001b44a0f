use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum WeightError {
    #[error("no miners to weight")]
    NoMiners,
    #[error("weight budget must be finite and positive, got {0}")]
    InvalidBudget(f64),
}

/// Pro-rata weights per miner hotkey, summing to `budget`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub budget: f64,
    pub entries: BTreeMap<String, f64>,
}

/// Normalize smoothed scores into a weight vector.
///
/// Negative or non-finite scores count as zero. When every score is zero
/// the budget is split evenly.
pub fn publish_weights<'a, I>(emas: I, budget: f64) -> Result<WeightVector, WeightError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    if !(budget.is_finite() && budget > 0.0) {
        return Err(WeightError::InvalidBudget(budget));
    }

    let cleaned: BTreeMap<String, f64> = emas
        .into_iter()
        .map(|(k, v)| (k.to_string(), if v.is_finite() { v.max(0.0) } else { 0.0 }))
        .collect();
    if cleaned.is_empty() {
        return Err(WeightError::NoMiners);
    }

    let sum: f64 = cleaned.values().sum();
    let entries = if sum > 0.0 {
        cleaned
            .into_iter()
            .map(|(k, v)| (k, v / sum * budget))
            .collect()
    } else {
        let share = budget / cleaned.len() as f64;
        cleaned.into_keys().map(|k| (k, share)).collect()
    };

    Ok(WeightVector { budget, entries })
}

impl WeightVector {
    pub fn get(&self, hotkey: &str) -> f64 {
        self.entries.get(hotkey).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.entries.values().sum()
    }

    /// Weights in registry order; hotkeys without an entry get 0.
    pub fn aligned(&self, ordered_hotkeys: &[String]) -> Vec<f64> {
        ordered_hotkeys.iter().map(|h| self.get(h)).collect()
    }

    /// Quantize for on-chain emission as `(uid, weight)` pairs.
    ///
    /// The largest weight maps to `u16::MAX`; zero weights are dropped.
    pub fn to_u16_emit(&self, ordered_hotkeys: &[String]) -> Vec<(u16, u16)> {
        let aligned = self.aligned(ordered_hotkeys);
        let max = aligned.iter().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Vec::new();
        }
        aligned
            .iter()
            .enumerate()
            .filter_map(|(uid, w)| {
                let q = (w / max * u16::MAX as f64).round();
                if q <= 0.0 || uid > u16::MAX as usize {
                    None
                } else {
                    Some((uid as u16, q.min(u16::MAX as f64) as u16))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_rata() {
        let w = publish_weights([("a", 3.0), ("b", 1.0)], 1.0).unwrap();
        assert!((w.get("a") - 0.75).abs() < 1e-12);
        assert!((w.get("b") - 0.25).abs() < 1e-12);
        assert_eq!(w.get("c"), 0.0);
    }

    #[test]
    fn all_zero_splits_evenly() {
        let w = publish_weights([("a", 0.0), ("b", -2.0), ("c", f64::NAN)], 100.0).unwrap();
        for k in ["a", "b", "c"] {
            assert!((w.get(k) - 100.0 / 3.0).abs() < 1e-9);
        }
        assert!((w.sum() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_and_bad_budget() {
        let none: [(&str, f64); 0] = [];
        assert_eq!(publish_weights(none, 1.0), Err(WeightError::NoMiners));
        assert_eq!(
            publish_weights([("a", 1.0)], 0.0),
            Err(WeightError::InvalidBudget(0.0))
        );
    }

    #[test]
    fn aligned_and_quantized() {
        let w = publish_weights([("a", 3.0), ("b", 1.0)], 1.0).unwrap();
        let order = vec!["b".to_string(), "x".to_string(), "a".to_string()];
        let aligned = w.aligned(&order);
        assert!((aligned[0] - 0.25).abs() < 1e-12);
        assert_eq!(aligned[1], 0.0);

        let emit = w.to_u16_emit(&order);
        assert_eq!(emit, vec![(0, 21845), (2, u16::MAX)]);
    }
}
