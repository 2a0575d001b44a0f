use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One EMA step. The first observation seeds the average.
#[inline]
pub fn ema_step(prev: Option<f64>, raw: f64, alpha: f64) -> f64 {
    match prev {
        None => raw,
        Some(p) => p + alpha * (raw - p),
    }
}

/// Smoothed score per miner hotkey, carried across cycles.
///
/// Miners missing from a cycle keep their value; only `deregister` or
/// `retain_registered` remove an entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmaBook {
    values: BTreeMap<String, f64>,
}

impl EmaBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hotkey: &str) -> Option<f64> {
        self.values.get(hotkey).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn insert(&mut self, hotkey: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(hotkey.into(), value)
    }

    pub fn update(&mut self, hotkey: &str, raw: f64, alpha: f64) -> f64 {
        let next = ema_step(self.get(hotkey), raw, alpha);
        self.values.insert(hotkey.to_string(), next);
        next
    }

    /// Apply a whole cycle of raw scores.
    pub fn apply_cycle(&mut self, raw_scores: &BTreeMap<String, f64>, alpha: f64) {
        for (hotkey, raw) in raw_scores {
            self.update(hotkey, *raw, alpha);
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn deregister(&mut self, hotkey: &str) -> Option<f64> {
        self.values.remove(hotkey)
    }

    /// Drop every miner not in `registered`. Returns how many were removed.
    pub fn retain_registered(&mut self, registered: &BTreeSet<String>) -> usize {
        let before = self.values.len();
        self.values.retain(|k, _| registered.contains(k));
        before - self.values.len()
    }
}

impl FromIterator<(String, f64)> for EmaBook {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn first_observation_seeds() {
        let mut book = EmaBook::new();
        assert_eq!(book.update("a", 0.8, 0.1), 0.8);
    }

    #[test]
    fn constant_input_is_exactly_steady() {
        let mut book = EmaBook::new();
        for _ in 0..50 {
            book.update("a", 0.7331, 0.1);
            assert_eq!(book.get("a"), Some(0.7331));
        }
    }

    #[test]
    fn alternating_input_stays_between_previous_and_raw() {
        let mut book = EmaBook::new();
        book.update("a", 0.0, 0.1);
        for k in 1..200 {
            let prev = book.get("a").unwrap();
            let r = (k % 2) as f64;
            let next = book.update("a", r, 0.1);
            assert!(next > prev.min(r) && next < prev.max(r));
            assert_ne!(next, 0.5);
        }
    }

    #[test]
    fn absent_miner_keeps_value() {
        let mut book = EmaBook::new();
        book.apply_cycle(&raw(&[("a", 1.0), ("b", 0.4)]), 0.1);
        book.apply_cycle(&raw(&[("a", 0.0)]), 0.1);
        assert_eq!(book.get("b"), Some(0.4));
        assert!((book.get("a").unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn retain_drops_unregistered() {
        let mut book: EmaBook = [("a".to_string(), 1.0), ("b".to_string(), 2.0)]
            .into_iter()
            .collect();
        let registered: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(book.retain_registered(&registered), 1);
        assert_eq!(book.get("b"), None);
        assert_eq!(book.deregister("a"), Some(1.0));
        assert!(book.is_empty());
    }
}
