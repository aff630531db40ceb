//! Trend statistics over an endpoint's recent results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Direction and noise of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    /// Least-squares slope of value against index.
    pub trend: f64,
    /// Population standard deviation.
    pub volatility: f64,
}

impl TrendStats {
    pub fn of(values: &[f64]) -> Self {
        if values.len() < 2 {
            return Self::default();
        }
        Self {
            trend: slope(values),
            volatility: std_dev(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffectCount {
    pub effect: String,
    pub frequency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Success rate of each consecutive window, oldest first.
    pub success_rate_trend: Vec<f64>,
    pub average_improvement_trend: TrendStats,
    pub duration_trend: TrendStats,
    /// Most frequent first.
    pub common_side_effects: Vec<SideEffectCount>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 { 0.0 } else { num / den }
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Fraction of `true` in each consecutive window of `size`.
pub fn windowed_rates(outcomes: &[bool], size: usize) -> Vec<f64> {
    outcomes
        .chunks(size.max(1))
        .map(|w| w.iter().filter(|ok| **ok).count() as f64 / w.len() as f64)
        .collect()
}

/// Occurrences of each effect, most frequent first, ties by text.
pub fn side_effect_frequencies<'a>(effects: impl IntoIterator<Item = &'a String>) -> Vec<SideEffectCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for effect in effects {
        *counts.entry(effect.as_str()).or_default() += 1;
    }
    let mut out: Vec<SideEffectCount> = counts
        .into_iter()
        .map(|(effect, frequency)| SideEffectCount {
            effect: effect.to_string(),
            frequency,
        })
        .collect();
    out.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.effect.cmp(&b.effect)));
    out
}
