//! Healing policies.
//!
//! A policy maps a conjunction of metric conditions to a single action
//! template. Conditions keep their metric and operator names as strings
//! so a config file can be loaded even when one policy is malformed;
//! [`Metric`] and [`Operator`] are the closed sets they compile into.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ActionParameters, ActionType};

/// A named rule: all conditions must hold for the first action to fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
    /// Only the first entry is used.
    pub actions: Vec<ActionTemplate>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub priority: i64,
}

fn enabled_by_default() -> bool {
    true
}

/// `metric operator threshold`, e.g. `predicted_latency gt 500`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub metric: String,
    pub operator: String,
    pub threshold: f64,
}

impl Condition {
    pub fn new(metric: &str, operator: &str, threshold: f64) -> Self {
        Self {
            metric: metric.to_string(),
            operator: operator.to_string(),
            threshold,
        }
    }
}

/// The action a matching policy emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTemplate {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub parameters: ActionParameters,
}

/// Values a condition can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    PredictedLatency,
    RiskLevel,
    CurrentLatency,
    ErrorRate,
    CpuUtilization,
    MemoryUtilization,
    CacheHitRate,
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "predicted_latency" => Ok(Self::PredictedLatency),
            "risk_level" => Ok(Self::RiskLevel),
            "current_latency" => Ok(Self::CurrentLatency),
            "error_rate" => Ok(Self::ErrorRate),
            "cpu_utilization" => Ok(Self::CpuUtilization),
            "memory_utilization" => Ok(Self::MemoryUtilization),
            "cache_hit_rate" => Ok(Self::CacheHitRate),
            other => Err(ConfigError::UnknownMetric(other.to_string())),
        }
    }
}

/// Comparison applied as `value <op> threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Operator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
        }
    }
}

impl FromStr for Operator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            other => Err(ConfigError::UnknownOperator(other.to_string())),
        }
    }
}

/// The built-in policy set used when a config file defines none.
///
/// - high latency + hot CPU → scale by 1.5 (priority 100)
/// - error rate above 5% → circuit break (priority 90)
/// - cache hit rate below 80% → retune the cache (priority 80)
pub fn default_policies() -> Vec<Policy> {
    vec![
        Policy {
            id: "high_latency_policy".to_string(),
            name: "High Latency Response".to_string(),
            description: "Responds to predicted high latency by scaling".to_string(),
            conditions: vec![
                Condition::new("predicted_latency", "gt", 500.0),
                Condition::new("cpu_utilization", "gt", 70.0),
            ],
            actions: vec![ActionTemplate {
                action_type: ActionType::Scale,
                parameters: ActionParameters::new()
                    .with("scale_factor", 1.5)
                    .with("min_instances", 2),
            }],
            enabled: true,
            priority: 100,
        },
        Policy {
            id: "error_spike_policy".to_string(),
            name: "Error Rate Spike Response".to_string(),
            description: "Activates circuit breaker when error rates spike".to_string(),
            conditions: vec![Condition::new("error_rate", "gt", 0.05)],
            actions: vec![ActionTemplate {
                action_type: ActionType::CircuitBreak,
                parameters: ActionParameters::new()
                    .with("timeout_ms", 5000)
                    .with("error_threshold", 0.1),
            }],
            enabled: true,
            priority: 90,
        },
        Policy {
            id: "cache_optimization_policy".to_string(),
            name: "Cache Performance Optimization".to_string(),
            description: "Optimizes cache when hit rates drop".to_string(),
            conditions: vec![Condition::new("cache_hit_rate", "lt", 0.80)],
            actions: vec![ActionTemplate {
                action_type: ActionType::AdjustCache,
                parameters: ActionParameters::new()
                    .with("ttl_seconds", 300)
                    .with("capacity", 1000),
            }],
            enabled: true,
            priority: 80,
        },
    ]
}
