//! Domain types for the healgrid control loop.
//!
//! `MetricSnapshot` and `PredictionResult` are produced outside the core
//! (metrics collection and the latency model) and are treated as
//! immutable. `Action` and `ActionResult` are created and consumed by the
//! decision engine, orchestrator, and tracker.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult};

/// Logical API route being monitored and healed.
pub type Endpoint = String;

// ── Observations ───────────────────────────────────────────────────

/// Point-in-time metrics for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub endpoint: Endpoint,
    pub request_count: u64,
    pub latency_ms: f64,
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    /// CPU utilization in percent.
    pub cpu_utilization: f64,
    /// Memory utilization in percent.
    pub memory_utilization: f64,
    /// Cache hit rate (0.0–1.0), if the endpoint is cached.
    pub cache_hit_rate: Option<f64>,
}

/// Latency forecast for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub timestamp: DateTime<Utc>,
    pub endpoint: Endpoint,
    pub predicted_latency: f64,
    /// `(low, high)` with `low <= high`.
    pub confidence_interval: (f64, f64),
    /// Risk of degradation (0.0–1.0).
    pub risk_level: f64,
}

impl PredictionResult {
    /// Build a prediction stamped with the current time.
    ///
    /// The interval is reordered so `low <= high` and the risk level is
    /// clamped into `[0, 1]`.
    pub fn new(
        endpoint: &str,
        predicted_latency: f64,
        confidence_interval: (f64, f64),
        risk_level: f64,
    ) -> Self {
        let (a, b) = confidence_interval;
        Self {
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            predicted_latency,
            confidence_interval: (a.min(b), a.max(b)),
            risk_level: risk_level.clamp(0.0, 1.0),
        }
    }
}

// ── Actions ────────────────────────────────────────────────────────

/// Class of mitigation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Scale,
    CircuitBreak,
    AdjustCache,
    AdjustLoadBalancer,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Scale => "scale",
            ActionType::CircuitBreak => "circuit_break",
            ActionType::AdjustCache => "adjust_cache",
            ActionType::AdjustLoadBalancer => "adjust_load_balancer",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Free-form action parameters, as written in a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionParameters(Map<String, Value>);

impl ActionParameters {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric parameter, or `default` when absent.
    pub fn f64_or(&self, key: &str, default: f64) -> ConfigResult<f64> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| invalid(key, "expected a number")),
        }
    }

    /// Non-negative integer parameter, or `default` when absent.
    ///
    /// Whole floats (`5000.0`) are accepted.
    pub fn u64_or(&self, key: &str, default: u64) -> ConfigResult<u64> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => {
                if let Some(n) = v.as_u64() {
                    return Ok(n);
                }
                match v.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
                    _ => Err(invalid(key, "expected a non-negative integer")),
                }
            }
        }
    }

    /// String parameter, or `default` when absent.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> ConfigResult<&'a str> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_str().ok_or_else(|| invalid(key, "expected a string")),
        }
    }

    /// Map of name → number (e.g. server weights); empty when absent.
    pub fn f64_map(&self, key: &str) -> ConfigResult<HashMap<String, f64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(HashMap::new()),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(name, v)| {
                    v.as_f64()
                        .map(|w| (name.clone(), w))
                        .ok_or_else(|| invalid(key, &format!("value for `{name}` is not a number")))
                })
                .collect(),
            Some(_) => Err(invalid(key, "expected a table of numbers")),
        }
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// One invocation of a mitigation. Never reused across invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target_endpoint: Endpoint,
    pub parameters: ActionParameters,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Action {
    /// Create a pending action with a fresh id.
    pub fn new(action_type: ActionType, target_endpoint: &str, parameters: ActionParameters) -> Self {
        Self {
            id: format!("action_{}", Uuid::new_v4().simple()),
            action_type,
            target_endpoint: target_endpoint.to_string(),
            parameters,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action: Action,
    pub metrics_before: MetricSnapshot,
    /// Metrics observed after the action; `None` on failure.
    pub metrics_after: Option<MetricSnapshot>,
    pub success: bool,
    pub duration_ms: f64,
    pub side_effects: Vec<String>,
}

// ── Circuit breaker ────────────────────────────────────────────────

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; requests are rejected.
    Open,
    /// Probing recovery with a limited number of requests.
    HalfOpen,
}

// ── Load balancing ─────────────────────────────────────────────────

/// Health of a backend server as reported by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Backend selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingAlgorithm {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    ResponseTime,
}

impl LoadBalancingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingAlgorithm::RoundRobin => "round_robin",
            LoadBalancingAlgorithm::LeastConnections => "least_connections",
            LoadBalancingAlgorithm::WeightedRoundRobin => "weighted_round_robin",
            LoadBalancingAlgorithm::ResponseTime => "response_time",
        }
    }
}

impl FromStr for LoadBalancingAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Self::RoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "weighted_round_robin" => Ok(Self::WeightedRoundRobin),
            "response_time" => Ok(Self::ResponseTime),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for LoadBalancingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend behind an endpoint's load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendServer {
    pub id: String,
    pub address: String,
    pub health: ServerHealth,
    pub active_connections: u32,
    pub response_time_ms: f64,
    /// Share of traffic in `[0, 1]`.
    pub weight: f64,
}

impl BackendServer {
    /// A healthy, idle server with full weight.
    pub fn new(id: &str, address: &str) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            health: ServerHealth::Healthy,
            active_connections: 0,
            response_time_ms: 0.0,
            weight: 1.0,
        }
    }
}
