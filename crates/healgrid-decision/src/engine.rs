//! Policy evaluation.

use healgrid_core::{
    Action, ConfigError, ConfigResult, Condition, Metric, MetricSnapshot, Operator, Policy, PredictionResult,
};
use tracing::{debug, info, warn};

/// A condition with its metric and operator resolved.
#[derive(Debug, Clone, Copy)]
struct CompiledCondition {
    metric: Metric,
    operator: Operator,
    threshold: f64,
}

impl CompiledCondition {
    fn compile(condition: &Condition) -> ConfigResult<Self> {
        Ok(Self {
            metric: condition.metric.parse()?,
            operator: condition.operator.parse()?,
            threshold: condition.threshold,
        })
    }

    fn holds(&self, prediction: &PredictionResult, metrics: &MetricSnapshot) -> bool {
        self.operator.compare(metric_value(self.metric, prediction, metrics), self.threshold)
    }
}

/// Current value of `metric` for one observation.
///
/// A missing cache hit rate reads as 0.0.
fn metric_value(metric: Metric, prediction: &PredictionResult, metrics: &MetricSnapshot) -> f64 {
    match metric {
        Metric::PredictedLatency => prediction.predicted_latency,
        Metric::RiskLevel => prediction.risk_level,
        Metric::CurrentLatency => metrics.latency_ms,
        Metric::ErrorRate => metrics.error_rate,
        Metric::CpuUtilization => metrics.cpu_utilization,
        Metric::MemoryUtilization => metrics.memory_utilization,
        Metric::CacheHitRate => metrics.cache_hit_rate.unwrap_or(0.0),
    }
}

struct CompiledPolicy {
    policy: Policy,
    conditions: ConfigResult<Vec<CompiledCondition>>,
}

impl CompiledPolicy {
    fn new(policy: Policy) -> Self {
        let conditions = if policy.actions.is_empty() {
            Err(ConfigError::MissingAction(policy.id.clone()))
        } else {
            policy.conditions.iter().map(CompiledCondition::compile).collect()
        };
        Self { policy, conditions }
    }
}

pub struct DecisionEngine {
    policies: Vec<CompiledPolicy>,
}

impl DecisionEngine {
    /// Build an engine over `policies`, highest priority first.
    ///
    /// Equal priorities keep their given order.
    pub fn new(mut policies: Vec<Policy>) -> Self {
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        let policies: Vec<CompiledPolicy> = policies.into_iter().map(CompiledPolicy::new).collect();
        for p in &policies {
            if let Err(e) = &p.conditions {
                warn!(policy = %p.policy.id, error = %e, "policy will never match");
            }
        }
        info!(policies = policies.len(), "decision engine ready");
        Self { policies }
    }

    /// Policies in evaluation order.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().map(|p| &p.policy)
    }

    /// Policies that failed to compile, with the reason.
    pub fn invalid_policies(&self) -> Vec<(&str, &ConfigError)> {
        self.policies
            .iter()
            .filter_map(|p| p.conditions.as_ref().err().map(|e| (p.policy.id.as_str(), e)))
            .collect()
    }

    /// The action of the first enabled policy whose conditions all hold.
    pub fn evaluate(&self, prediction: &PredictionResult, metrics: &MetricSnapshot) -> Option<Action> {
        for compiled in self.policies.iter().filter(|p| p.policy.enabled) {
            let policy = &compiled.policy;
            let conditions = match &compiled.conditions {
                Ok(conditions) => conditions,
                Err(e) => {
                    warn!(policy = %policy.id, error = %e, "skipping policy");
                    continue;
                }
            };
            if !conditions.iter().all(|c| c.holds(prediction, metrics)) {
                continue;
            }

            let template = policy.actions.first()?;
            let action = Action::new(template.action_type, &prediction.endpoint, template.parameters.clone());
            info!(
                policy = %policy.id,
                endpoint = %prediction.endpoint,
                action_type = %action.action_type,
                action_id = %action.id,
                "policy matched"
            );
            return Some(action);
        }
        debug!(endpoint = %prediction.endpoint, "no policy matched");
        None
    }
}
