//! Routes actions to their executors.
//!
//! Each `Action` runs at most once at a time: the id is checked and
//! inserted into the in-flight set atomically, and a drop guard removes
//! it again however execution ends. Executor failures become a failed
//! [`ActionResult`]; only malformed parameters surface as `Err`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use healgrid_core::{
    Action, ActionResult, ActionStatus, ActionType, ConfigResult, HealConfig, LoadBalancingAlgorithm,
    MetricSnapshot,
};

use crate::cache::{CacheManager, CacheOutcome};
use crate::circuit_breaker::{CircuitBreaker, CircuitConfig};
use crate::driver::{CacheBackend, LoadBalancerDriver, MetricsSource, ScalingDriver};
use crate::error::{ActionError, ExecResult};
use crate::load_balancer::LoadBalancer;
use crate::memory::InMemoryInfrastructure;
use crate::scaler::{AutoScaler, ScaleOutcome};

/// The drivers the executors act through.
#[derive(Clone)]
pub struct Infrastructure {
    pub scaling: Arc<dyn ScalingDriver>,
    pub cache: Arc<dyn CacheBackend>,
    pub load_balancer: Arc<dyn LoadBalancerDriver>,
    pub metrics: Arc<dyn MetricsSource>,
}

impl Infrastructure {
    /// Every driver backed by one in-memory double.
    pub fn in_memory(infra: Arc<InMemoryInfrastructure>) -> Self {
        Self {
            scaling: infra.clone(),
            cache: infra.clone(),
            load_balancer: infra.clone(),
            metrics: infra,
        }
    }
}

/// Parsed, defaulted parameters for one action type.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Scale {
        scale_factor: f64,
    },
    CircuitBreak(CircuitConfig),
    AdjustCache {
        ttl_seconds: u64,
        capacity: u64,
    },
    AdjustLoadBalancer {
        algorithm: LoadBalancingAlgorithm,
        weights: HashMap<String, f64>,
    },
}

impl Command {
    /// `reset_timeout` applies when the action does not set
    /// `reset_timeout_seconds`.
    fn from_action(action: &Action, reset_timeout: Duration) -> ConfigResult<Self> {
        let p = &action.parameters;
        let command = match action.action_type {
            ActionType::Scale => Command::Scale {
                scale_factor: p.f64_or("scale_factor", 1.5)?,
            },
            ActionType::CircuitBreak => Command::CircuitBreak(CircuitConfig {
                timeout_ms: p.u64_or("timeout_ms", 5000)?,
                error_threshold: p.f64_or("error_threshold", 0.5)?,
                reset_timeout: match p.get("reset_timeout_seconds").filter(|v| !v.is_null()) {
                    Some(_) => Duration::from_secs(p.u64_or("reset_timeout_seconds", 0)?),
                    None => reset_timeout,
                },
            }),
            ActionType::AdjustCache => Command::AdjustCache {
                ttl_seconds: p.u64_or("ttl_seconds", 300)?,
                capacity: p.u64_or("capacity", 1000)?,
            },
            ActionType::AdjustLoadBalancer => Command::AdjustLoadBalancer {
                algorithm: p.str_or("algorithm", "round_robin")?.parse()?,
                weights: p.f64_map("weights")?,
            },
        };
        Ok(command)
    }
}

/// Removes an action id from the in-flight set on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightGuard<'a> {
    /// Insert `id`, or `None` if it is already in flight.
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        inserted.then(|| Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct ActionOrchestrator {
    circuit_breaker: CircuitBreaker,
    scaler: AutoScaler,
    load_balancer: LoadBalancer,
    cache: CacheManager,
    metrics: Arc<dyn MetricsSource>,
    in_flight: Mutex<HashSet<String>>,
    circuit_reset_timeout: Duration,
}

impl ActionOrchestrator {
    pub fn new(infra: Infrastructure, config: &HealConfig) -> Self {
        Self {
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            scaler: AutoScaler::new(infra.scaling, config.scaler.clone()),
            load_balancer: LoadBalancer::new(infra.load_balancer, config.load_balancer.clone()),
            cache: CacheManager::new(infra.cache, config.cache.clone()),
            metrics: infra.metrics,
            in_flight: Mutex::new(HashSet::new()),
            circuit_reset_timeout: config.circuit_breaker.reset_timeout,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn scaler(&self) -> &AutoScaler {
        &self.scaler
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.load_balancer
    }

    pub fn cache_manager(&self) -> &CacheManager {
        &self.cache
    }

    /// Ids of actions currently executing.
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Run `action` against its executor.
    ///
    /// A duplicate submission is rejected before its parameters are read.
    /// Returns `Err` only for unusable parameters; executor failures and
    /// duplicates come back as a failed result.
    pub async fn execute_action(&self, mut action: Action, metrics_before: &MetricSnapshot) -> ExecResult<ActionResult> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &action.id) else {
            let err = ActionError::AlreadyInProgress(action.id.clone());
            warn!(action_id = %action.id, "action already in progress");
            action.status = ActionStatus::Failed;
            action.error_message = Some(err.to_string());
            return Ok(ActionResult {
                action,
                metrics_before: metrics_before.clone(),
                metrics_after: None,
                success: false,
                duration_ms: 0.0,
                side_effects: vec![format!("Error: {err}")],
            });
        };

        let command = Command::from_action(&action, self.circuit_reset_timeout).map_err(|e| {
            warn!(action_id = %action.id, error = %e, "rejecting action with invalid parameters");
            ActionError::Configuration(e)
        })?;

        action.status = ActionStatus::InProgress;
        info!(
            action_id = %action.id,
            action_type = %action.action_type,
            endpoint = %action.target_endpoint,
            "executing action"
        );
        let started = Instant::now();
        let outcome = self.dispatch(&action.target_endpoint, command, metrics_before).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(()) => {
                action.status = ActionStatus::Completed;
                action.completed_at = Some(Utc::now());
                let metrics_after = match self.metrics.current_metrics(&action.target_endpoint).await {
                    Ok(m) => Some(m),
                    Err(e) => {
                        warn!(endpoint = %action.target_endpoint, error = %e, "could not fetch post-action metrics");
                        None
                    }
                };
                info!(action_id = %action.id, duration_ms, "action completed");
                ActionResult {
                    action,
                    metrics_before: metrics_before.clone(),
                    metrics_after,
                    success: true,
                    duration_ms,
                    side_effects: Vec::new(),
                }
            }
            Err(err) => {
                error!(action_id = %action.id, error = %err, "action failed");
                action.status = ActionStatus::Failed;
                action.error_message = Some(err.to_string());
                ActionResult {
                    action,
                    metrics_before: metrics_before.clone(),
                    metrics_after: None,
                    success: false,
                    duration_ms,
                    side_effects: vec![format!("Error: {err}")],
                }
            }
        };
        Ok(result)
    }

    async fn dispatch(&self, endpoint: &str, command: Command, metrics: &MetricSnapshot) -> ExecResult<()> {
        match command {
            Command::Scale { scale_factor } => {
                match self.scaler.scale(endpoint, scale_factor, metrics).await? {
                    ScaleOutcome::Cooldown => debug!(%endpoint, "scale skipped: cooldown"),
                    ScaleOutcome::Unchanged { instances } => debug!(%endpoint, instances, "scale skipped: at target"),
                    ScaleOutcome::Scaled { from, to } => debug!(%endpoint, from, to, "scale applied"),
                }
            }
            Command::CircuitBreak(config) => {
                self.circuit_breaker.configure(endpoint, config).await;
            }
            Command::AdjustCache { ttl_seconds, capacity } => {
                match self.cache.adjust(endpoint, ttl_seconds, capacity).await? {
                    CacheOutcome::Cooldown => debug!(%endpoint, "cache adjustment skipped: cooldown"),
                    CacheOutcome::Adjusted {
                        warmed_batches,
                        failed_batches,
                    } => debug!(%endpoint, warmed_batches, failed_batches, "cache adjusted"),
                }
            }
            Command::AdjustLoadBalancer { algorithm, weights } => {
                self.load_balancer.apply(endpoint, algorithm, &weights).await?;
            }
        }
        Ok(())
    }

    /// Stop every executor's background loops.
    pub async fn shutdown(&self) {
        self.circuit_breaker.stop_all().await;
        self.load_balancer.stop_all().await;
        info!("action orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FailPoint;
    use healgrid_core::{ActionParameters, CircuitState, ConfigError};

    fn snapshot(endpoint: &str) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            request_count: 500,
            latency_ms: 600.0,
            error_rate: 0.02,
            cpu_utilization: 75.0,
            memory_utilization: 40.0,
            cache_hit_rate: Some(0.7),
        }
    }

    fn setup() -> (Arc<InMemoryInfrastructure>, ActionOrchestrator) {
        let infra = Arc::new(InMemoryInfrastructure::new());
        infra.set_instances("/api", 2);
        infra.set_baseline(snapshot("/api"));
        let orchestrator = ActionOrchestrator::new(Infrastructure::in_memory(infra.clone()), &HealConfig::default());
        (infra, orchestrator)
    }

    #[test]
    fn command_defaults() {
        let scale = Action::new(ActionType::Scale, "/api", ActionParameters::new());
        assert_eq!(
            Command::from_action(&scale, Duration::from_secs(60)).unwrap(),
            Command::Scale { scale_factor: 1.5 }
        );

        let circuit = Action::new(ActionType::CircuitBreak, "/api", ActionParameters::new());
        assert_eq!(
            Command::from_action(&circuit, Duration::from_secs(60)).unwrap(),
            Command::CircuitBreak(CircuitConfig {
                timeout_ms: 5000,
                error_threshold: 0.5,
                reset_timeout: Duration::from_secs(60),
            })
        );

        let cache = Action::new(ActionType::AdjustCache, "/api", ActionParameters::new());
        assert_eq!(
            Command::from_action(&cache, Duration::from_secs(60)).unwrap(),
            Command::AdjustCache {
                ttl_seconds: 300,
                capacity: 1000
            }
        );

        let lb = Action::new(ActionType::AdjustLoadBalancer, "/api", ActionParameters::new());
        assert_eq!(
            Command::from_action(&lb, Duration::from_secs(60)).unwrap(),
            Command::AdjustLoadBalancer {
                algorithm: LoadBalancingAlgorithm::RoundRobin,
                weights: HashMap::new(),
            }
        );
    }

    #[tokio::test]
    async fn scale_action_completes_with_metrics_after() {
        let (infra, orchestrator) = setup();
        let action = Action::new(
            ActionType::Scale,
            "/api",
            ActionParameters::new().with("scale_factor", 1.5),
        );

        let result = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.action.status, ActionStatus::Completed);
        assert!(result.action.completed_at.is_some());
        assert!(result.side_effects.is_empty());
        assert_eq!(infra.instances("/api"), Some(3));
        assert_eq!(result.metrics_after.unwrap().latency_ms, 400.0);
        assert!(orchestrator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn executor_failure_becomes_failed_result() {
        let (infra, orchestrator) = setup();
        infra.fail(FailPoint::SetInstances);
        let action = Action::new(ActionType::Scale, "/api", ActionParameters::new());

        let result = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.action.status, ActionStatus::Failed);
        assert!(result.action.error_message.is_some());
        assert!(result.metrics_after.is_none());
        assert_eq!(result.side_effects.len(), 1);
        assert!(result.side_effects[0].starts_with("Error: "));
        assert!(orchestrator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn duplicate_action_id_is_rejected_while_in_flight() {
        let (_infra, orchestrator) = setup();
        let action = Action::new(ActionType::Scale, "/api", ActionParameters::new());
        let guard = InFlightGuard::acquire(&orchestrator.in_flight, &action.id).unwrap();

        let result = orchestrator.execute_action(action.clone(), &snapshot("/api")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.duration_ms, 0.0);
        assert!(result.side_effects[0].contains("already in progress"));

        drop(guard);
        assert!(orchestrator.in_flight().is_empty());
        let result = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn invalid_parameters_are_an_error() {
        let (_infra, orchestrator) = setup();
        let action = Action::new(
            ActionType::AdjustLoadBalancer,
            "/api",
            ActionParameters::new().with("algorithm", "random"),
        );
        let err = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap_err();
        assert!(matches!(err, ActionError::Configuration(ConfigError::UnknownAlgorithm(_))));

        let action = Action::new(
            ActionType::Scale,
            "/api",
            ActionParameters::new().with("scale_factor", "lots"),
        );
        let err = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap_err();
        assert!(matches!(err, ActionError::Configuration(ConfigError::InvalidParameter { .. })));
        assert!(orchestrator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn missing_post_metrics_still_succeeds() {
        let (infra, orchestrator) = setup();
        infra.fail(FailPoint::Metrics);
        let action = Action::new(ActionType::AdjustCache, "/api", ActionParameters::new());

        let result = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap();
        assert!(result.success);
        assert!(result.metrics_after.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_break_configures_and_shutdown_stops_monitors() {
        let (_infra, orchestrator) = setup();
        let action = Action::new(
            ActionType::CircuitBreak,
            "/api",
            ActionParameters::new().with("error_threshold", 0.1),
        );

        let result = orchestrator.execute_action(action, &snapshot("/api")).await.unwrap();
        assert!(result.success);
        assert_eq!(orchestrator.circuit_breaker().state("/api").await, Some(CircuitState::Closed));
        assert_eq!(orchestrator.circuit_breaker().monitored_endpoints().await, vec!["/api".to_string()]);

        let lb = Action::new(ActionType::AdjustLoadBalancer, "/api", ActionParameters::new());
        assert!(orchestrator.execute_action(lb, &snapshot("/api")).await.unwrap().success);

        orchestrator.shutdown().await;
        assert!(orchestrator.circuit_breaker().monitored_endpoints().await.is_empty());
        assert!(orchestrator.load_balancer().monitored_endpoints().await.is_empty());
    }

    #[test]
    fn explicit_reset_timeout_overrides_the_configured_one() {
        let circuit = Action::new(
            ActionType::CircuitBreak,
            "/api",
            ActionParameters::new().with("reset_timeout_seconds", 30),
        );
        let Command::CircuitBreak(config) = Command::from_action(&circuit, Duration::from_secs(10)).unwrap() else {
            panic!("expected a circuit break command");
        };
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_break_uses_configured_reset_timeout() {
        let config = HealConfig::from_toml_str("[circuit_breaker]\nreset_timeout = \"10s\"\n").unwrap();
        let infra = Arc::new(InMemoryInfrastructure::new());
        infra.set_baseline(snapshot("/api"));
        let orchestrator = ActionOrchestrator::new(Infrastructure::in_memory(infra), &config);

        let action = Action::new(ActionType::CircuitBreak, "/api", ActionParameters::new());
        assert!(orchestrator.execute_action(action, &snapshot("/api")).await.unwrap().success);

        let breaker = orchestrator.circuit_breaker();
        breaker.record_result("/api", false, 10.0).await;
        assert_eq!(breaker.state("/api").await, Some(CircuitState::Open));

        // Monitor ticks at 5s, 10s, 15s: open long enough by the third.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(breaker.state("/api").await, Some(CircuitState::HalfOpen));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_is_reported_before_parameters_are_checked() {
        let (_infra, orchestrator) = setup();
        let action = Action::new(
            ActionType::AdjustLoadBalancer,
            "/api",
            ActionParameters::new().with("algorithm", "random"),
        );
        let guard = InFlightGuard::acquire(&orchestrator.in_flight, &action.id).unwrap();

        let result = orchestrator.execute_action(action.clone(), &snapshot("/api")).await.unwrap();
        assert!(!result.success);
        assert!(result.side_effects[0].contains("already in progress"));

        drop(guard);
        assert!(orchestrator.execute_action(action, &snapshot("/api")).await.is_err());
        assert!(orchestrator.in_flight().is_empty());
    }
}
