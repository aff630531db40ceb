//! Self-healing service facade.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use healgrid_actions::{ActionOrchestrator, Infrastructure};
use healgrid_core::{ActionResult, ActionType, HealConfig, MetricSnapshot, PredictionResult};
use healgrid_decision::DecisionEngine;
use healgrid_feedback::{ActionTracker, TrendReport};

use crate::error::HealError;

/// Healing state and history for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingStatus {
    pub endpoint: String,
    pub active_healing: bool,
    pub healing_start_time: Option<DateTime<Utc>>,
    pub historical_trends: Option<TrendReport>,
    pub most_effective_action: Option<ActionType>,
}

/// Clears an endpoint's active marker on drop.
struct ActiveGuard<'a> {
    service: &'a SelfHealingService,
    endpoint: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.service.active().endpoints.remove(&self.endpoint);
        self.service.drained.notify_waiters();
    }
}

/// Running healing operations and the shutdown flag, guarded together.
#[derive(Debug, Default)]
struct ActiveSet {
    /// Endpoint to the time its healing operation started.
    endpoints: HashMap<String, DateTime<Utc>>,
    shutting_down: bool,
}

pub struct SelfHealingService {
    engine: DecisionEngine,
    orchestrator: ActionOrchestrator,
    tracker: ActionTracker,
    active: Mutex<ActiveSet>,
    drained: Notify,
}

impl SelfHealingService {
    pub fn new(config: &HealConfig, infra: Infrastructure) -> Self {
        Self {
            engine: DecisionEngine::new(config.policies()),
            orchestrator: ActionOrchestrator::new(infra, config),
            tracker: ActionTracker::new(config.tracker.clone()),
            active: Mutex::new(ActiveSet::default()),
            drained: Notify::new(),
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn orchestrator(&self) -> &ActionOrchestrator {
        &self.orchestrator
    }

    pub fn tracker(&self) -> &ActionTracker {
        &self.tracker
    }

    fn active(&self) -> MutexGuard<'_, ActiveSet> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `endpoint` active unless it already is.
    ///
    /// Fails once shutdown has begun; the flag is read under the same lock
    /// `shutdown` uses to count running operations.
    fn begin(&self, endpoint: &str) -> Result<Option<ActiveGuard<'_>>, HealError> {
        let mut active = self.active();
        if active.shutting_down {
            return Err(HealError::ShuttingDown);
        }
        if active.endpoints.contains_key(endpoint) {
            return Ok(None);
        }
        active.endpoints.insert(endpoint.to_string(), Utc::now());
        Ok(Some(ActiveGuard {
            service: self,
            endpoint: endpoint.to_string(),
        }))
    }

    pub fn is_healing(&self, endpoint: &str) -> bool {
        self.active().endpoints.contains_key(endpoint)
    }

    /// React to one prediction.
    ///
    /// Returns the executed action's result, or `None` when no action
    /// was taken (already healing, nothing matched, or the chosen action
    /// type has a poor track record).
    pub async fn handle_prediction(
        &self,
        prediction: &PredictionResult,
        current_metrics: &MetricSnapshot,
    ) -> Result<Option<ActionResult>, HealError> {
        if self.active().shutting_down {
            return Err(HealError::ShuttingDown);
        }
        let endpoint = prediction.endpoint.as_str();
        if self.is_healing(endpoint) {
            info!(%endpoint, "healing already in progress");
            return Ok(None);
        }

        let Some(action) = self.engine.evaluate(prediction, current_metrics) else {
            debug!(%endpoint, "no action needed");
            return Ok(None);
        };

        if !self.tracker.should_try_action(endpoint, action.action_type).await {
            warn!(
                %endpoint,
                action_type = %action.action_type,
                "skipping action due to poor historical effectiveness"
            );
            return Ok(None);
        }

        let Some(_guard) = self.begin(endpoint)? else {
            info!(%endpoint, "healing already in progress");
            return Ok(None);
        };

        info!(%endpoint, action_type = %action.action_type, "executing healing action");
        let result = self
            .orchestrator
            .execute_action(action, current_metrics)
            .await
            .inspect_err(|e| error!(%endpoint, error = %e, "error handling prediction"))?;

        self.tracker.record_action_result(result.clone()).await;
        Ok(Some(result))
    }

    pub async fn get_healing_status(&self, endpoint: &str) -> HealingStatus {
        let healing_start_time = self.active().endpoints.get(endpoint).copied();
        HealingStatus {
            endpoint: endpoint.to_string(),
            active_healing: healing_start_time.is_some(),
            healing_start_time,
            historical_trends: self.tracker.analyze_trends(endpoint).await,
            most_effective_action: self.tracker.get_best_action_type(endpoint).await,
        }
    }

    /// Refuse new work, wait for running healing operations to finish,
    /// then stop every background loop.
    pub async fn shutdown(&self) {
        self.active().shutting_down = true;
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let remaining = self.active().endpoints.len();
            if remaining == 0 {
                break;
            }
            info!(remaining, "waiting for active healing operations to complete");
            drained.await;
        }
        self.orchestrator.shutdown().await;
        info!("self-healing service shut down");
    }
}
