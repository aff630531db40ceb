//! Effectiveness statistics and attempt gating.
//!
//! Averages are incremental means over `total_attempts`: a result whose
//! improvement cannot be computed still counts as an attempt but leaves
//! the improvement mean untouched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use healgrid_core::config::TrackerSettings;
use healgrid_core::{ActionResult, ActionType, EndpointMap};

use crate::trends::{TrendReport, TrendStats, side_effect_frequencies, windowed_rates};

/// Average improvement an action type must exceed to be reported as best.
const IMPROVEMENT_FLOOR: f64 = -1.0;

/// Running statistics for one (endpoint, action type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEffectiveness {
    pub action_type: ActionType,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub average_improvement: f64,
    pub average_duration_ms: f64,
    pub side_effects: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl ActionEffectiveness {
    fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            total_attempts: 0,
            successful_attempts: 0,
            average_improvement: 0.0,
            average_duration_ms: 0.0,
            side_effects: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }

    fn fold(&mut self, result: &ActionResult) {
        self.total_attempts += 1;
        if result.success {
            self.successful_attempts += 1;
        }
        let n = self.total_attempts as f64;
        if let Some(x) = improvement(result) {
            self.average_improvement = (self.average_improvement * (n - 1.0) + x) / n;
        }
        self.average_duration_ms = (self.average_duration_ms * (n - 1.0) + result.duration_ms) / n;
        self.side_effects.extend(result.side_effects.iter().cloned());
        self.last_updated = Utc::now();
    }
}

/// Relative improvement an action produced, if it can be measured.
///
/// Circuit breaking is judged on error rate, everything else on latency.
/// `None` without post-action metrics or with a non-positive baseline.
pub fn improvement(result: &ActionResult) -> Option<f64> {
    let after = result.metrics_after.as_ref()?;
    let before = &result.metrics_before;
    let (b, a) = match result.action.action_type {
        ActionType::CircuitBreak => (before.error_rate, after.error_rate),
        ActionType::Scale | ActionType::AdjustCache | ActionType::AdjustLoadBalancer => {
            (before.latency_ms, after.latency_ms)
        }
    };
    (b > 0.0).then(|| (b - a) / b)
}

#[derive(Debug, Default)]
struct EndpointHistory {
    effectiveness: HashMap<ActionType, ActionEffectiveness>,
    /// Results inside the history window, oldest first.
    recent: Vec<ActionResult>,
}

impl EndpointHistory {
    fn prune(&mut self, window: std::time::Duration, now: DateTime<Utc>) {
        let Some(cutoff) = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
        else {
            return;
        };
        self.recent.retain(|r| r.action.created_at > cutoff);
    }
}

pub struct ActionTracker {
    settings: TrackerSettings,
    history: EndpointMap<EndpointHistory>,
}

impl ActionTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            history: EndpointMap::new(),
        }
    }

    pub async fn record_action_result(&self, result: ActionResult) {
        let endpoint = result.action.target_endpoint.clone();
        let action_type = result.action.action_type;
        let cell = self.history.get_or_insert_with(&endpoint, EndpointHistory::default).await;
        let mut history = cell.lock().await;

        let stats = history
            .effectiveness
            .entry(action_type)
            .or_insert_with(|| ActionEffectiveness::new(action_type));
        stats.fold(&result);
        info!(
            %endpoint,
            %action_type,
            success_rate = stats.success_rate(),
            average_improvement = stats.average_improvement,
            average_duration_ms = stats.average_duration_ms,
            "action effectiveness updated"
        );

        history.recent.push(result);
        history.prune(self.settings.history_window, Utc::now());
        debug!(%endpoint, recent = history.recent.len(), "result recorded");
    }

    pub async fn get_effectiveness(&self, endpoint: &str, action_type: ActionType) -> Option<ActionEffectiveness> {
        let cell = self.history.get(endpoint).await?;
        let history = cell.lock().await;
        history.effectiveness.get(&action_type).cloned()
    }

    /// Whether `action_type` is still worth attempting on `endpoint`.
    pub async fn should_try_action(&self, endpoint: &str, action_type: ActionType) -> bool {
        let Some(stats) = self.get_effectiveness(endpoint, action_type).await else {
            return true;
        };

        let success_rate = stats.success_rate();
        if success_rate < self.settings.min_success_rate {
            warn!(%endpoint, %action_type, success_rate, "action has low success rate");
            return false;
        }
        if stats.average_improvement < self.settings.min_improvement {
            warn!(
                %endpoint,
                %action_type,
                average_improvement = stats.average_improvement,
                "action shows minimal improvement"
            );
            return false;
        }
        true
    }

    /// Recorded action type with the highest average improvement.
    ///
    /// Ties go to the type that sorts first. Types whose average is at or
    /// below `IMPROVEMENT_FLOOR` never qualify.
    pub async fn get_best_action_type(&self, endpoint: &str) -> Option<ActionType> {
        let cell = self.history.get(endpoint).await?;
        let history = cell.lock().await;
        let mut ranked: Vec<&ActionEffectiveness> = history
            .effectiveness
            .values()
            .filter(|e| e.average_improvement > IMPROVEMENT_FLOOR)
            .collect();
        ranked.sort_by_key(|e| e.action_type);
        ranked
            .into_iter()
            .fold(None::<&ActionEffectiveness>, |best, e| match best {
                Some(b) if b.average_improvement >= e.average_improvement => Some(b),
                _ => Some(e),
            })
            .map(|e| e.action_type)
    }

    /// Trends over the endpoint's recent results, or `None` without any.
    pub async fn analyze_trends(&self, endpoint: &str) -> Option<TrendReport> {
        let cell = self.history.get(endpoint).await?;
        let history = cell.lock().await;
        let results = &history.recent;
        if results.is_empty() {
            return None;
        }

        let outcomes: Vec<bool> = results.iter().map(|r| r.success).collect();
        let improvements: Vec<f64> = results.iter().filter_map(improvement).collect();
        let durations: Vec<f64> = results.iter().map(|r| r.duration_ms).collect();

        Some(TrendReport {
            success_rate_trend: windowed_rates(&outcomes, self.settings.trend_window),
            average_improvement_trend: TrendStats::of(&improvements),
            duration_trend: TrendStats::of(&durations),
            common_side_effects: side_effect_frequencies(results.iter().flat_map(|r| &r.side_effects)),
        })
    }

    /// Number of results in the endpoint's history window.
    pub async fn recent_count(&self, endpoint: &str) -> usize {
        match self.history.get(endpoint).await {
            Some(cell) => cell.lock().await.recent.len(),
            None => 0,
        }
    }
}
