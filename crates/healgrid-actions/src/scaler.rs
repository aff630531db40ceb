//! Factor-based instance scaling with cooldown windows.
//!
//! ```text
//! target = clamp(round(current * scale_factor), min_instances, max_instances)
//!
//! if target > current * 2:
//!     step = ceil((target - current) / 3)
//!     for each step: set count, then wait until healthy >= step
//! else:
//!     set count to target
//! ```
//!
//! A successful scale starts the endpoint's cooldown; calls inside the
//! window are skipped without touching infrastructure.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use healgrid_core::config::ScalerSettings;
use healgrid_core::{EndpointMap, MetricSnapshot};

use crate::driver::ScalingDriver;
use crate::error::{ActionError, ExecResult};

/// What a scale request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// The endpoint scaled recently; nothing was done.
    Cooldown,
    /// The clamped target equals the current count.
    Unchanged { instances: u32 },
    /// Instance count changed.
    Scaled { from: u32, to: u32 },
}

/// Per-endpoint scaling state.
#[derive(Debug, Default)]
struct ScaleState {
    /// Completion time of the last successful scale.
    last_scaled: Option<Instant>,
}

pub struct AutoScaler {
    driver: Arc<dyn ScalingDriver>,
    settings: ScalerSettings,
    states: EndpointMap<ScaleState>,
}

impl AutoScaler {
    pub fn new(driver: Arc<dyn ScalingDriver>, settings: ScalerSettings) -> Self {
        Self {
            driver,
            settings,
            states: EndpointMap::new(),
        }
    }

    /// Scale `endpoint` by `scale_factor`.
    ///
    /// Holds the endpoint's state for the whole operation, so a second
    /// call for the same endpoint waits and then sees the cooldown.
    pub async fn scale(
        &self,
        endpoint: &str,
        scale_factor: f64,
        metrics: &MetricSnapshot,
    ) -> ExecResult<ScaleOutcome> {
        let cell = self.states.get_or_insert_with(endpoint, ScaleState::default).await;
        let mut state = cell.lock().await;

        if let Some(last) = state.last_scaled
            && last.elapsed() < self.settings.cooldown
        {
            info!(%endpoint, "scaling in cooldown period");
            return Ok(ScaleOutcome::Cooldown);
        }

        let current = self
            .driver
            .instance_count(endpoint)
            .await?
            .filter(|n| *n > 0)
            .ok_or_else(|| ActionError::InstanceCountUnavailable(endpoint.to_string()))?;

        let target = scale_target(
            current,
            scale_factor,
            self.settings.min_instances,
            self.settings.max_instances,
        );
        if target == current {
            info!(%endpoint, instances = current, "no scaling needed");
            return Ok(ScaleOutcome::Unchanged { instances: current });
        }

        info!(
            %endpoint,
            from = current,
            to = target,
            latency_ms = metrics.latency_ms,
            cpu = metrics.cpu_utilization,
            "scaling"
        );

        if target > current.saturating_mul(2) {
            for step in gradual_steps(current, target) {
                self.driver.set_instance_count(endpoint, step).await?;
                self.wait_for_healthy(endpoint, step).await?;
            }
        } else {
            self.driver.set_instance_count(endpoint, target).await?;
        }

        state.last_scaled = Some(Instant::now());
        info!(%endpoint, instances = target, "scaled");
        Ok(ScaleOutcome::Scaled {
            from: current,
            to: target,
        })
    }

    /// Whether `endpoint` is inside its cooldown window.
    pub async fn in_cooldown(&self, endpoint: &str) -> bool {
        match self.states.get(endpoint).await {
            Some(cell) => cell
                .lock()
                .await
                .last_scaled
                .is_some_and(|last| last.elapsed() < self.settings.cooldown),
            None => false,
        }
    }

    /// Poll until `target` instances report healthy.
    async fn wait_for_healthy(&self, endpoint: &str, target: u32) -> ExecResult<()> {
        for attempt in 1..=self.settings.health_poll_attempts {
            let healthy = self.driver.healthy_instance_count(endpoint).await?;
            if healthy >= target {
                debug!(%endpoint, healthy, target, attempt, "scale step healthy");
                return Ok(());
            }
            debug!(%endpoint, healthy, target, attempt, "waiting for healthy instances");
            tokio::time::sleep(self.settings.health_poll_interval).await;
        }

        warn!(%endpoint, target, "timeout waiting for healthy instances");
        Err(ActionError::ScaleTimeout {
            endpoint: endpoint.to_string(),
            target,
        })
    }
}

/// Clamped instance target for a scale factor.
pub fn scale_target(current: u32, scale_factor: f64, min: u32, max: u32) -> u32 {
    let raw = (current as f64 * scale_factor).round();
    if raw.is_nan() || raw <= min as f64 {
        min
    } else if raw >= max as f64 {
        max
    } else {
        raw as u32
    }
}

/// Intermediate counts for a gradual scale-up, ending at `target`.
pub fn gradual_steps(current: u32, target: u32) -> Vec<u32> {
    if target <= current {
        return Vec::new();
    }
    let step = (target - current).div_ceil(3).max(1);
    let mut steps = Vec::new();
    let mut at = current;
    while at < target {
        at = (at + step).min(target);
        steps.push(at);
    }
    steps
}
