use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use healgrid_actions::{InMemoryInfrastructure, Infrastructure};
use healgrid_core::{MetricSnapshot, PredictionResult};
use healgrid_service::SelfHealingService;
use tracing::info;

/// Observation fed into one simulated healing pass.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub endpoint: String,
    pub predicted_latency: f64,
    pub risk_level: f64,
    pub latency_ms: f64,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub error_rate: f64,
    pub cache_hit_rate: Option<f64>,
    pub instances: u32,
}

impl Scenario {
    fn metrics(&self) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: Utc::now(),
            endpoint: self.endpoint.clone(),
            request_count: 1000,
            latency_ms: self.latency_ms,
            error_rate: self.error_rate,
            cpu_utilization: self.cpu_utilization,
            memory_utilization: self.memory_utilization,
            cache_hit_rate: self.cache_hit_rate,
        }
    }

    fn prediction(&self) -> PredictionResult {
        let spread = self.predicted_latency * 0.1;
        PredictionResult::new(
            &self.endpoint,
            self.predicted_latency,
            (self.predicted_latency - spread, self.predicted_latency + spread),
            self.risk_level,
        )
    }
}

pub async fn run(config: Option<&Path>, scenario: Scenario) -> anyhow::Result<()> {
    let config = super::load_config(config)?;

    let infra = Arc::new(InMemoryInfrastructure::new());
    infra.set_instances(&scenario.endpoint, scenario.instances);
    let metrics = scenario.metrics();
    infra.set_baseline(metrics.clone());

    let service = SelfHealingService::new(&config, Infrastructure::in_memory(infra.clone()));
    info!(endpoint = %scenario.endpoint, "simulating prediction");

    match service.handle_prediction(&scenario.prediction(), &metrics).await? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!("no action taken"),
    }
    let status = service.get_healing_status(&scenario.endpoint).await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    service.shutdown().await;
    Ok(())
}
