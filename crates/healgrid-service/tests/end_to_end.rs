//! Full loop against the in-memory infrastructure: prediction → policy
//! → scale → tracker → healing status.

use std::sync::Arc;

use chrono::Utc;
use healgrid_actions::{InMemoryInfrastructure, Infrastructure};
use healgrid_core::{ActionStatus, ActionType, HealConfig, MetricSnapshot, PredictionResult};
use healgrid_service::SelfHealingService;

const CHECKOUT: &str = "/api/v1/checkout";

fn checkout_metrics() -> MetricSnapshot {
    MetricSnapshot {
        timestamp: Utc::now(),
        endpoint: CHECKOUT.to_string(),
        request_count: 1200,
        latency_ms: 480.0,
        error_rate: 0.02,
        cpu_utilization: 75.0,
        memory_utilization: 62.0,
        cache_hit_rate: Some(0.91),
    }
}

fn setup() -> (Arc<InMemoryInfrastructure>, SelfHealingService) {
    let infra = Arc::new(InMemoryInfrastructure::new());
    infra.set_instances(CHECKOUT, 2);
    infra.set_baseline(checkout_metrics());
    let service = SelfHealingService::new(&HealConfig::default(), Infrastructure::in_memory(infra.clone()));
    (infra, service)
}

#[tokio::test(start_paused = true)]
async fn checkout_latency_spike_scales_and_is_tracked() {
    let (infra, service) = setup();
    let prediction = PredictionResult::new(CHECKOUT, 600.0, (540.0, 660.0), 0.8);

    let result = service
        .handle_prediction(&prediction, &checkout_metrics())
        .await
        .expect("healing should not error")
        .expect("high-latency policy should fire");

    assert!(result.success);
    assert_eq!(result.action.action_type, ActionType::Scale);
    assert_eq!(result.action.status, ActionStatus::Completed);
    assert_eq!(result.action.parameters.f64_or("scale_factor", 0.0).unwrap(), 1.5);
    assert_eq!(infra.scale_calls(), vec![(CHECKOUT.to_string(), 3)]);

    // Latency drops with the extra instance: 480 * 2/3.
    let after = result.metrics_after.as_ref().expect("post-action metrics");
    assert!((after.latency_ms - 320.0).abs() < 1e-9);

    let status = service.get_healing_status(CHECKOUT).await;
    assert!(!status.active_healing);
    assert!(status.healing_start_time.is_none());
    let trends = status.historical_trends.expect("scale result should be tracked");
    assert_eq!(trends.success_rate_trend, vec![1.0]);
    assert_eq!(status.most_effective_action, Some(ActionType::Scale));

    let stats = service
        .tracker()
        .get_effectiveness(CHECKOUT, ActionType::Scale)
        .await
        .expect("effectiveness recorded");
    assert_eq!(stats.total_attempts, 1);
    assert!((stats.average_improvement - 1.0 / 3.0).abs() < 1e-9);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeat_prediction_inside_cooldown_records_a_no_op() {
    let (infra, service) = setup();
    let prediction = PredictionResult::new(CHECKOUT, 650.0, (600.0, 700.0), 0.8);

    service.handle_prediction(&prediction, &checkout_metrics()).await.unwrap();
    let second = service
        .handle_prediction(&prediction, &checkout_metrics())
        .await
        .unwrap()
        .expect("scale still looks effective");

    // The scaler skipped inside its cooldown; the action itself succeeded.
    assert!(second.success);
    assert_eq!(infra.scale_calls().len(), 1);
    assert_eq!(service.tracker().recent_count(CHECKOUT).await, 2);
    service.shutdown().await;
}

#[tokio::test]
async fn healing_status_serializes_with_wire_names() {
    let (_infra, service) = setup();
    let prediction = PredictionResult::new(CHECKOUT, 600.0, (540.0, 660.0), 0.8);
    service.handle_prediction(&prediction, &checkout_metrics()).await.unwrap();

    let json = serde_json::to_value(service.get_healing_status(CHECKOUT).await).unwrap();
    assert_eq!(json["endpoint"], CHECKOUT);
    assert_eq!(json["active_healing"], false);
    assert_eq!(json["most_effective_action"], "scale");
    assert!(json["historical_trends"]["success_rate_trend"].is_array());
}
