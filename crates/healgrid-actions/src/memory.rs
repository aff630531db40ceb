//! In-memory infrastructure.
//!
//! Implements every driver trait against plain in-process state and
//! records each mutation, so executors can be exercised (and demoed)
//! without real infrastructure. Latency reported by [`MetricsSource`]
//! scales inversely with the instance count, so scaling an endpoint
//! shows up as an improvement.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use healgrid_core::{BackendServer, LoadBalancingAlgorithm, MetricSnapshot, ServerHealth};

use crate::cache::CacheConfig;
use crate::driver::{CacheBackend, DriverFuture, LoadBalancerDriver, MetricsSource, ScalingDriver};
use crate::error::DriverError;

/// Driver calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InstanceCount,
    SetInstances,
    CacheConfig,
    LoadBalancerConfig,
    Probe,
    Metrics,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<String, u32>,
    /// Pinned healthy count; otherwise every instance is healthy.
    healthy_override: HashMap<String, u32>,
    scale_calls: Vec<(String, u32)>,
    /// Baseline snapshot and the instance count it was taken at.
    baselines: HashMap<String, (MetricSnapshot, u32)>,
    cache_configs: Vec<(String, CacheConfig)>,
    warmed: Vec<(String, Vec<String>)>,
    warm_calls: usize,
    failing_warm_calls: HashSet<usize>,
    lb_configs: Vec<(String, LoadBalancingAlgorithm, Vec<BackendServer>)>,
    server_health: HashMap<String, ServerHealth>,
    failures: HashSet<FailPoint>,
}

#[derive(Debug, Default)]
pub struct InMemoryInfrastructure {
    state: Mutex<State>,
}

impl InMemoryInfrastructure {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, point: FailPoint, target: &str) -> Result<(), DriverError> {
        if self.state().failures.contains(&point) {
            return Err(DriverError::Unavailable {
                target: target.to_string(),
                reason: format!("injected {point:?} failure"),
            });
        }
        Ok(())
    }

    pub fn set_instances(&self, endpoint: &str, count: u32) {
        self.state().instances.insert(endpoint.to_string(), count);
    }

    pub fn instances(&self, endpoint: &str) -> Option<u32> {
        self.state().instances.get(endpoint).copied()
    }

    /// Pin the healthy-instance count (`None` restores "all healthy").
    pub fn hold_healthy_at(&self, endpoint: &str, healthy: Option<u32>) {
        let mut state = self.state();
        match healthy {
            Some(n) => state.healthy_override.insert(endpoint.to_string(), n),
            None => state.healthy_override.remove(endpoint),
        };
    }

    /// Metrics reported for `endpoint` at its current instance count.
    pub fn set_baseline(&self, snapshot: MetricSnapshot) {
        let mut state = self.state();
        let instances = state.instances.get(&snapshot.endpoint).copied().unwrap_or(1).max(1);
        state.baselines.insert(snapshot.endpoint.clone(), (snapshot, instances));
    }

    pub fn set_server_health(&self, server_id: &str, health: ServerHealth) {
        self.state().server_health.insert(server_id.to_string(), health);
    }

    pub fn fail(&self, point: FailPoint) {
        self.state().failures.insert(point);
    }

    pub fn recover(&self, point: FailPoint) {
        self.state().failures.remove(&point);
    }

    /// Fail the `index`-th warm call (0-based, counted across endpoints).
    pub fn fail_warm_batch(&self, index: usize) {
        self.state().failing_warm_calls.insert(index);
    }

    pub fn scale_calls(&self) -> Vec<(String, u32)> {
        self.state().scale_calls.clone()
    }

    pub fn cache_configs(&self) -> Vec<(String, CacheConfig)> {
        self.state().cache_configs.clone()
    }

    pub fn warmed_batches(&self) -> Vec<(String, Vec<String>)> {
        self.state().warmed.clone()
    }

    pub fn lb_configs(&self) -> Vec<(String, LoadBalancingAlgorithm, Vec<BackendServer>)> {
        self.state().lb_configs.clone()
    }
}

impl ScalingDriver for InMemoryInfrastructure {
    fn instance_count<'a>(&'a self, endpoint: &'a str) -> DriverFuture<'a, Option<u32>> {
        Box::pin(async move {
            self.check(FailPoint::InstanceCount, endpoint)?;
            Ok(self.instances(endpoint))
        })
    }

    fn healthy_instance_count<'a>(&'a self, endpoint: &'a str) -> DriverFuture<'a, u32> {
        Box::pin(async move {
            self.check(FailPoint::InstanceCount, endpoint)?;
            let state = self.state();
            let healthy = match state.healthy_override.get(endpoint) {
                Some(n) => *n,
                None => state.instances.get(endpoint).copied().unwrap_or(0),
            };
            Ok(healthy)
        })
    }

    fn set_instance_count<'a>(&'a self, endpoint: &'a str, count: u32) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.check(FailPoint::SetInstances, endpoint)?;
            let mut state = self.state();
            state.instances.insert(endpoint.to_string(), count);
            state.scale_calls.push((endpoint.to_string(), count));
            Ok(())
        })
    }
}

impl CacheBackend for InMemoryInfrastructure {
    fn apply_config<'a>(&'a self, endpoint: &'a str, config: &'a CacheConfig) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.check(FailPoint::CacheConfig, endpoint)?;
            self.state().cache_configs.push((endpoint.to_string(), *config));
            Ok(())
        })
    }

    fn warm_batch<'a>(&'a self, endpoint: &'a str, keys: &'a [String]) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            let call = state.warm_calls;
            state.warm_calls += 1;
            if state.failing_warm_calls.contains(&call) {
                return Err(DriverError::Rejected(format!("warm batch {call} for {endpoint}")));
            }
            state.warmed.push((endpoint.to_string(), keys.to_vec()));
            Ok(())
        })
    }
}

impl LoadBalancerDriver for InMemoryInfrastructure {
    fn apply_config<'a>(
        &'a self,
        endpoint: &'a str,
        algorithm: LoadBalancingAlgorithm,
        servers: &'a [BackendServer],
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.check(FailPoint::LoadBalancerConfig, endpoint)?;
            self.state()
                .lb_configs
                .push((endpoint.to_string(), algorithm, servers.to_vec()));
            Ok(())
        })
    }

    fn probe<'a>(&'a self, server: &'a BackendServer) -> DriverFuture<'a, ServerHealth> {
        Box::pin(async move {
            self.check(FailPoint::Probe, &server.address)?;
            Ok(self
                .state()
                .server_health
                .get(&server.id)
                .copied()
                .unwrap_or(ServerHealth::Healthy))
        })
    }
}

impl MetricsSource for InMemoryInfrastructure {
    fn current_metrics<'a>(&'a self, endpoint: &'a str) -> DriverFuture<'a, MetricSnapshot> {
        Box::pin(async move {
            self.check(FailPoint::Metrics, endpoint)?;
            let state = self.state();
            let (baseline, at_instances) =
                state
                    .baselines
                    .get(endpoint)
                    .cloned()
                    .ok_or_else(|| DriverError::Unavailable {
                        target: endpoint.to_string(),
                        reason: "no metrics recorded".to_string(),
                    })?;
            let now = state.instances.get(endpoint).copied().unwrap_or(at_instances).max(1);
            let ratio = at_instances as f64 / now as f64;

            Ok(MetricSnapshot {
                timestamp: Utc::now(),
                latency_ms: baseline.latency_ms * ratio,
                cpu_utilization: (baseline.cpu_utilization * ratio).min(100.0),
                ..baseline
            })
        })
    }
}
