//! Per-endpoint backend pools, algorithm selection and
//! health-driven reweighting.
//!
//! Each adjusted endpoint gets a health-check loop. When a probe moves a
//! server to `Unhealthy`, its weight drops to zero and the remaining
//! healthy servers share the traffic evenly:
//!
//! ```text
//!   a:0.5  b:0.3  c:0.2     (b fails)
//!   a:0.5  b:0.0  c:0.5
//! ```
//!
//! Backend selection skips unhealthy and zero-weight servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use healgrid_core::config::LoadBalancerSettings;
use healgrid_core::{BackendServer, EndpointMap, LoadBalancingAlgorithm, ServerHealth};

use crate::driver::LoadBalancerDriver;
use crate::error::ExecResult;
use crate::monitor::{MonitorSet, run_every};

/// Lock-free round-robin cursor over a pool of `count` entries.
#[derive(Debug, Default)]
struct RoundRobinCursor {
    counter: AtomicUsize,
}

impl RoundRobinCursor {
    fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % count)
    }

    fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}

/// Backends and selection state for one endpoint.
#[derive(Debug, Default)]
struct BackendPool {
    algorithm: LoadBalancingAlgorithm,
    servers: Vec<BackendServer>,
    cursor: RoundRobinCursor,
    /// Running weights for smooth weighted round-robin, by server index.
    current_weights: Vec<f64>,
}

impl BackendPool {
    fn eligible(server: &BackendServer) -> bool {
        server.health != ServerHealth::Unhealthy && server.weight > 0.0
    }

    fn replace_servers(&mut self, servers: Vec<BackendServer>) {
        self.current_weights = vec![0.0; servers.len()];
        self.servers = servers;
        self.cursor.reset();
    }

    fn select(&mut self) -> Option<&BackendServer> {
        let candidates: Vec<usize> = (0..self.servers.len())
            .filter(|&i| Self::eligible(&self.servers[i]))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.algorithm {
            LoadBalancingAlgorithm::RoundRobin => {
                candidates[self.cursor.next(candidates.len())?]
            }
            LoadBalancingAlgorithm::LeastConnections => *candidates
                .iter()
                .min_by_key(|&&i| self.servers[i].active_connections)?,
            LoadBalancingAlgorithm::ResponseTime => *candidates.iter().min_by(|&&a, &&b| {
                self.servers[a]
                    .response_time_ms
                    .total_cmp(&self.servers[b].response_time_ms)
            })?,
            LoadBalancingAlgorithm::WeightedRoundRobin => self.smooth_weighted(&candidates)?,
        };
        self.servers.get(chosen)
    }

    /// Smooth weighted round-robin: every candidate gains its weight, the
    /// leader is picked and pays back the total.
    fn smooth_weighted(&mut self, candidates: &[usize]) -> Option<usize> {
        if self.current_weights.len() != self.servers.len() {
            self.current_weights = vec![0.0; self.servers.len()];
        }
        let mut total = 0.0;
        let mut best: Option<usize> = None;
        for &i in candidates {
            self.current_weights[i] += self.servers[i].weight;
            total += self.servers[i].weight;
            if best.is_none_or(|b| self.current_weights[i] > self.current_weights[b]) {
                best = Some(i);
            }
        }
        let best = best?;
        self.current_weights[best] -= total;
        Some(best)
    }

    /// Apply named weights, clamped to `[0, 1]`. Returns names that
    /// matched no server.
    fn apply_weights(&mut self, weights: &HashMap<String, f64>) -> Vec<String> {
        let mut unknown = Vec::new();
        for (id, weight) in weights {
            match self.servers.iter_mut().find(|s| &s.id == id) {
                Some(server) => server.weight = clamp_weight(*weight),
                None => unknown.push(id.clone()),
            }
        }
        unknown.sort();
        unknown
    }
}

fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) }
}

/// Zero `failed`'s weight and split traffic evenly over the healthy rest.
pub fn rebalance_after_failure(servers: &mut [BackendServer], failed: &str) {
    let healthy: Vec<usize> = servers
        .iter()
        .enumerate()
        .filter(|(_, s)| s.id != failed && s.health == ServerHealth::Healthy)
        .map(|(i, _)| i)
        .collect();

    for server in servers.iter_mut().filter(|s| s.id == failed) {
        server.weight = 0.0;
    }
    if healthy.is_empty() {
        return;
    }
    let share = 1.0 / healthy.len() as f64;
    for i in healthy {
        servers[i].weight = share;
    }
}

pub struct LoadBalancer {
    driver: Arc<dyn LoadBalancerDriver>,
    settings: LoadBalancerSettings,
    pools: EndpointMap<BackendPool>,
    monitors: MonitorSet,
}

impl LoadBalancer {
    pub fn new(driver: Arc<dyn LoadBalancerDriver>, settings: LoadBalancerSettings) -> Self {
        Self {
            driver,
            settings,
            pools: EndpointMap::new(),
            monitors: MonitorSet::new("health_check"),
        }
    }

    /// Register the backend pool for `endpoint`, replacing any previous one.
    pub async fn set_servers(&self, endpoint: &str, servers: Vec<BackendServer>) {
        let cell = self.pools.get_or_insert_with(endpoint, BackendPool::default).await;
        let mut pool = cell.lock().await;
        debug!(%endpoint, servers = servers.len(), "backend pool set");
        pool.replace_servers(servers);
    }

    /// Change algorithm and weights by algorithm name.
    pub async fn adjust(&self, endpoint: &str, algorithm: &str, weights: &HashMap<String, f64>) -> ExecResult<()> {
        let algorithm: LoadBalancingAlgorithm = algorithm.parse()?;
        self.apply(endpoint, algorithm, weights).await
    }

    /// Change algorithm and weights, push the config, and make sure the
    /// endpoint's health-check loop is running.
    pub async fn apply(
        &self,
        endpoint: &str,
        algorithm: LoadBalancingAlgorithm,
        weights: &HashMap<String, f64>,
    ) -> ExecResult<()> {
        let cell = self.pools.get_or_insert_with(endpoint, BackendPool::default).await;
        {
            let mut pool = cell.lock().await;
            pool.algorithm = algorithm;
            for id in pool.apply_weights(weights) {
                warn!(%endpoint, server = %id, "weight given for unknown server");
            }
            self.driver.apply_config(endpoint, algorithm, &pool.servers).await?;
            info!(%endpoint, %algorithm, servers = pool.servers.len(), "load balancer configured");
        }

        let endpoint_owned = Arc::new(endpoint.to_string());
        let pools = self.pools.clone();
        let driver = self.driver.clone();
        let interval = self.settings.health_check_interval;
        self.monitors
            .ensure(endpoint, move |shutdown| async move {
                monitor_backends(endpoint_owned, pools, driver, interval, shutdown).await;
            })
            .await;
        Ok(())
    }

    /// Probe every backend of `endpoint` once. Returns the ids of servers
    /// that just became unhealthy.
    pub async fn check_now(&self, endpoint: &str) -> Vec<String> {
        check_backends(endpoint, &self.pools, self.driver.as_ref()).await
    }

    /// Pick a backend for the next request.
    pub async fn next_backend(&self, endpoint: &str) -> Option<BackendServer> {
        let cell = self.pools.get(endpoint).await?;
        let mut pool = cell.lock().await;
        pool.select().cloned()
    }

    pub async fn servers(&self, endpoint: &str) -> Vec<BackendServer> {
        match self.pools.get(endpoint).await {
            Some(cell) => cell.lock().await.servers.clone(),
            None => Vec::new(),
        }
    }

    pub async fn algorithm(&self, endpoint: &str) -> Option<LoadBalancingAlgorithm> {
        let cell = self.pools.get(endpoint).await?;
        let algorithm = cell.lock().await.algorithm;
        Some(algorithm)
    }

    pub async fn monitored_endpoints(&self) -> Vec<String> {
        self.monitors.running().await
    }

    /// Stop every health-check loop.
    pub async fn stop_all(&self) {
        self.monitors.stop_all().await;
    }
}

async fn monitor_backends(
    endpoint: Arc<String>,
    pools: EndpointMap<BackendPool>,
    driver: Arc<dyn LoadBalancerDriver>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    run_every(interval, shutdown, || {
        let pools = pools.clone();
        let driver = driver.clone();
        let endpoint = endpoint.clone();
        async move {
            check_backends(&endpoint, &pools, driver.as_ref()).await;
        }
    })
    .await;
}

async fn check_backends(
    endpoint: &str,
    pools: &EndpointMap<BackendPool>,
    driver: &dyn LoadBalancerDriver,
) -> Vec<String> {
    let Some(cell) = pools.get(endpoint).await else {
        return Vec::new();
    };
    let mut pool = cell.lock().await;

    let mut failed = Vec::new();
    for i in 0..pool.servers.len() {
        let health = match driver.probe(&pool.servers[i]).await {
            Ok(health) => health,
            Err(e) => {
                warn!(%endpoint, server = %pool.servers[i].id, error = %e, "health probe failed");
                ServerHealth::Unhealthy
            }
        };
        let server = &mut pool.servers[i];
        if server.health != health {
            debug!(%endpoint, server = %server.id, from = ?server.health, to = ?health, "backend health changed");
            if health == ServerHealth::Unhealthy {
                failed.push(server.id.clone());
            }
            server.health = health;
        }
    }

    if failed.is_empty() {
        return failed;
    }
    for id in &failed {
        warn!(%endpoint, server = %id, "backend unhealthy, rebalancing");
        rebalance_after_failure(&mut pool.servers, id);
    }
    if let Err(e) = driver.apply_config(endpoint, pool.algorithm, &pool.servers).await {
        warn!(%endpoint, error = %e, "failed to push rebalanced config");
    }
    failed
}
