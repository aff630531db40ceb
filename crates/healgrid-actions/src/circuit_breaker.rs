//! Per-endpoint CLOSED / OPEN / HALF_OPEN state machine.
//!
//! Request outcomes are recorded as they happen; the CLOSED → OPEN trip
//! is evaluated on every record. Recovery (OPEN → HALF_OPEN, and the
//! HALF_OPEN verdict) is driven by a background monitor that ticks every
//! `monitor_interval` for each configured endpoint.
//!
//! ```text
//!            error rate >= threshold
//!   CLOSED ──────────────────────────► OPEN
//!     ▲                                 │ reset_timeout elapsed
//!     │ probes ok                       ▼
//!     └────────────── HALF_OPEN ◄───────┘
//!                        │ probes failing
//!                        └──────────────► OPEN
//! ```
//!
//! Every transition zeroes the counters.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use healgrid_core::config::CircuitBreakerSettings;
use healgrid_core::{CircuitState, EndpointMap};

use crate::monitor::{MonitorSet, run_every};

/// Thresholds for one endpoint's circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Requests slower than this count as errors.
    pub timeout_ms: u64,
    /// Error rate (0.0–1.0) that trips the circuit.
    pub error_threshold: f64,
    /// Time spent OPEN before probing recovery.
    pub reset_timeout: Duration,
}

/// Point-in-time view of a circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub error_count: u32,
    pub request_count: u32,
    pub secs_in_state: u64,
}

/// State machine for a single endpoint.
#[derive(Debug)]
pub struct Circuit {
    config: CircuitConfig,
    state: CircuitState,
    error_count: u32,
    request_count: u32,
    last_state_change: Instant,
    /// Probe requests admitted while HALF_OPEN, and needed for a verdict.
    probe_limit: u32,
}

impl Circuit {
    pub fn new(config: CircuitConfig, probe_limit: u32) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            error_count: 0,
            request_count: 0,
            last_state_change: Instant::now(),
            probe_limit,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Replace thresholds without touching state or counters.
    pub fn reconfigure(&mut self, config: CircuitConfig) {
        self.config = config;
    }

    pub fn allows_request(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.request_count < self.probe_limit,
        }
    }

    /// Record one request outcome. Returns the new state if the circuit tripped.
    pub fn record(&mut self, success: bool, latency_ms: f64) -> Option<CircuitState> {
        self.request_count += 1;
        if !success || latency_ms > self.config.timeout_ms as f64 {
            self.error_count += 1;
        }

        if self.state == CircuitState::Closed && self.error_rate() >= self.config.error_threshold {
            warn!(
                errors = self.error_count,
                requests = self.request_count,
                threshold = self.config.error_threshold,
                "error rate over threshold"
            );
            return Some(self.transition(CircuitState::Open));
        }
        None
    }

    /// One monitor step. Returns the new state if a transition happened.
    pub fn evaluate(&mut self, now: Instant) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let in_state = now.saturating_duration_since(self.last_state_change);
                (in_state >= self.config.reset_timeout)
                    .then(|| self.transition(CircuitState::HalfOpen))
            }
            CircuitState::HalfOpen => {
                if self.request_count < self.probe_limit {
                    return None;
                }
                let next = if self.error_rate() < self.config.error_threshold {
                    CircuitState::Closed
                } else {
                    CircuitState::Open
                };
                Some(self.transition(next))
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            error_count: self.error_count,
            request_count: self.request_count,
            secs_in_state: self.last_state_change.elapsed().as_secs(),
        }
    }

    fn error_rate(&self) -> f64 {
        self.error_count as f64 / self.request_count.max(1) as f64
    }

    fn transition(&mut self, to: CircuitState) -> CircuitState {
        debug!(from = ?self.state, ?to, "circuit transition");
        self.state = to;
        self.error_count = 0;
        self.request_count = 0;
        self.last_state_change = Instant::now();
        to
    }
}

/// Circuit breakers for every configured endpoint.
pub struct CircuitBreaker {
    circuits: EndpointMap<Circuit>,
    monitors: MonitorSet,
    settings: CircuitBreakerSettings,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            circuits: EndpointMap::new(),
            monitors: MonitorSet::new("circuit"),
            settings,
        }
    }

    /// Configure an endpoint's circuit.
    ///
    /// The first call initializes the circuit CLOSED and starts its
    /// monitor; later calls only replace the thresholds.
    pub async fn configure(&self, endpoint: &str, config: CircuitConfig) {
        info!(
            %endpoint,
            timeout_ms = config.timeout_ms,
            error_threshold = config.error_threshold,
            "configuring circuit breaker"
        );

        let probes = self.settings.half_open_probes;
        let cell = self
            .circuits
            .get_or_insert_with(endpoint, || Circuit::new(config.clone(), probes))
            .await;
        cell.lock().await.reconfigure(config);

        let circuits = self.circuits.clone();
        let interval = self.settings.monitor_interval;
        let endpoint_owned = endpoint.to_string();
        self.monitors
            .ensure(endpoint, move |shutdown| async move {
                monitor_circuit(endpoint_owned, circuits, interval, shutdown).await;
            })
            .await;
    }

    /// Whether a request to `endpoint` should go through.
    ///
    /// Unconfigured endpoints always allow traffic.
    pub async fn should_allow_request(&self, endpoint: &str) -> bool {
        match self.circuits.get(endpoint).await {
            Some(cell) => cell.lock().await.allows_request(),
            None => true,
        }
    }

    /// Record a request outcome. Ignored for unconfigured endpoints.
    pub async fn record_result(&self, endpoint: &str, success: bool, latency_ms: f64) {
        if let Some(cell) = self.circuits.get(endpoint).await
            && let Some(state) = cell.lock().await.record(success, latency_ms)
        {
            warn!(%endpoint, ?state, "opening circuit");
        }
    }

    pub async fn state(&self, endpoint: &str) -> Option<CircuitState> {
        let cell = self.circuits.get(endpoint).await?;
        let state = cell.lock().await.state();
        Some(state)
    }

    pub async fn snapshot(&self, endpoint: &str) -> Option<CircuitSnapshot> {
        let cell = self.circuits.get(endpoint).await?;
        let snapshot = cell.lock().await.snapshot();
        Some(snapshot)
    }

    /// Drop an endpoint's circuit and stop its monitor.
    pub async fn deconfigure(&self, endpoint: &str) -> bool {
        self.monitors.stop(endpoint).await;
        let removed = self.circuits.remove(endpoint).await.is_some();
        if removed {
            info!(%endpoint, "circuit breaker removed");
        }
        removed
    }

    /// Endpoints with a running monitor.
    pub async fn monitored_endpoints(&self) -> Vec<String> {
        self.monitors.running().await
    }

    /// Stop every monitor (for graceful shutdown). Circuit state is kept.
    pub async fn stop_all(&self) {
        self.monitors.stop_all().await;
    }
}

async fn monitor_circuit(
    endpoint: String,
    circuits: EndpointMap<Circuit>,
    interval: Duration,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    debug!(%endpoint, "circuit monitor starting");
    let endpoint = Arc::new(endpoint);
    run_every(interval, shutdown, || {
        let circuits = circuits.clone();
        let endpoint = endpoint.clone();
        async move {
            let Some(cell) = circuits.get(&endpoint).await else {
                return;
            };
            let mut circuit = cell.lock().await;
            match circuit.evaluate(Instant::now()) {
                Some(CircuitState::HalfOpen) => info!(endpoint = %endpoint, "setting circuit half-open"),
                Some(CircuitState::Closed) => info!(endpoint = %endpoint, "closing circuit"),
                Some(CircuitState::Open) => warn!(endpoint = %endpoint, "probes failing, reopening circuit"),
                None => {}
            }
        }
    })
    .await;
    debug!(endpoint = %endpoint, "circuit monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f64) -> CircuitConfig {
        CircuitConfig {
            timeout_ms: 1000,
            error_threshold: threshold,
            reset_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn starts_closed_and_allows_traffic() {
        let circuit = Circuit::new(config(0.5), 5);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.allows_request());
    }

    #[test]
    fn trips_when_error_rate_reaches_threshold() {
        let mut circuit = Circuit::new(config(0.5), 5);
        assert_eq!(circuit.record(true, 10.0), None);
        // 1 error / 2 requests = 0.5 >= 0.5
        assert_eq!(circuit.record(false, 10.0), Some(CircuitState::Open));
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.allows_request());
    }

    #[test]
    fn slow_requests_count_as_errors() {
        let mut circuit = Circuit::new(config(0.9), 5);
        circuit.record(true, 10.0);
        circuit.record(true, 1500.0);
        assert_eq!(circuit.error_count(), 1);
        assert_eq!(circuit.request_count(), 2);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn counters_reset_on_every_transition() {
        let mut circuit = Circuit::new(config(0.5), 5);
        circuit.record(false, 10.0);
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!((circuit.error_count(), circuit.request_count()), (0, 0));

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(circuit.evaluate(later), Some(CircuitState::HalfOpen));
        assert_eq!((circuit.error_count(), circuit.request_count()), (0, 0));
    }

    #[test]
    fn open_waits_for_reset_timeout() {
        let mut circuit = Circuit::new(config(0.5), 5);
        circuit.record(false, 10.0);

        let soon = Instant::now() + Duration::from_secs(30);
        assert_eq!(circuit.evaluate(soon), None);
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_limited_probes() {
        let mut circuit = Circuit::new(config(0.5), 5);
        circuit.record(false, 10.0);
        circuit.evaluate(Instant::now() + Duration::from_secs(61));

        for _ in 0..5 {
            assert!(circuit.allows_request());
            circuit.record(true, 10.0);
        }
        assert!(!circuit.allows_request());
        // Still half-open until the monitor renders a verdict.
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_healthy_probes() {
        let mut circuit = Circuit::new(config(0.5), 5);
        circuit.record(false, 10.0);
        circuit.evaluate(Instant::now() + Duration::from_secs(61));

        circuit.record(false, 10.0);
        for _ in 0..4 {
            circuit.record(true, 10.0);
        }
        assert_eq!(circuit.evaluate(Instant::now()), Some(CircuitState::Closed));
        assert_eq!((circuit.error_count(), circuit.request_count()), (0, 0));
    }

    #[test]
    fn half_open_reopens_on_failing_probes() {
        let mut circuit = Circuit::new(config(0.5), 5);
        circuit.record(false, 10.0);
        circuit.evaluate(Instant::now() + Duration::from_secs(61));

        for _ in 0..3 {
            circuit.record(false, 10.0);
        }
        // Not enough probes yet.
        assert_eq!(circuit.evaluate(Instant::now()), None);
        circuit.record(true, 10.0);
        circuit.record(true, 10.0);
        assert_eq!(circuit.evaluate(Instant::now()), Some(CircuitState::Open));
    }

    #[test]
    fn half_open_failures_do_not_trip_on_record() {
        let mut circuit = Circuit::new(config(0.5), 5);
        circuit.record(false, 10.0);
        circuit.evaluate(Instant::now() + Duration::from_secs(61));

        assert_eq!(circuit.record(false, 10.0), None);
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn trip_only_happens_at_or_above_threshold() {
        let mut circuit = Circuit::new(config(0.3), 5);
        let pattern = [true, true, true, false, true, true, false, true, false, false];
        for success in pattern {
            let errors_before = circuit.error_count() + u32::from(!success);
            let requests_before = circuit.request_count() + 1;
            if circuit.record(success, 10.0) == Some(CircuitState::Open) {
                assert!(errors_before as f64 / requests_before as f64 >= 0.3);
                assert_eq!((circuit.error_count(), circuit.request_count()), (0, 0));
                break;
            }
        }
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerSettings::default())
    }

    #[tokio::test]
    async fn unconfigured_endpoints_pass_through() {
        let cb = breaker();
        assert!(cb.should_allow_request("/unknown").await);
        cb.record_result("/unknown", false, 10.0).await;
        assert_eq!(cb.state("/unknown").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_drives_recovery() {
        let cb = breaker();
        cb.configure("/checkout", config(0.5)).await;
        assert_eq!(cb.monitored_endpoints().await, vec!["/checkout".to_string()]);

        cb.record_result("/checkout", false, 10.0).await;
        assert_eq!(cb.state("/checkout").await, Some(CircuitState::Open));
        assert!(!cb.should_allow_request("/checkout").await);

        // Monitor ticks every 5s; reset timeout is 60s.
        tokio::time::sleep(Duration::from_secs(66)).await;
        assert_eq!(cb.state("/checkout").await, Some(CircuitState::HalfOpen));

        for _ in 0..5 {
            cb.record_result("/checkout", true, 10.0).await;
        }
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cb.state("/checkout").await, Some(CircuitState::Closed));

        cb.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_keeps_state_and_single_monitor() {
        let cb = breaker();
        cb.configure("/a", config(0.5)).await;
        cb.record_result("/a", false, 10.0).await;

        cb.configure("/a", config(0.2)).await;
        assert_eq!(cb.state("/a").await, Some(CircuitState::Open));
        assert_eq!(cb.monitored_endpoints().await.len(), 1);

        cb.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn deconfigure_stops_monitor_and_forgets_circuit() {
        let cb = breaker();
        cb.configure("/a", config(0.5)).await;
        cb.configure("/b", config(0.5)).await;

        assert!(cb.deconfigure("/a").await);
        assert_eq!(cb.monitored_endpoints().await, vec!["/b".to_string()]);
        assert_eq!(cb.state("/a").await, None);
        assert!(!cb.deconfigure("/a").await);

        cb.stop_all().await;
        assert!(cb.monitored_endpoints().await.is_empty());
    }
}
