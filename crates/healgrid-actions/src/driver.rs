//! Infrastructure driver contracts.
//!
//! The executors own the control logic; the calls that actually touch
//! infrastructure (an orchestrator's scale API, a cache backend, a
//! load-balancer config push, a metrics store) go through these traits.
//! Every call may fail and reports a typed [`DriverError`].

use std::future::Future;
use std::pin::Pin;

use healgrid_core::{BackendServer, LoadBalancingAlgorithm, MetricSnapshot, ServerHealth};

use crate::cache::CacheConfig;
use crate::error::DriverError;

/// Boxed future alias for driver calls.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Instance-count control for the service behind an endpoint.
pub trait ScalingDriver: Send + Sync {
    /// Current instance count, or `None` if it cannot be determined.
    fn instance_count<'a>(&'a self, endpoint: &'a str) -> DriverFuture<'a, Option<u32>>;

    /// Instances currently passing health checks.
    fn healthy_instance_count<'a>(&'a self, endpoint: &'a str) -> DriverFuture<'a, u32>;

    /// Request the given instance count.
    fn set_instance_count<'a>(&'a self, endpoint: &'a str, count: u32) -> DriverFuture<'a, ()>;
}

/// Caching layer in front of an endpoint.
pub trait CacheBackend: Send + Sync {
    /// Push TTL / capacity settings to the backend.
    fn apply_config<'a>(&'a self, endpoint: &'a str, config: &'a CacheConfig) -> DriverFuture<'a, ()>;

    /// Pre-fetch and cache one batch of keys.
    fn warm_batch<'a>(&'a self, endpoint: &'a str, keys: &'a [String]) -> DriverFuture<'a, ()>;
}

/// Load balancer fronting an endpoint's backends.
pub trait LoadBalancerDriver: Send + Sync {
    /// Push the algorithm and server weights to the balancer.
    fn apply_config<'a>(
        &'a self,
        endpoint: &'a str,
        algorithm: LoadBalancingAlgorithm,
        servers: &'a [BackendServer],
    ) -> DriverFuture<'a, ()>;

    /// Probe a single backend.
    fn probe<'a>(&'a self, server: &'a BackendServer) -> DriverFuture<'a, ServerHealth>;
}

/// Source of live endpoint metrics.
pub trait MetricsSource: Send + Sync {
    fn current_metrics<'a>(&'a self, endpoint: &'a str) -> DriverFuture<'a, MetricSnapshot>;
}
