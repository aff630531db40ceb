//! healgrid-actions — mitigation executors and the orchestrator that
//! drives them.
//!
//! Each executor owns per-endpoint state behind an [`EndpointMap`] cell
//! and, where it needs one, a background loop per endpoint.
//!
//! # Architecture
//!
//! ```text
//! ActionOrchestrator
//!   ├── in-flight action ids (atomic check-and-insert)
//!   ├── CircuitBreaker ── per-endpoint recovery monitor (5s)
//!   ├── AutoScaler     ── cooldown, gradual steps, healthy-count polling
//!   ├── LoadBalancer   ── per-endpoint health-check loop (30s)
//!   └── CacheManager   ── cooldown, paced hot-key warming
//!         │
//!         ▼
//!   driver traits (ScalingDriver, CacheBackend, LoadBalancerDriver,
//!                  MetricsSource) ← InMemoryInfrastructure
//! ```
//!
//! [`EndpointMap`]: healgrid_core::EndpointMap

pub mod cache;
pub mod circuit_breaker;
pub mod driver;
pub mod error;
pub mod load_balancer;
pub mod memory;
mod monitor;
pub mod orchestrator;
pub mod scaler;

pub use cache::{CacheConfig, CacheManager, CacheOutcome};
pub use circuit_breaker::{Circuit, CircuitBreaker, CircuitConfig, CircuitSnapshot};
pub use driver::{CacheBackend, DriverFuture, LoadBalancerDriver, MetricsSource, ScalingDriver};
pub use error::{ActionError, DriverError, ExecResult};
pub use load_balancer::LoadBalancer;
pub use memory::{FailPoint, InMemoryInfrastructure};
pub use orchestrator::{ActionOrchestrator, Infrastructure};
pub use scaler::{AutoScaler, ScaleOutcome};
