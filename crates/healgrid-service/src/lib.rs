//! healgrid-service — the self-healing control loop.
//!
//! ```text
//! (PredictionResult, MetricSnapshot)
//!   → DecisionEngine::evaluate        at most one Action
//!   → ActionTracker::should_try_action skip types that have not worked
//!   → ActionOrchestrator::execute_action
//!   → ActionTracker::record_action_result
//! ```
//!
//! One healing operation runs per endpoint at a time.

pub mod error;
pub mod service;

pub use error::HealError;
pub use service::{HealingStatus, SelfHealingService};
