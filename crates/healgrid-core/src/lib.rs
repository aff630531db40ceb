//! healgrid-core — shared vocabulary for the healgrid control plane.
//!
//! Everything the decision engine, the executors, the tracker, and the
//! service pass between each other lives here: metric and prediction
//! observations, actions and their results, policies, and the TOML
//! configuration that tunes the control loop.
//!
//! # Layout
//!
//! ```text
//! types   — MetricSnapshot, PredictionResult, Action, ActionResult,
//!           circuit / backend / algorithm enums
//! policy  — Policy, Condition, Metric, Operator, default policy set
//! config  — HealConfig (+ per-executor settings), duration parsing
//! slots   — EndpointMap: one exclusive-access cell per endpoint
//! error   — ConfigError
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod slots;
pub mod types;

pub use config::HealConfig;
pub use error::{ConfigError, ConfigResult};
pub use policy::{ActionTemplate, Condition, Metric, Operator, Policy, default_policies};
pub use slots::EndpointMap;
pub use types::*;
