//! healgrid-decision — picks at most one mitigation per observation.
//!
//! Policies are sorted by descending priority once, when the engine is
//! built. Evaluation walks them in that order and stops at the first
//! enabled policy whose conditions all hold.

pub mod engine;

pub use engine::DecisionEngine;
