//! healgrid-feedback — learns from executed actions.
//!
//! The [`ActionTracker`] keeps running effectiveness statistics per
//! (endpoint, action type) and a 24h window of recent results per
//! endpoint. It gates repeat attempts of action types that have not
//! worked and summarizes how results trend over time.

pub mod tracker;
pub mod trends;

pub use tracker::{ActionEffectiveness, ActionTracker, improvement};
pub use trends::{SideEffectCount, TrendReport, TrendStats};
