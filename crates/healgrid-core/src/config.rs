//! healgrid.toml configuration parser.
//!
//! Every section is optional; omitted fields fall back to the defaults
//! the control loop was tuned with. Durations are written as `"5s"`,
//! `"500ms"`, `"5m"` or `"24h"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::policy::{Policy, default_policies};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub circuit_breaker: CircuitBreakerSettings,
    pub scaler: ScalerSettings,
    pub load_balancer: LoadBalancerSettings,
    pub cache: CacheSettings,
    pub tracker: TrackerSettings,
    /// Falls back to [`default_policies`] when absent.
    pub policies: Option<Vec<Policy>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    #[serde(with = "duration_str")]
    pub monitor_interval: Duration,
    /// Time spent OPEN before probing, unless an action overrides it.
    #[serde(with = "duration_str")]
    pub reset_timeout: Duration,
    /// Probe requests admitted (and required) while HALF_OPEN.
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(60),
            half_open_probes: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerSettings {
    pub min_instances: u32,
    pub max_instances: u32,
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
    #[serde(with = "duration_str")]
    pub health_poll_interval: Duration,
    pub health_poll_attempts: u32,
}

impl Default for ScalerSettings {
    fn default() -> Self {
        Self {
            min_instances: 2,
            max_instances: 10,
            cooldown: Duration::from_secs(5 * 60),
            health_poll_interval: Duration::from_secs(10),
            health_poll_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSettings {
    #[serde(with = "duration_str")]
    pub health_check_interval: Duration,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
    pub warm_batch_size: usize,
    #[serde(with = "duration_str")]
    pub warm_batch_delay: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            warm_batch_size: 50,
            warm_batch_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    #[serde(with = "duration_str")]
    pub history_window: Duration,
    pub min_success_rate: f64,
    pub min_improvement: f64,
    /// Results per success-rate window in trend analysis.
    pub trend_window: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            history_window: Duration::from_secs(24 * 60 * 60),
            min_success_rate: 0.7,
            min_improvement: 0.2,
            trend_window: 5,
        }
    }
}

impl HealConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: HealConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The configured policies, or the built-in set.
    pub fn policies(&self) -> Vec<Policy> {
        self.policies.clone().unwrap_or_else(default_policies)
    }

    /// Reject settings the executors cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let s = &self.scaler;
        if s.min_instances == 0 || s.min_instances > s.max_instances {
            return Err(ConfigError::Invalid(format!(
                "scaler bounds must satisfy 1 <= min ({}) <= max ({})",
                s.min_instances, s.max_instances
            )));
        }
        if s.health_poll_attempts == 0 {
            return Err(ConfigError::Invalid("scaler.health_poll_attempts must be > 0".into()));
        }
        if self.cache.warm_batch_size == 0 {
            return Err(ConfigError::Invalid("cache.warm_batch_size must be > 0".into()));
        }
        if self.tracker.trend_window == 0 {
            return Err(ConfigError::Invalid("tracker.trend_window must be > 0".into()));
        }
        if self.circuit_breaker.half_open_probes == 0 {
            return Err(ConfigError::Invalid("circuit_breaker.half_open_probes must be > 0".into()));
        }
        if self.circuit_breaker.monitor_interval.is_zero()
            || self.load_balancer.health_check_interval.is_zero()
        {
            return Err(ConfigError::Invalid("monitor intervals must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "5m", "24h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let bad = || ConfigError::InvalidDuration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().map(Duration::from_millis).map_err(|_| bad())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().map(|m| Duration::from_secs(m * 60)).map_err(|_| bad())
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600)).map_err(|_| bad())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    }
}

/// Render a duration in the shortest exact unit.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else {
        let secs = d.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionType;

    #[test]
    fn empty_config_uses_defaults() {
        let config = HealConfig::from_toml_str("").unwrap();
        assert_eq!(config.scaler.min_instances, 2);
        assert_eq!(config.scaler.max_instances, 10);
        assert_eq!(config.scaler.cooldown, Duration::from_secs(300));
        assert_eq!(config.circuit_breaker.monitor_interval, Duration::from_secs(5));
        assert_eq!(config.load_balancer.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.cache.warm_batch_size, 50);
        assert_eq!(config.tracker.history_window, Duration::from_secs(86_400));
        assert_eq!(config.policies().len(), 3);
    }

    #[test]
    fn parses_sections_and_policies() {
        let config = HealConfig::from_toml_str(
            r#"
            [scaler]
            max_instances = 20
            cooldown = "1m"

            [cache]
            warm_batch_delay = "250ms"

            [[policies]]
            id = "risk"
            name = "Risky"
            priority = 10
            conditions = [{ metric = "risk_level", operator = "gt", threshold = 0.8 }]
            actions = [{ type = "adjust_load_balancer", parameters = { algorithm = "least_connections" } }]
            "#,
        )
        .unwrap();

        assert_eq!(config.scaler.max_instances, 20);
        assert_eq!(config.scaler.min_instances, 2);
        assert_eq!(config.scaler.cooldown, Duration::from_secs(60));
        assert_eq!(config.cache.warm_batch_delay, Duration::from_millis(250));

        let policies = config.policies();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].actions[0].action_type, ActionType::AdjustLoadBalancer);
        assert_eq!(
            policies[0].actions[0].parameters.str_or("algorithm", "").unwrap(),
            "least_connections"
        );
    }

    #[test]
    fn rejects_inverted_scaler_bounds() {
        let err = HealConfig::from_toml_str("[scaler]\nmin_instances = 5\nmax_instances = 3\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = HealConfig::from_toml_str("[cache]\ncooldown = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("healgrid.toml");
        std::fs::write(&path, "[tracker]\nmin_success_rate = 0.9\n").unwrap();

        let config = HealConfig::from_file(&path).unwrap();
        assert_eq!(config.tracker.min_success_rate, 0.9);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("ten").is_err());
    }

    #[test]
    fn format_duration_roundtrips_common_values() {
        for raw in ["5s", "500ms", "5m", "24h", "90s"] {
            assert_eq!(format_duration(parse_duration(raw).unwrap()), raw);
        }
    }
}
