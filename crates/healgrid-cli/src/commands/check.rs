use std::path::Path;

use anyhow::bail;
use healgrid_core::HealConfig;
use healgrid_core::config::format_duration;
use healgrid_decision::DecisionEngine;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let config = HealConfig::from_file(path)?;
    let engine = DecisionEngine::new(config.policies());

    let invalid = engine.invalid_policies();
    if !invalid.is_empty() {
        for (id, err) in &invalid {
            eprintln!("✗ policy {id}: {err}");
        }
        bail!("{} of {} policies are invalid", invalid.len(), engine.policies().count());
    }

    println!("✓ {} is valid", path.display());
    println!("  policies: {}", engine.policies().count());
    println!(
        "  scaler: {}..{} instances, cooldown {}",
        config.scaler.min_instances,
        config.scaler.max_instances,
        format_duration(config.scaler.cooldown)
    );
    println!(
        "  circuit breaker: monitor every {}, reset after {}",
        format_duration(config.circuit_breaker.monitor_interval),
        format_duration(config.circuit_breaker.reset_timeout)
    );
    Ok(())
}
