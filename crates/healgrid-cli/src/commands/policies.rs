use std::path::Path;

use healgrid_core::Policy;
use healgrid_decision::DecisionEngine;

pub fn run(config: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let engine = DecisionEngine::new(config.policies());
    let ordered: Vec<&Policy> = engine.policies().collect();
    println!("{}", serde_json::to_string_pretty(&ordered)?);
    Ok(())
}
