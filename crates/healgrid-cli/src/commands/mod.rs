pub mod check;
pub mod policies;
pub mod simulate;

use std::path::Path;

use healgrid_core::HealConfig;

/// Load `path`, or the built-in defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HealConfig> {
    match path {
        Some(path) => Ok(HealConfig::from_file(path)?),
        None => Ok(HealConfig::default()),
    }
}
