mod insights;
mod plan;
mod up;
mod validate;

use std::path::Path;

use anyhow::{Result, bail};

use devloop_lib::load::{ConfigLoadResult, ConfigLoader, JsonConfigLoader};

pub use insights::{InsightsArgs, cmd_insights};
pub use plan::cmd_plan;
pub use up::{UpArgs, cmd_up};
pub use validate::cmd_validate;

/// Loads a configuration file, failing if it does not evaluate.
fn load_config(path: &Path) -> Result<ConfigLoadResult> {
  let result = JsonConfigLoader.load(path);
  if let Some(error) = &result.error {
    bail!("Failed to load config {}: {}", path.display(), error);
  }
  Ok(result)
}
