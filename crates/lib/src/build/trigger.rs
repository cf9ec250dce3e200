use serde::{Deserialize, Serialize};

/// When a manifest builds on its own versus waiting for a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
  /// Builds at startup and on every change.
  #[default]
  Auto,
  /// Builds at startup; later changes wait for a trigger.
  ManualWithAutoInit,
  /// Never builds without a trigger.
  Manual,
  /// Waits for a trigger at startup; later changes build on their own.
  AutoWithManualInit,
}

impl TriggerMode {
  /// Whether file and config changes start a build without a trigger.
  pub fn auto_on_change(self) -> bool {
    matches!(self, TriggerMode::Auto | TriggerMode::AutoWithManualInit)
  }

  /// Whether the first build starts without a trigger.
  pub fn auto_initial(self) -> bool {
    matches!(self, TriggerMode::Auto | TriggerMode::ManualWithAutoInit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn modes() {
    assert!(TriggerMode::Auto.auto_on_change() && TriggerMode::Auto.auto_initial());
    assert!(!TriggerMode::ManualWithAutoInit.auto_on_change() && TriggerMode::ManualWithAutoInit.auto_initial());
    assert!(!TriggerMode::Manual.auto_on_change() && !TriggerMode::Manual.auto_initial());
    assert!(TriggerMode::AutoWithManualInit.auto_on_change() && !TriggerMode::AutoWithManualInit.auto_initial());
  }
}
