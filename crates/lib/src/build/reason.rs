use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Why a build was started. Flags combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct BuildReason(u32);

impl BuildReason {
  pub const NONE: BuildReason = BuildReason(0);
  pub const CHANGED_FILES: BuildReason = BuildReason(1);
  pub const CHANGED_DEPS: BuildReason = BuildReason(1 << 1);
  pub const CONFIG: BuildReason = BuildReason(1 << 2);
  pub const CRASH: BuildReason = BuildReason(1 << 3);
  pub const INIT: BuildReason = BuildReason(1 << 4);
  pub const TRIGGER: BuildReason = BuildReason(1 << 5);

  const NAMED: [(BuildReason, &'static str); 6] = [
    (Self::INIT, "Initial Build"),
    (Self::CHANGED_FILES, "Changed Files"),
    (Self::CHANGED_DEPS, "Dependency Updated"),
    (Self::CONFIG, "Config Changed"),
    (Self::CRASH, "Pod Crashed, Lost Live Update Changes"),
    (Self::TRIGGER, "Manual Trigger"),
  ];

  pub fn bits(self) -> u32 {
    self.0
  }

  pub fn is_empty(self) -> bool {
    self.0 == 0
  }

  /// Whether every flag of `other` is set.
  pub fn has(self, other: BuildReason) -> bool {
    !other.is_empty() && self.0 & other.0 == other.0
  }

  pub fn with(self, other: BuildReason) -> BuildReason {
    self | other
  }

  /// Crash rebuilds keep results of in-place updates; only a pure crash counts.
  pub fn is_crash_only(self) -> bool {
    self == Self::CRASH
  }

  /// Human-readable names of the set flags.
  pub fn names(self) -> Vec<&'static str> {
    Self::NAMED
      .iter()
      .filter(|(flag, _)| self.has(*flag))
      .map(|(_, name)| *name)
      .collect()
  }
}

impl BitOr for BuildReason {
  type Output = BuildReason;

  fn bitor(self, rhs: BuildReason) -> BuildReason {
    BuildReason(self.0 | rhs.0)
  }
}

impl BitOrAssign for BuildReason {
  fn bitor_assign(&mut self, rhs: BuildReason) {
    self.0 |= rhs.0;
  }
}

impl fmt::Display for BuildReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_empty() {
      return f.write_str("Unknown");
    }
    f.write_str(&self.names().join(" | "))
  }
}
