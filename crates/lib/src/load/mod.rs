//! Configuration loading.
//!
//! A `ConfigLoader` turns a configuration source into a `ConfigLoadResult`.
//! Evaluation failures are reported inside the result rather than as a Rust
//! error so callers can tell "evaluated to nothing" from "failed to evaluate".

mod json;
mod settings;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use json::{ConfigFile, JsonConfigLoader, LoadError};
pub use settings::*;

use crate::manifest::{Manifest, ManifestName};

/// Everything one evaluation of a configuration source produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLoadResult {
  pub manifests: Vec<Manifest>,
  /// Files read during evaluation; changes to them trigger a reload.
  pub config_files: Vec<PathBuf>,
  pub features: FeatureFlags,
  pub secrets: SecretSet,
  /// Manifests the user has enabled. Every other manifest is disabled.
  pub enabled_manifests: Vec<ManifestName>,
  pub team_id: String,
  pub telemetry_settings: TelemetrySettings,
  pub update_settings: UpdateSettings,
  pub docker_prune_settings: DockerPruneSettings,
  pub watch_settings: WatchSettings,
  pub version_settings: VersionSettings,
  pub analytics_opt: AnalyticsOpt,
  pub warnings: Vec<String>,
  /// Set when evaluation failed.
  pub error: Option<String>,
}

impl ConfigLoadResult {
  pub fn failed(config_files: Vec<PathBuf>, error: impl Into<String>) -> Self {
    Self {
      config_files,
      error: Some(error.into()),
      ..Default::default()
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  pub fn is_enabled(&self, name: &ManifestName) -> bool {
    self.enabled_manifests.contains(name)
  }

  pub fn manifest(&self, name: &ManifestName) -> Option<&Manifest> {
    self.manifests.iter().find(|m| &m.name == name)
  }

  /// Manifests grouped by name, for lookups during object generation.
  pub fn manifests_by_name(&self) -> BTreeMap<&ManifestName, &Manifest> {
    self.manifests.iter().map(|m| (&m.name, m)).collect()
  }
}

/// Evaluates a configuration source.
pub trait ConfigLoader {
  fn load(&self, path: &Path) -> ConfigLoadResult;
}
