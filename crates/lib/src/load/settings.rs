//! Global settings a configuration source may declare.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_MAX_PARALLEL_UPDATES;
use crate::manifest::Cmd;

pub type FeatureFlags = BTreeMap<String, bool>;

/// A declared secret. Its value is redacted from logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
  pub name: String,
  pub key: String,
  pub value: String,
}

/// Secrets keyed by their value.
pub type SecretSet = BTreeMap<String, Secret>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetrySettings {
  pub cmd: Cmd,
  pub workdir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
  pub max_parallel_updates: usize,
  pub k8s_upsert_timeout_secs: u64,
}

impl Default for UpdateSettings {
  fn default() -> Self {
    Self {
      max_parallel_updates: DEFAULT_MAX_PARALLEL_UPDATES,
      k8s_upsert_timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerPruneSettings {
  pub enabled: bool,
  pub max_age_secs: u64,
  pub num_builds: usize,
  pub interval_hours: u64,
  pub keep_recent: usize,
}

impl Default for DockerPruneSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      max_age_secs: 6 * 60 * 60,
      num_builds: 0,
      interval_hours: 1,
      keep_recent: 2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WatchSettings {
  pub ignores: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionSettings {
  pub check_updates: bool,
}

impl Default for VersionSettings {
  fn default() -> Self {
    Self { check_updates: true }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsOpt {
  #[default]
  Default,
  OptIn,
  OptOut,
}
