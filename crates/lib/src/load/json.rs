//! Declarative JSON configuration files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::settings::*;
use super::{ConfigLoadResult, ConfigLoader};
use crate::manifest::{BuildDetails, DeployTarget, Manifest, ManifestName};
use crate::target::{TargetError, TargetSpec, ValidationError, topological_sort};

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("duplicate resource name: {0}")]
  DuplicateManifest(ManifestName),

  #[error("resource {manifest}: {source}")]
  Invalid {
    manifest: ManifestName,
    #[source]
    source: ValidationError,
  },

  #[error("resource {manifest}: {source}")]
  TargetGraph {
    manifest: ManifestName,
    #[source]
    source: TargetError,
  },

  #[error("resource dependencies: {0}")]
  ResourceGraph(#[source] TargetError),
}

/// The on-disk shape of a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
  pub manifests: Vec<Manifest>,
  pub features: FeatureFlags,
  pub secrets: Vec<Secret>,
  /// Resources that start disabled.
  pub disabled: Vec<ManifestName>,
  pub team_id: String,
  pub telemetry: TelemetrySettings,
  pub update_settings: UpdateSettings,
  pub docker_prune_settings: DockerPruneSettings,
  pub watch_settings: WatchSettings,
  pub version_settings: VersionSettings,
  pub analytics_opt: AnalyticsOpt,
}

impl ConfigFile {
  pub fn read(path: &Path) -> Result<Self, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| LoadError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Stamps target names and resolves relative paths against `base_dir`.
  pub fn normalize(mut self, base_dir: &Path) -> Self {
    self.manifests = self
      .manifests
      .into_iter()
      .map(|m| normalize_manifest(m, base_dir))
      .collect();
    self
  }

  /// Checks every manifest, each manifest's target graph, and the resource dependency graph.
  pub fn validate(&self) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for manifest in &self.manifests {
      if !seen.insert(&manifest.name) {
        return Err(LoadError::DuplicateManifest(manifest.name.clone()));
      }

      manifest.validate().map_err(|source| LoadError::Invalid {
        manifest: manifest.name.clone(),
        source,
      })?;

      topological_sort(&manifest.target_specs()).map_err(|source| LoadError::TargetGraph {
        manifest: manifest.name.clone(),
        source,
      })?;
    }

    topological_sort(&self.manifests).map_err(LoadError::ResourceGraph)?;
    Ok(())
  }

  pub fn into_load_result(self, config_files: Vec<PathBuf>) -> ConfigLoadResult {
    let enabled_manifests = self
      .manifests
      .iter()
      .map(|m| m.name.clone())
      .filter(|name| !self.disabled.contains(name))
      .collect();

    ConfigLoadResult {
      manifests: self.manifests,
      config_files,
      features: self.features,
      secrets: self.secrets.into_iter().map(|s| (s.value.clone(), s)).collect(),
      enabled_manifests,
      team_id: self.team_id,
      telemetry_settings: self.telemetry,
      update_settings: self.update_settings,
      docker_prune_settings: self.docker_prune_settings,
      watch_settings: self.watch_settings,
      version_settings: self.version_settings,
      analytics_opt: self.analytics_opt,
      warnings: Vec::new(),
      error: None,
    }
  }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
  if path.as_os_str().is_empty() {
    base_dir.to_path_buf()
  } else if path.is_absolute() {
    path.to_path_buf()
  } else {
    base_dir.join(path)
  }
}

fn normalize_manifest(manifest: Manifest, base_dir: &Path) -> Manifest {
  let images = manifest
    .image_targets
    .iter()
    .cloned()
    .map(|image| {
      let deps = image.dependency_ids();
      let mut image = image.with_dependency_ids(&deps);
      match &mut image.build_details {
        BuildDetails::DockerBuild(b) => b.build_path = resolve(base_dir, &b.build_path),
        BuildDetails::CustomBuild(b) => {
          b.command.dir = resolve(base_dir, &b.command.dir);
          b.deps = b.deps.iter().map(|d| resolve(base_dir, d)).collect();
        }
        BuildDetails::Unspecified => {}
      }
      image
    })
    .collect();

  let deploy = match manifest.deploy_target.clone() {
    DeployTarget::Local(mut local) => {
      local.workdir = resolve(base_dir, &local.workdir);
      for cmd in [&mut local.update_cmd, &mut local.serve_cmd] {
        if !cmd.is_empty() {
          cmd.dir = resolve(&local.workdir, &cmd.dir);
        }
      }
      local.deps = local.deps.iter().map(|d| resolve(base_dir, d)).collect();
      DeployTarget::Local(local)
    }
    DeployTarget::DockerCompose(mut dc) => {
      dc.project.config_paths = dc.project.config_paths.iter().map(|p| resolve(base_dir, p)).collect();
      DeployTarget::DockerCompose(dc)
    }
    other => other,
  };

  manifest.with_image_targets(images).with_deploy_target(deploy)
}

/// Loads `devloop.json`-style configuration files.
#[derive(Debug, Clone, Default)]
pub struct JsonConfigLoader;

impl ConfigLoader for JsonConfigLoader {
  fn load(&self, path: &Path) -> ConfigLoadResult {
    let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let loaded = ConfigFile::read(&path)
      .map(|file| file.normalize(&base_dir))
      .and_then(|file| file.validate().map(|()| file));

    match loaded {
      Ok(file) => {
        debug!(path = %path.display(), manifests = file.manifests.len(), "loaded config");
        file.into_load_result(vec![path])
      }
      Err(err) => {
        warn!(path = %path.display(), error = %err, "config load failed");
        ConfigLoadResult::failed(vec![path], err.to_string())
      }
    }
  }
}
