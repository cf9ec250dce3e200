//! The manifest type and the closed set of targets it is made of.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::deploy::{DeployTarget, LocalTarget};
use super::image::ImageTarget;
use crate::build::TriggerMode;
use crate::consts::MAIN_CONFIG_NAME;
use crate::target::{TargetId, TargetSpec, TargetType, ValidationError};

/// Unique name of a manifest (a resource).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ManifestName(pub String);

impl ManifestName {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  /// The name of the main configuration source.
  pub fn main_config() -> Self {
    Self(MAIN_CONFIG_NAME.to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn is_main_config(&self) -> bool {
    self.0 == MAIN_CONFIG_NAME
  }

  pub fn target_id(&self) -> TargetId {
    TargetId::new(TargetType::Manifest, &self.0)
  }
}

impl fmt::Display for ManifestName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ManifestName {
  fn from(name: &str) -> Self {
    Self(name.to_string())
  }
}

/// A node of a manifest's build graph: one of its images or its deploy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Image(ImageTarget),
  Deploy(DeployTarget),
}

impl TargetSpec for Target {
  fn id(&self) -> TargetId {
    match self {
      Target::Image(t) => t.id(),
      Target::Deploy(t) => t.id(),
    }
  }

  fn validate(&self) -> Result<(), ValidationError> {
    match self {
      Target::Image(t) => t.validate(),
      Target::Deploy(t) => t.validate(),
    }
  }

  fn dependency_ids(&self) -> Vec<TargetId> {
    match self {
      Target::Image(t) => t.dependency_ids(),
      Target::Deploy(t) => t.dependency_ids(),
    }
  }
}

/// A named, buildable and deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Manifest {
  pub name: ManifestName,
  pub image_targets: Vec<ImageTarget>,
  pub deploy_target: DeployTarget,
  pub trigger_mode: TriggerMode,
  /// Manifests that must have built before this one builds for the first time.
  pub resource_dependencies: Vec<ManifestName>,
  /// The configuration source that declared this manifest.
  pub source_config: ManifestName,
  pub labels: BTreeMap<String, String>,
}

impl Manifest {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: ManifestName::new(name),
      ..Default::default()
    }
  }

  /// Sets the deploy target, stamping it with this manifest's name.
  pub fn with_deploy_target(mut self, target: DeployTarget) -> Self {
    self.deploy_target = target.with_name(self.name.as_str());
    self
  }

  pub fn with_image_target(mut self, target: ImageTarget) -> Self {
    self.image_targets.push(target);
    self
  }

  pub fn with_image_targets(mut self, targets: Vec<ImageTarget>) -> Self {
    self.image_targets = targets;
    self
  }

  pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
    self.trigger_mode = mode;
    self
  }

  pub fn with_resource_dependencies(mut self, deps: Vec<ManifestName>) -> Self {
    self.resource_dependencies = deps;
    self
  }

  pub fn with_source_config(mut self, source: ManifestName) -> Self {
    self.source_config = source;
    self
  }

  pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
    self.labels = labels;
    self
  }

  pub fn is_k8s(&self) -> bool {
    matches!(self.deploy_target, DeployTarget::K8s(_))
  }

  pub fn is_docker_compose(&self) -> bool {
    matches!(self.deploy_target, DeployTarget::DockerCompose(_))
  }

  pub fn is_local(&self) -> bool {
    matches!(self.deploy_target, DeployTarget::Local(_))
  }

  pub fn local_target(&self) -> Option<&LocalTarget> {
    self.deploy_target.as_local()
  }

  /// The deploy target's type, used to detect a manifest changing kind.
  pub fn deploy_type(&self) -> Option<TargetType> {
    self.deploy_target.target_type()
  }

  /// Image targets followed by the deploy target.
  pub fn target_specs(&self) -> Vec<Target> {
    let mut targets: Vec<Target> = self.image_targets.iter().cloned().map(Target::Image).collect();
    if !self.deploy_target.is_none() {
      targets.push(Target::Deploy(self.deploy_target.clone()));
    }
    targets
  }

  /// Ids of the targets this manifest builds, images first.
  pub fn target_ids(&self) -> Vec<TargetId> {
    self.target_specs().iter().map(TargetSpec::id).collect()
  }

  pub fn image_target_by_id(&self, id: &TargetId) -> Option<&ImageTarget> {
    self.image_targets.iter().find(|t| &t.id() == id)
  }

  /// Local paths whose changes affect this manifest, sorted and deduped.
  pub fn local_paths(&self) -> Vec<PathBuf> {
    let mut paths = match &self.deploy_target {
      DeployTarget::Local(t) => t.deps.clone(),
      _ => {
        let mut paths: Vec<PathBuf> = self.image_targets.iter().flat_map(|t| t.local_paths()).collect();
        paths.extend(self.deploy_target.local_paths());
        paths
      }
    };
    paths.sort();
    paths.dedup();
    paths
  }

  /// Checks the manifest name and each of its targets.
  pub fn validate(&self) -> Result<(), ValidationError> {
    validate_name(self.name.as_str())?;

    for target in &self.image_targets {
      target.validate()?;
    }
    self.deploy_target.validate()
  }
}

impl TargetSpec for Manifest {
  fn id(&self) -> TargetId {
    self.name.target_id()
  }

  fn validate(&self) -> Result<(), ValidationError> {
    Manifest::validate(self)
  }

  fn dependency_ids(&self) -> Vec<TargetId> {
    self.resource_dependencies.iter().map(ManifestName::target_id).collect()
  }
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
  if name.is_empty() {
    return Err(ValidationError::MissingManifestName);
  }

  let reason = if name.contains('/') {
    "may not contain '/'"
  } else if name == "." || name == ".." {
    "may not be '.' or '..'"
  } else {
    return Ok(());
  };

  Err(ValidationError::InvalidManifestName {
    name: name.to_string(),
    reason,
  })
}
