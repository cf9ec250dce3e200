//! Target identifiers, the target capability trait, and graph errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of node in the build graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
  #[default]
  Unknown,
  Image,
  K8s,
  DockerCompose,
  Local,
  Manifest,
  ConfigFile,
}

impl TargetType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TargetType::Unknown => "",
      TargetType::Image => "image",
      TargetType::K8s => "k8s",
      TargetType::DockerCompose => "dockercompose",
      TargetType::Local => "local",
      TargetType::Manifest => "manifest",
      TargetType::ConfigFile => "configfile",
    }
  }
}

impl fmt::Display for TargetType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identifies a node in the build graph by type and name.
///
/// An id whose type or name is empty is the "empty" id and never names a
/// valid dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TargetId {
  #[serde(rename = "type")]
  pub target_type: TargetType,
  pub name: String,
}

impl TargetId {
  pub fn new(target_type: TargetType, name: impl Into<String>) -> Self {
    Self {
      target_type,
      name: name.into(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.target_type == TargetType::Unknown || self.name.is_empty()
  }
}

impl fmt::Display for TargetId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.target_type, self.name)
  }
}

/// Errors raised when a target fails its own validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("manifest missing name")]
  MissingManifestName,

  #[error("invalid manifest name {name:?}: {reason}")]
  InvalidManifestName { name: String, reason: &'static str },

  #[error("{target_type} target missing name")]
  MissingTargetName { target_type: TargetType },

  #[error("image target missing image ref")]
  MissingImageRef,

  #[error("image {image}: no build details provided")]
  MissingBuildDetails { image: String },

  #[error("image {image}: docker build missing build path")]
  MissingBuildPath { image: String },

  #[error("image {image}: custom build command must not be empty")]
  EmptyCustomCommand { image: String },

  #[error("k8s target {target}: missing yaml")]
  MissingYaml { target: String },

  #[error("docker compose target {target}: missing service name")]
  MissingComposeService { target: String },

  #[error("local target {target}: needs an update or serve command")]
  MissingLocalCommand { target: String },
}

/// Errors raised while ordering a set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
  #[error("found cycle at target: {0}")]
  Cycle(TargetId),

  #[error("missing target dependency: {0}")]
  MissingDependency(TargetId),

  #[error("invalid target {id}: {source}")]
  Invalid {
    id: TargetId,
    #[source]
    source: ValidationError,
  },
}

/// Capabilities shared by every node of the build graph.
pub trait TargetSpec {
  /// The id of this target.
  fn id(&self) -> TargetId;

  /// Checks that the target is well formed on its own.
  fn validate(&self) -> Result<(), ValidationError>;

  /// Ids of the targets that must be built before this one.
  fn dependency_ids(&self) -> Vec<TargetId>;
}
