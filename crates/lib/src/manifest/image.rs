//! Image targets and their build details.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::cmd::Cmd;
use crate::target::{TargetId, TargetSpec, TargetType, ValidationError, dedupe_target_ids};

/// Builds an image with a Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DockerBuild {
  pub dockerfile: String,
  pub build_path: PathBuf,
  pub build_args: BTreeMap<String, String>,
  /// Not part of build invalidation.
  pub cache_from: Vec<String>,
  pub target: String,
}

/// Builds an image with a user-supplied command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CustomBuild {
  pub command: Cmd,
  /// Not part of build invalidation; file watching covers them.
  pub deps: Vec<PathBuf>,
  pub tag: String,
  pub disable_push: bool,
  pub skips_push: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildDetails {
  #[default]
  Unspecified,
  DockerBuild(DockerBuild),
  CustomBuild(CustomBuild),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LiveUpdateSync {
  pub local_path: PathBuf,
  pub container_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LiveUpdateRun {
  pub command: Vec<String>,
  pub triggers: Vec<String>,
}

/// Steps that update a running container in place instead of rebuilding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LiveUpdateSpec {
  pub syncs: Vec<LiveUpdateSync>,
  pub runs: Vec<LiveUpdateRun>,
  pub stop_paths: Vec<String>,
}

impl LiveUpdateSpec {
  pub fn is_empty(&self) -> bool {
    self.syncs.is_empty() && self.runs.is_empty() && self.stop_paths.is_empty()
  }
}

/// An image to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImageTarget {
  pub image_ref: String,
  pub build_details: BuildDetails,
  pub live_update: LiveUpdateSpec,
  dependency_ids: Vec<TargetId>,
}

impl ImageTarget {
  pub fn new(image_ref: impl Into<String>) -> Self {
    Self {
      image_ref: image_ref.into(),
      ..Default::default()
    }
  }

  pub fn with_build_details(mut self, details: BuildDetails) -> Self {
    self.build_details = details;
    self
  }

  pub fn with_docker_build(self, build: DockerBuild) -> Self {
    self.with_build_details(BuildDetails::DockerBuild(build))
  }

  pub fn with_custom_build(self, build: CustomBuild) -> Self {
    self.with_build_details(BuildDetails::CustomBuild(build))
  }

  pub fn with_live_update(mut self, live_update: LiveUpdateSpec) -> Self {
    self.live_update = live_update;
    self
  }

  /// Sets the images this image is built from. Duplicates are dropped.
  pub fn with_dependency_ids(mut self, ids: &[TargetId]) -> Self {
    self.dependency_ids = dedupe_target_ids(ids);
    self
  }

  pub fn docker_build(&self) -> Option<&DockerBuild> {
    match &self.build_details {
      BuildDetails::DockerBuild(b) => Some(b),
      _ => None,
    }
  }

  pub fn custom_build(&self) -> Option<&CustomBuild> {
    match &self.build_details {
      BuildDetails::CustomBuild(b) => Some(b),
      _ => None,
    }
  }

  pub fn has_live_update(&self) -> bool {
    !self.live_update.is_empty()
  }

  /// Local paths whose changes affect this image.
  pub fn local_paths(&self) -> Vec<PathBuf> {
    match &self.build_details {
      BuildDetails::DockerBuild(b) => vec![b.build_path.clone()],
      BuildDetails::CustomBuild(b) => b.deps.clone(),
      BuildDetails::Unspecified => Vec::new(),
    }
  }

  /// A copy with the fields that never force a rebuild cleared.
  pub(crate) fn build_relevant(&self) -> Self {
    let mut target = self.clone();
    match &mut target.build_details {
      BuildDetails::DockerBuild(b) => b.cache_from.clear(),
      BuildDetails::CustomBuild(b) => b.deps.clear(),
      BuildDetails::Unspecified => {}
    }
    target
  }
}

impl TargetSpec for ImageTarget {
  fn id(&self) -> TargetId {
    TargetId::new(TargetType::Image, &self.image_ref)
  }

  fn validate(&self) -> Result<(), ValidationError> {
    if self.image_ref.is_empty() {
      return Err(ValidationError::MissingImageRef);
    }

    let image = self.image_ref.clone();
    match &self.build_details {
      BuildDetails::DockerBuild(b) if b.build_path.as_os_str().is_empty() => Err(ValidationError::MissingBuildPath { image }),
      BuildDetails::CustomBuild(b) if b.command.is_empty() => Err(ValidationError::EmptyCustomCommand { image }),
      BuildDetails::Unspecified => Err(ValidationError::MissingBuildDetails { image }),
      _ => Ok(()),
    }
  }

  fn dependency_ids(&self) -> Vec<TargetId> {
    self.dependency_ids.clone()
  }
}
